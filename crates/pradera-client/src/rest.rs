//! REST store over the backend's JSON API.
//!
//! Paths follow the backend's collection resources under `/api`:
//! `blocks`, `flows`, `flow-blocks`, `_search/blocks`, plus the two flow
//! extensions `flows/by-user-id/{id}` and `flows/upload-document-state/{id}`.
//! Criteria are sent as `field.operator=value` query parameters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use pradera_types::{
    Block, BlockCriteria, BlockDto, BlockId, BlockPatch, Flow, FlowBlock, FlowBlockCriteria,
    FlowBlockDto, FlowBlockId, FlowId, NewBlock, NewFlow, NewFlowBlock, UserId,
};

use crate::store::{BlockStore, FlowStore, StoreError};

const MERGE_PATCH: &str = "application/merge-patch+json";

/// Connection settings for [`RestStore`].
#[derive(Clone, Debug)]
pub struct RestConfig {
    /// Server root, e.g. `http://localhost:8080`. `/api` is appended.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Block and flow store backed by HTTP.
#[derive(Clone, Debug)]
pub struct RestStore {
    client: Client,
    api: String,
}

impl RestStore {
    pub fn new(config: RestConfig) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StoreError::Unavailable(format!("invalid bearer token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("http client: {e}")))?;
        let api = format!("{}/api", config.base_url.trim_end_matches('/'));
        Ok(Self { client, api })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api, path)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, StoreError> {
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(what.to_string()));
        }
        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT {
            return Err(StoreError::Conflict(message));
        }
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, StoreError> {
        let response = self.send(request, what).await?;
        let bytes = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode(format!("{what}: {e}")))
    }

    async fn empty(&self, request: RequestBuilder, what: &str) -> Result<(), StoreError> {
        self.send(request, what).await.map(|_| ())
    }

    fn merge_patch<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<RequestBuilder, StoreError> {
        let body = serde_json::to_vec(body).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(self
            .client
            .patch(self.url(path))
            .header(CONTENT_TYPE, MERGE_PATCH)
            .body(body))
    }
}

fn transport(err: reqwest::Error) -> StoreError {
    if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl BlockStore for RestStore {
    #[instrument(skip(self), name = "rest.blocks_for_flow")]
    async fn blocks_for_flow(&self, flow: FlowId) -> Result<Vec<BlockDto>, StoreError> {
        let request = self
            .client
            .get(self.url("blocks"))
            .query(&[("flowId", flow.get())]);
        let records: Vec<BlockDto> = self.json(request, &format!("blocks of flow {flow}")).await?;
        debug!("fetched {} block records for flow {}", records.len(), flow);
        Ok(records)
    }

    #[instrument(skip(self), name = "rest.get_block")]
    async fn get_block(&self, id: BlockId) -> Result<Block, StoreError> {
        let request = self.client.get(self.url(&format!("blocks/{id}")));
        self.json(request, &format!("block {id}")).await
    }

    #[instrument(skip(self, block), name = "rest.create_block")]
    async fn create_block(&self, block: &NewBlock) -> Result<Block, StoreError> {
        let request = self.client.post(self.url("blocks")).json(&block.to_dto());
        self.json(request, "new block").await
    }

    #[instrument(skip(self, block), fields(id = %block.id), name = "rest.update_block")]
    async fn update_block(&self, block: &Block) -> Result<Block, StoreError> {
        let id = block.id;
        let request = self.client.put(self.url(&format!("blocks/{id}"))).json(block);
        self.json(request, &format!("block {id}")).await
    }

    #[instrument(skip(self, patch), name = "rest.patch_block")]
    async fn patch_block(&self, id: BlockId, patch: &BlockPatch) -> Result<Block, StoreError> {
        // merge-patch bodies carry the id, as the backend checks it against the path
        let mut body = serde_json::to_value(patch).map_err(|e| StoreError::Decode(e.to_string()))?;
        if let Some(map) = body.as_object_mut() {
            map.insert("id".into(), id.get().into());
        }
        let request = self.merge_patch(&format!("blocks/{id}"), &body)?;
        self.json(request, &format!("block {id}")).await
    }

    #[instrument(skip(self), name = "rest.delete_block")]
    async fn delete_block(&self, id: BlockId) -> Result<(), StoreError> {
        let request = self.client.delete(self.url(&format!("blocks/{id}")));
        self.empty(request, &format!("block {id}")).await
    }

    #[instrument(skip(self), name = "rest.find_blocks")]
    async fn find_blocks(&self, criteria: &BlockCriteria) -> Result<Vec<BlockDto>, StoreError> {
        let request = self
            .client
            .get(self.url("blocks"))
            .query(&criteria.query_params());
        self.json(request, "blocks").await
    }

    #[instrument(skip(self), name = "rest.count_blocks")]
    async fn count_blocks(&self, criteria: &BlockCriteria) -> Result<u64, StoreError> {
        let request = self
            .client
            .get(self.url("blocks/count"))
            .query(&criteria.query_params());
        self.json(request, "block count").await
    }

    #[instrument(skip(self), name = "rest.search_blocks")]
    async fn search_blocks(&self, query: &str) -> Result<Vec<BlockDto>, StoreError> {
        let request = self
            .client
            .get(self.url("_search/blocks"))
            .query(&[("query", query)]);
        self.json(request, "block search").await
    }
}

#[async_trait]
impl FlowStore for RestStore {
    #[instrument(skip(self), name = "rest.flows_by_user")]
    async fn flows_by_user(&self, user: UserId) -> Result<Vec<Flow>, StoreError> {
        let request = self.client.get(self.url(&format!("flows/by-user-id/{user}")));
        self.json(request, &format!("flows of user {user}")).await
    }

    #[instrument(skip(self), name = "rest.get_flow")]
    async fn get_flow(&self, id: FlowId) -> Result<Flow, StoreError> {
        let request = self.client.get(self.url(&format!("flows/{id}")));
        self.json(request, &format!("flow {id}")).await
    }

    #[instrument(skip(self, flow), fields(name = %flow.name), name = "rest.create_flow")]
    async fn create_flow(&self, flow: &NewFlow) -> Result<Flow, StoreError> {
        let request = self.client.post(self.url("flows")).json(flow);
        self.json(request, "new flow").await
    }

    #[instrument(skip(self, flow), fields(id = %flow.id), name = "rest.update_flow")]
    async fn update_flow(&self, flow: &Flow) -> Result<Flow, StoreError> {
        let id = flow.id;
        let request = self.client.put(self.url(&format!("flows/{id}"))).json(flow);
        self.json(request, &format!("flow {id}")).await
    }

    #[instrument(skip(self), name = "rest.rename_flow")]
    async fn rename_flow(&self, id: FlowId, name: &str) -> Result<Flow, StoreError> {
        let body = serde_json::json!({ "id": id, "name": name });
        let request = self.merge_patch(&format!("flows/{id}"), &body)?;
        self.json(request, &format!("flow {id}")).await
    }

    #[instrument(skip(self), name = "rest.delete_flow")]
    async fn delete_flow(&self, id: FlowId) -> Result<(), StoreError> {
        let request = self.client.delete(self.url(&format!("flows/{id}")));
        self.empty(request, &format!("flow {id}")).await
    }

    #[instrument(skip(self), name = "rest.flow_blocks")]
    async fn flow_blocks(&self, criteria: &FlowBlockCriteria) -> Result<Vec<FlowBlock>, StoreError> {
        let request = self
            .client
            .get(self.url("flow-blocks"))
            .query(&criteria.query_params());
        self.json(request, "flow-blocks").await
    }

    #[instrument(skip(self), name = "rest.create_flow_block")]
    async fn create_flow_block(&self, row: &NewFlowBlock) -> Result<FlowBlock, StoreError> {
        let request = self.client.post(self.url("flow-blocks")).json(&row.to_dto());
        self.json(request, "new flow-block").await
    }

    #[instrument(skip(self), name = "rest.reorder_flow_block")]
    async fn reorder_flow_block(
        &self,
        id: FlowBlockId,
        block_order: i64,
    ) -> Result<FlowBlock, StoreError> {
        let body = FlowBlockDto {
            id: Some(id),
            block_order,
            flow: None,
            block: None,
        };
        let request = self.merge_patch(&format!("flow-blocks/{id}"), &body)?;
        self.json(request, &format!("flow-block {id}")).await
    }

    #[instrument(skip(self), name = "rest.delete_flow_block")]
    async fn delete_flow_block(&self, id: FlowBlockId) -> Result<(), StoreError> {
        let request = self.client.delete(self.url(&format!("flow-blocks/{id}")));
        self.empty(request, &format!("flow-block {id}")).await
    }

    #[instrument(skip(self, state), name = "rest.upload_document_state")]
    async fn upload_document_state(
        &self,
        flow: FlowId,
        state: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let request = self
            .client
            .put(self.url(&format!("flows/upload-document-state/{flow}")))
            .json(state);
        self.empty(request, &format!("flow {flow}")).await
    }
}
