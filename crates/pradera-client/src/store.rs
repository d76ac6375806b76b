//! Store traits for blocks and flows.
//!
//! Both traits mirror the REST collection resources of the backend. The
//! editor core only ever talks to them through [`Stores`], so the in-memory
//! store and the REST store are interchangeable.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use pradera_types::{
    Block, BlockCriteria, BlockDto, BlockId, BlockPatch, Flow, FlowBlock, FlowBlockCriteria,
    FlowBlockId, FlowId, NewBlock, NewFlow, NewFlowBlock, TypeError, UserId,
};

/// Errors from a block or flow store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// Transport failure: connection refused, timeout, etc.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("could not decode store response: {0}")]
    Decode(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        StoreError::NotFound(format!("{entity} {id}"))
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<TypeError> for StoreError {
    fn from(err: TypeError) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// Durable block records.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Block records of one flow, as the store returns them (ordered by id).
    ///
    /// Records are left unconverted so the caller can report unknown block
    /// types against the flow being projected.
    async fn blocks_for_flow(&self, flow: FlowId) -> Result<Vec<BlockDto>, StoreError>;

    async fn get_block(&self, id: BlockId) -> Result<Block, StoreError>;

    async fn create_block(&self, block: &NewBlock) -> Result<Block, StoreError>;

    /// Replace a block (`PUT`).
    async fn update_block(&self, block: &Block) -> Result<Block, StoreError>;

    /// Merge-patch a block (`PATCH`).
    async fn patch_block(&self, id: BlockId, patch: &BlockPatch) -> Result<Block, StoreError>;

    async fn delete_block(&self, id: BlockId) -> Result<(), StoreError>;

    async fn find_blocks(&self, criteria: &BlockCriteria) -> Result<Vec<BlockDto>, StoreError>;

    async fn count_blocks(&self, criteria: &BlockCriteria) -> Result<u64, StoreError>;

    /// Full-text search over block content.
    async fn search_blocks(&self, query: &str) -> Result<Vec<BlockDto>, StoreError>;
}

/// Durable flows and their flow-block rows.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn flows_by_user(&self, user: UserId) -> Result<Vec<Flow>, StoreError>;

    async fn get_flow(&self, id: FlowId) -> Result<Flow, StoreError>;

    async fn create_flow(&self, flow: &NewFlow) -> Result<Flow, StoreError>;

    async fn update_flow(&self, flow: &Flow) -> Result<Flow, StoreError>;

    /// Partial update of a flow's name.
    async fn rename_flow(&self, id: FlowId, name: &str) -> Result<Flow, StoreError>;

    /// Deletes the flow and its flow-block rows; blocks are untouched.
    async fn delete_flow(&self, id: FlowId) -> Result<(), StoreError>;

    async fn flow_blocks(&self, criteria: &FlowBlockCriteria) -> Result<Vec<FlowBlock>, StoreError>;

    async fn create_flow_block(&self, row: &NewFlowBlock) -> Result<FlowBlock, StoreError>;

    async fn reorder_flow_block(
        &self,
        id: FlowBlockId,
        block_order: i64,
    ) -> Result<FlowBlock, StoreError>;

    async fn delete_flow_block(&self, id: FlowBlockId) -> Result<(), StoreError>;

    /// Persist the editor document of a flow. The payload is opaque to the store.
    async fn upload_document_state(
        &self,
        flow: FlowId,
        state: &serde_json::Value,
    ) -> Result<(), StoreError>;
}

/// The pair of stores a session works against.
#[derive(Clone)]
pub struct Stores {
    pub blocks: Arc<dyn BlockStore>,
    pub flows: Arc<dyn FlowStore>,
}

impl Stores {
    /// Use one backend for both traits.
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: BlockStore + FlowStore + 'static,
    {
        Self {
            blocks: store.clone(),
            flows: store,
        }
    }

    pub fn split(blocks: Arc<dyn BlockStore>, flows: Arc<dyn FlowStore>) -> Self {
        Self { blocks, flows }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
