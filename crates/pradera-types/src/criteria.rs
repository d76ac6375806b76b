//! Query filters over blocks and flow-blocks.
//!
//! Each filter is an AND of the fields that are set. `matches` evaluates
//! locally; `query_params` renders the same filter in the store's
//! `field.operator=value` query syntax.

use crate::block::{Block, BlockType};
use crate::flow::FlowBlock;
use crate::ids::{BlockId, FlowId, UserId};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockCriteria {
    pub id: Option<BlockId>,
    pub block_type: Option<BlockType>,
    /// Case-sensitive substring of the content.
    pub content_contains: Option<String>,
    pub hash: Option<String>,
    pub owner: Option<UserId>,
    pub parent: Option<BlockId>,
    pub flow: Option<FlowId>,
}

impl BlockCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, block_type: BlockType) -> Self {
        self.block_type = Some(block_type);
        self
    }

    pub fn with_content(mut self, needle: impl Into<String>) -> Self {
        self.content_contains = Some(needle.into());
        self
    }

    pub fn with_owner(mut self, owner: UserId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_parent(mut self, parent: BlockId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn in_flow(mut self, flow: FlowId) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Evaluate against a block and the flows that reference it.
    pub fn matches(&self, block: &Block, flows_of_block: &[FlowId]) -> bool {
        self.id.is_none_or(|id| block.id == id)
            && self.block_type.is_none_or(|t| block.block_type == t)
            && self
                .content_contains
                .as_deref()
                .is_none_or(|needle| block.content().contains(needle))
            && self.hash.as_deref().is_none_or(|h| block.hash() == h)
            && self.owner.is_none_or(|u| block.owner.id == u)
            && self.parent.is_none_or(|p| block.parent == Some(p))
            && self.flow.is_none_or(|f| flows_of_block.contains(&f))
    }

    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(id) = self.id {
            params.push(("id.equals".to_string(), id.to_string()));
        }
        if let Some(t) = self.block_type {
            params.push(("type.equals".to_string(), t.as_str().to_string()));
        }
        if let Some(needle) = &self.content_contains {
            params.push(("content.contains".to_string(), needle.clone()));
        }
        if let Some(hash) = &self.hash {
            params.push(("hash.equals".to_string(), hash.clone()));
        }
        if let Some(owner) = self.owner {
            params.push(("userId.equals".to_string(), owner.to_string()));
        }
        if let Some(parent) = self.parent {
            params.push(("parentId.equals".to_string(), parent.to_string()));
        }
        if let Some(flow) = self.flow {
            params.push(("flowId.equals".to_string(), flow.to_string()));
        }
        params
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowBlockCriteria {
    pub flow: Option<FlowId>,
    pub block: Option<BlockId>,
}

impl FlowBlockCriteria {
    pub fn for_flow(flow: FlowId) -> Self {
        Self {
            flow: Some(flow),
            block: None,
        }
    }

    pub fn for_block(block: BlockId) -> Self {
        Self {
            flow: None,
            block: Some(block),
        }
    }

    pub fn matches(&self, row: &FlowBlock) -> bool {
        self.flow.is_none_or(|f| row.flow_id == f) && self.block.is_none_or(|b| row.block_id == b)
    }

    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(flow) = self.flow {
            params.push(("flowId.equals".to_string(), flow.to_string()));
        }
        if let Some(block) = self.block {
            params.push(("blockId.equals".to_string(), block.to_string()));
        }
        params
    }
}
