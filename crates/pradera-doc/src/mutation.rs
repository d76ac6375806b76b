//! Store mutations produced by reconciliation.
//!
//! A [`MutationBatch`] is applied strictly in order. A `CreateBlock` is
//! always followed by the `CreateFlowBlock` that binds it; the binding refers
//! to the block through its [`CreateSlot`] because the id only exists once
//! the store has assigned it.

use serde::Serialize;

use pradera_types::{BlockId, BlockType, FlowBlockId, FlowId, NewBlock};

/// Index of a `CreateBlock` within its batch (0 for the first create).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CreateSlot(pub usize);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Mutation {
    /// Create a block for a node the user inserted.
    #[serde(rename_all = "camelCase")]
    CreateBlock {
        slot: CreateSlot,
        position: usize,
        block: NewBlock,
    },
    /// Bind the block created in `slot` into the flow at `block_order`.
    #[serde(rename_all = "camelCase")]
    CreateFlowBlock {
        flow_id: FlowId,
        slot: CreateSlot,
        block_order: i64,
    },
    /// Rewrite type and/or content of an existing block.
    ///
    /// `expected_hash` is the hash the session last saw; the applier refuses
    /// the update if the store holds something else.
    #[serde(rename_all = "camelCase")]
    UpdateBlock {
        id: BlockId,
        position: usize,
        block_type: BlockType,
        content: String,
        hash: String,
        expected_hash: String,
    },
    /// Detach a block from the flow.
    #[serde(rename_all = "camelCase")]
    DeleteFlowBlock {
        flow_block_id: FlowBlockId,
        block_id: BlockId,
    },
    /// Delete the block itself, only if no flow references it any more.
    #[serde(rename_all = "camelCase")]
    DeleteBlock { id: BlockId },
    /// Move a block's row to a new order.
    #[serde(rename_all = "camelCase")]
    ReorderFlowBlock {
        flow_block_id: FlowBlockId,
        block_id: BlockId,
        from: i64,
        to: i64,
    },
}

/// Discriminant of [`Mutation`], for counting and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MutationKind {
    CreateBlock,
    CreateFlowBlock,
    UpdateBlock,
    DeleteFlowBlock,
    DeleteBlock,
    ReorderFlowBlock,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::CreateBlock { .. } => MutationKind::CreateBlock,
            Mutation::CreateFlowBlock { .. } => MutationKind::CreateFlowBlock,
            Mutation::UpdateBlock { .. } => MutationKind::UpdateBlock,
            Mutation::DeleteFlowBlock { .. } => MutationKind::DeleteFlowBlock,
            Mutation::DeleteBlock { .. } => MutationKind::DeleteBlock,
            Mutation::ReorderFlowBlock { .. } => MutationKind::ReorderFlowBlock,
        }
    }
}

/// Ordered mutations for one flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationBatch {
    flow_id: FlowId,
    mutations: Vec<Mutation>,
}

impl MutationBatch {
    pub fn new(flow_id: FlowId) -> Self {
        Self {
            flow_id,
            mutations: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mutation> {
        self.mutations.iter()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn count(&self, kind: MutationKind) -> usize {
        self.mutations.iter().filter(|m| m.kind() == kind).count()
    }

    /// Drop the `UpdateBlock` mutations of blocks `hold` selects; returns
    /// how many were dropped. Creates, deletes and reorders are untouched.
    pub fn hold_updates(&mut self, hold: impl Fn(BlockId) -> bool) -> usize {
        let before = self.mutations.len();
        self.mutations
            .retain(|m| !matches!(m, Mutation::UpdateBlock { id, .. } if hold(*id)));
        before - self.mutations.len()
    }

    /// Number of `CreateBlock` mutations (= number of slots).
    pub fn create_count(&self) -> usize {
        self.count(MutationKind::CreateBlock)
    }

    /// Document position of each create slot, in slot order.
    pub fn created_positions(&self) -> Vec<usize> {
        self.mutations
            .iter()
            .filter_map(|m| match m {
                Mutation::CreateBlock { position, .. } => Some(*position),
                _ => None,
            })
            .collect()
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "flow {}: {} create, {} update, {} detach, {} delete, {} reorder",
            self.flow_id,
            self.create_count(),
            self.count(MutationKind::UpdateBlock),
            self.count(MutationKind::DeleteFlowBlock),
            self.count(MutationKind::DeleteBlock),
            self.count(MutationKind::ReorderFlowBlock),
        )
    }
}

impl<'a> IntoIterator for &'a MutationBatch {
    type Item = &'a Mutation;
    type IntoIter = std::slice::Iter<'a, Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.iter()
    }
}
