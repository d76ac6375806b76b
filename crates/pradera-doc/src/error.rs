//! Error types for projection and reconciliation.

use thiserror::Error;

use pradera_types::{BlockId, FlowId, TypeError};

/// Errors raised synchronously by the projector, the reconciler, and
/// snapshot construction. None of them involve I/O.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocError {
    /// A block record carries a type outside the closed enumeration.
    #[error("block {block_id:?} has unknown type '{value}'")]
    UnknownBlockType {
        block_id: Option<BlockId>,
        value: String,
    },

    /// The edited document references a block the flow snapshot does not know.
    ///
    /// The whole batch is rejected; the caller must reload and re-project.
    #[error("document node {position} references block {block_id} which is not in flow {flow_id}")]
    DanglingBlockReference {
        flow_id: FlowId,
        block_id: BlockId,
        position: usize,
    },

    /// The document does not have the expected shape.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// A block or flow-block record is incomplete.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Two flow-block rows of one flow share an order value.
    #[error("flow {flow_id} has blocks {first} and {second} at the same order {block_order}")]
    DuplicateOrder {
        flow_id: FlowId,
        block_order: i64,
        first: BlockId,
        second: BlockId,
    },

    /// Snapshot rows are inconsistent (wrong flow, mismatched ids, repeats).
    #[error("invalid flow snapshot: {0}")]
    InvalidSnapshot(String),
}

impl From<TypeError> for DocError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::UnknownBlockType { block_id, value } => {
                DocError::UnknownBlockType { block_id, value }
            }
            other => DocError::MalformedRecord(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for DocError {
    fn from(err: serde_json::Error) -> Self {
        DocError::MalformedDocument(err.to_string())
    }
}
