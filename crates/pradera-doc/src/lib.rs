//! Block list ⇄ editor document mapping for Pradera.
//!
//! A flow is stored as flat, ordered block records. The editing surface works
//! on a tree-shaped document. This crate translates in both directions and
//! does no I/O:
//!
//! ```text
//! FlowSnapshot ──project──▶ Document ──(user edits)──▶ Document
//!      ▲                                                  │
//!      └──────────── MutationBatch ◀──reconcile───────────┘
//! ```
//!
//! # Identity
//!
//! Every projected node carries `attrs.blockId`. The editing surface keeps it
//! across edits; nodes the user creates have none. The reconciler matches on
//! that id alone and recomputes `blockOrder` from document position, never
//! from anything the client sends.
//!
//! # Mutation order
//!
//! Creates and binds (with updates interleaved in document order) come first,
//! then detaches, then reorders. Callers apply the batch in that order.

mod document;
mod error;
mod mutation;
mod projector;
mod reconcile;
mod snapshot;

pub use document::{Document, Inline, MAX_HEADING_LEVEL, Node, NodeAttrs, NodeType, TITLE_LEVEL};
pub use error::DocError;
pub use mutation::{CreateSlot, Mutation, MutationBatch, MutationKind};
pub use projector::{project, project_records};
pub use reconcile::{DeletePolicy, ReconcileOptions, reconcile};
pub use snapshot::{FlowSnapshot, SnapshotEntry};

/// Result type for document operations.
pub type Result<T> = std::result::Result<T, DocError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pradera_types::{Block, BlockId, BlockType, FlowBlock, FlowBlockId, FlowId, UserId, UserRef};

    #[test]
    fn edit_cycle_through_json() {
        let flow = FlowId::new(1);
        let owner = UserRef::new(UserId::new(1));
        let entries = [(10, BlockType::Title, "Book"), (11, BlockType::Paragraph, "Once")]
            .into_iter()
            .enumerate()
            .map(|(order, (id, ty, text))| SnapshotEntry {
                flow_block: FlowBlock {
                    id: FlowBlockId::new(id + 100),
                    block_order: order as i64,
                    flow_id: flow,
                    block_id: BlockId::new(id),
                },
                block: Block::new(BlockId::new(id), ty, text, Utc::now(), owner.clone()),
            })
            .collect();
        let snapshot = FlowSnapshot::new(flow, entries).unwrap();

        // the editor sends the document back as JSON with one appended node
        let mut value = snapshot.project().to_value().unwrap();
        value["content"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({"type": "paragraph", "attrs": {"blockId": ""},
                                     "content": [{"type": "text", "text": "upon"}]}));
        let edited = Document::from_value(value).unwrap();

        let batch = reconcile(&snapshot, &edited, &owner, ReconcileOptions::default()).unwrap();
        assert_eq!(batch.count(MutationKind::CreateBlock), 1);
        assert_eq!(batch.count(MutationKind::ReorderFlowBlock), 0);
        assert_eq!(batch.created_positions(), vec![2]);
    }
}
