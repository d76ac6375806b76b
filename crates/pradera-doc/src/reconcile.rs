//! Edited document → ordered store mutations.
//!
//! Identity is carried by `attrs.blockId`. The batch is built in three
//! sections, always in this order:
//!
//! 1. per node, in document order: `CreateBlock` + `CreateFlowBlock` for new
//!    nodes, `UpdateBlock` for changed ones, nothing for unchanged ones;
//! 2. `DeleteFlowBlock` (and `DeleteBlock` under [`DeletePolicy::DeleteOrphans`])
//!    for snapshot blocks the document dropped;
//! 3. `ReorderFlowBlock` for surviving rows whose order is no longer their
//!    zero-based document position.
//!
//! Every `blockId` is resolved against the snapshot before anything is
//! emitted, so a dangling reference rejects the whole batch.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use pradera_types::{BlockId, NewBlock, UserRef, content_hash};

use crate::{
    CreateSlot, DocError, Document, FlowSnapshot, Mutation, MutationBatch, SnapshotEntry,
};

/// What happens to a block once the document no longer contains it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Only remove the flow-block row; the block survives for other flows.
    #[default]
    DetachOnly,
    /// Also delete the block when nothing in the flow names it as parent.
    /// The applier still skips blocks other flows reference.
    DeleteOrphans,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub delete_policy: DeletePolicy,
}

impl ReconcileOptions {
    pub fn with_delete_policy(mut self, delete_policy: DeletePolicy) -> Self {
        self.delete_policy = delete_policy;
        self
    }
}

/// Compute the mutations that make `snapshot` match `edited`.
///
/// New blocks are owned by `actor`.
pub fn reconcile(
    snapshot: &FlowSnapshot,
    edited: &Document,
    actor: &UserRef,
    options: ReconcileOptions,
) -> Result<MutationBatch, DocError> {
    edited.validate()?;
    let matched = resolve(snapshot, edited)?;
    let flow_id = snapshot.flow_id();
    let mut batch = MutationBatch::new(flow_id);

    let mut slot = 0usize;
    for (position, (node, entry)) in edited.nodes().iter().zip(&matched).enumerate() {
        let block_type = node.block_type();
        let text = node.text();
        match entry {
            None => {
                let created = CreateSlot(slot);
                slot += 1;
                batch.push(Mutation::CreateBlock {
                    slot: created,
                    position,
                    block: NewBlock::new(block_type, text, actor.clone()),
                });
                batch.push(Mutation::CreateFlowBlock {
                    flow_id,
                    slot: created,
                    block_order: order_of(position),
                });
            }
            Some(entry) if entry.block.same_node(block_type, &text) => {}
            Some(entry) => {
                let hash = content_hash(&text);
                batch.push(Mutation::UpdateBlock {
                    id: entry.block_id(),
                    position,
                    block_type,
                    content: text,
                    hash,
                    expected_hash: entry.block.hash().to_string(),
                });
            }
        }
    }

    let kept: HashSet<BlockId> = matched.iter().flatten().map(|e| e.block_id()).collect();
    for entry in snapshot.entries() {
        let id = entry.block_id();
        if kept.contains(&id) {
            continue;
        }
        batch.push(Mutation::DeleteFlowBlock {
            flow_block_id: entry.flow_block.id,
            block_id: id,
        });
        if options.delete_policy == DeletePolicy::DeleteOrphans && !snapshot.has_children(id) {
            batch.push(Mutation::DeleteBlock { id });
        }
    }

    for (position, entry) in matched.iter().enumerate() {
        let Some(entry) = entry else { continue };
        let to = order_of(position);
        if entry.block_order() != to {
            batch.push(Mutation::ReorderFlowBlock {
                flow_block_id: entry.flow_block.id,
                block_id: entry.block_id(),
                from: entry.block_order(),
                to,
            });
        }
    }

    debug!("reconciled {}", batch.summary());
    Ok(batch)
}

/// Match every node to its snapshot entry.
///
/// `None` marks a node that needs a new block: no id at all, or a repeat of
/// an id an earlier node already claimed.
fn resolve<'a>(
    snapshot: &'a FlowSnapshot,
    edited: &Document,
) -> Result<Vec<Option<&'a SnapshotEntry>>, DocError> {
    let mut claimed = HashSet::new();
    let mut matched = Vec::with_capacity(edited.len());
    for (position, node) in edited.nodes().iter().enumerate() {
        let Some(id) = node.block_id() else {
            matched.push(None);
            continue;
        };
        let entry = snapshot
            .entry(id)
            .ok_or(DocError::DanglingBlockReference {
                flow_id: snapshot.flow_id(),
                block_id: id,
                position,
            })?;
        if claimed.insert(id) {
            matched.push(Some(entry));
        } else {
            debug!(%id, position, "repeated blockId treated as new node");
            matched.push(None);
        }
    }
    Ok(matched)
}

fn order_of(position: usize) -> i64 {
    i64::try_from(position).unwrap_or(i64::MAX)
}
