//! Replay a [`MutationBatch`] against the stores.
//!
//! Mutations run strictly in emitted order. The applier keeps a working copy
//! of the flow snapshot in step with every mutation that lands, so both the
//! success report and a partial failure describe exactly what the store now
//! holds.
//!
//! A stale `UpdateBlock` (store hash differs from `expected_hash`) is not an
//! error: it is skipped, recorded as a [`Conflict`], and the rest of the batch
//! proceeds.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use pradera_doc::{CreateSlot, FlowSnapshot, Mutation, MutationBatch};
use pradera_types::{Block, BlockId, BlockPatch, FlowBlockCriteria, NewFlowBlock};

use crate::store::{BlockStore, FlowStore, StoreError};

/// An update that was not applied because the block changed underneath.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Document position of the node.
    pub position: usize,
    pub block_id: BlockId,
    pub expected_hash: String,
    /// Hash the store holds now; `None` if the block was deleted.
    pub actual_hash: Option<String>,
}

/// What a batch did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyReport {
    /// Created block ids, indexed by [`CreateSlot`].
    pub created: Vec<BlockId>,
    /// Created blocks whose flow-block row also landed, in slot order.
    pub bound: Vec<BlockId>,
    pub updated: Vec<BlockId>,
    pub detached: Vec<BlockId>,
    pub deleted: Vec<BlockId>,
    /// Blocks a `DeleteBlock` left alone because another flow still uses them.
    pub kept: Vec<BlockId>,
    pub reordered: usize,
    pub conflicts: Vec<Conflict>,
    /// Mutations that reached the store (conflicts excluded).
    pub applied: usize,
    /// The flow as it stands after this batch.
    pub snapshot: FlowSnapshot,
}

impl ApplyReport {
    fn new(snapshot: FlowSnapshot) -> Self {
        Self {
            created: Vec::new(),
            bound: Vec::new(),
            updated: Vec::new(),
            detached: Vec::new(),
            deleted: Vec::new(),
            kept: Vec::new(),
            reordered: 0,
            conflicts: Vec::new(),
            applied: 0,
            snapshot,
        }
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A flow-block referenced a create slot that has no block yet.
    #[error("create slot {} has no block", .0.0)]
    UnresolvedSlot(CreateSlot),
}

/// A batch that stopped part-way.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("batch stopped after {} mutations: {error}", .partial.applied)]
pub struct ApplyFailure {
    /// Everything that landed before the failure.
    pub partial: Box<ApplyReport>,
    #[source]
    pub error: ApplyError,
}

/// Apply `batch` on top of `snapshot`.
pub async fn apply_batch(
    blocks: &dyn BlockStore,
    flows: &dyn FlowStore,
    batch: &MutationBatch,
    snapshot: &FlowSnapshot,
) -> Result<ApplyReport, ApplyFailure> {
    let mut report = ApplyReport::new(snapshot.clone());
    let mut fresh: Vec<Block> = Vec::new();

    for mutation in batch {
        if let Err(error) = apply_one(blocks, flows, mutation, &mut report, &mut fresh).await {
            warn!(
                "batch for flow {} failed after {} of {} mutations: {}",
                batch.flow_id(),
                report.applied,
                batch.len(),
                error
            );
            return Err(ApplyFailure {
                partial: Box::new(report),
                error,
            });
        }
    }

    if !report.snapshot.orders_are_unique() {
        warn!("flow {} has duplicate block orders after apply", batch.flow_id());
    }
    info!(
        "applied {} mutations to flow {} ({} conflicts)",
        report.applied,
        batch.flow_id(),
        report.conflicts.len()
    );
    Ok(report)
}

async fn apply_one(
    blocks: &dyn BlockStore,
    flows: &dyn FlowStore,
    mutation: &Mutation,
    report: &mut ApplyReport,
    fresh: &mut Vec<Block>,
) -> Result<(), ApplyError> {
    match mutation {
        Mutation::CreateBlock { slot, block, .. } => {
            let created = blocks.create_block(block).await?;
            debug!("slot {} -> block {}", slot.0, created.id);
            report.created.push(created.id);
            fresh.push(created);
        }
        Mutation::CreateFlowBlock {
            flow_id,
            slot,
            block_order,
        } => {
            let record = fresh
                .get(slot.0)
                .cloned()
                .ok_or(ApplyError::UnresolvedSlot(*slot))?;
            let row = flows
                .create_flow_block(&NewFlowBlock {
                    flow_id: *flow_id,
                    block_id: record.id,
                    block_order: *block_order,
                })
                .await?;
            report.bound.push(record.id);
            report.snapshot.insert_entry(row, record);
        }
        Mutation::UpdateBlock {
            id,
            position,
            block_type,
            content,
            expected_hash,
            ..
        } => {
            let current = match blocks.get_block(*id).await {
                Ok(current) => Some(current),
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(e.into()),
            };
            let current = match current {
                Some(current) if current.hash() == expected_hash => current,
                stale => {
                    let actual_hash = stale.as_ref().map(|b| b.hash().to_string());
                    warn!(
                        "block {} changed since it was loaded (expected {}, found {:?}), skipping update",
                        id, expected_hash, actual_hash
                    );
                    // the next pass compares against what the store holds now
                    if let Some(latest) = stale {
                        report.snapshot.replace_block(latest);
                    }
                    report.conflicts.push(Conflict {
                        position: *position,
                        block_id: *id,
                        expected_hash: expected_hash.clone(),
                        actual_hash,
                    });
                    return Ok(());
                }
            };
            let patch = BlockPatch::default()
                .block_type(*block_type)
                .content(content.clone());
            let updated = blocks.patch_block(current.id, &patch).await?;
            report.updated.push(updated.id);
            report.snapshot.replace_block(updated);
        }
        Mutation::DeleteFlowBlock {
            flow_block_id,
            block_id,
        } => {
            match flows.delete_flow_block(*flow_block_id).await {
                Ok(()) => {}
                Err(StoreError::NotFound(_)) => {
                    debug!("flow-block {} already gone", flow_block_id);
                }
                Err(e) => return Err(e.into()),
            }
            report.snapshot.remove_entry(*block_id);
            report.detached.push(*block_id);
        }
        Mutation::DeleteBlock { id } => {
            let rows = flows.flow_blocks(&FlowBlockCriteria::for_block(*id)).await?;
            if rows.is_empty() {
                match blocks.delete_block(*id).await {
                    Ok(()) | Err(StoreError::NotFound(_)) => report.deleted.push(*id),
                    Err(e) => return Err(e.into()),
                }
            } else {
                debug!("block {} still in {} flows, keeping it", id, rows.len());
                report.kept.push(*id);
            }
        }
        Mutation::ReorderFlowBlock {
            flow_block_id,
            block_id,
            to,
            ..
        } => {
            flows.reorder_flow_block(*flow_block_id, *to).await?;
            report.snapshot.set_order(*block_id, *to);
            report.reordered += 1;
        }
    }
    report.applied += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, load_snapshot};
    use pradera_doc::{DeletePolicy, Document, Node, ReconcileOptions, reconcile};
    use pradera_types::{BlockType, FlowId, NewBlock, NewFlow, UserId, UserRef};

    fn owner() -> UserRef {
        UserRef::new(UserId::new(1)).with_login("admin")
    }

    /// Flow with paragraphs "a", "b", "c" at orders 0, 1, 2.
    fn seeded() -> (MemoryStore, FlowId) {
        let store = MemoryStore::new();
        let flow = store.seed_flow(NewFlow::new("story").unwrap().with_owner(owner()));
        for (order, text) in ["a", "b", "c"].into_iter().enumerate() {
            let block = store.seed_block(NewBlock::new(BlockType::Paragraph, text, owner()));
            store.seed_flow_block(NewFlowBlock {
                flow_id: flow.id,
                block_id: block.id,
                block_order: order as i64,
            });
        }
        (store, flow.id)
    }

    async fn edit(
        store: &MemoryStore,
        flow: FlowId,
        change: impl FnOnce(&mut Document),
        options: ReconcileOptions,
    ) -> (FlowSnapshot, MutationBatch) {
        let snapshot = load_snapshot(store, store, flow).await.unwrap();
        let mut doc = snapshot.project();
        change(&mut doc);
        let batch = reconcile(&snapshot, &doc, &owner(), options).unwrap();
        (snapshot, batch)
    }

    #[tokio::test]
    async fn test_insert_and_delete_land_in_order() {
        let (store, flow) = seeded();
        let (snapshot, batch) = edit(
            &store,
            flow,
            |doc| {
                doc.content.remove(0);
                doc.content.insert(1, Node::heading("new"));
            },
            ReconcileOptions::default(),
        )
        .await;

        let report = apply_batch(&store, &store, &batch, &snapshot).await.unwrap();
        assert_eq!(report.applied, batch.len());
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.bound, report.created);
        assert_eq!(store.flow_text(flow), vec!["b", "new", "c"]);
        assert!(report.snapshot.orders_are_unique());
        assert_eq!(report.snapshot, load_snapshot(&store, &store, flow).await.unwrap());
        // detach only: the block survives
        assert_eq!(store.block_count(), 4);
    }

    #[tokio::test]
    async fn test_delete_orphans_spares_shared_blocks() {
        let (store, flow) = seeded();
        let other = store.seed_flow(NewFlow::new("other").unwrap());
        let shared = store.rows(flow)[0].block_id;
        store.seed_flow_block(NewFlowBlock {
            flow_id: other.id,
            block_id: shared,
            block_order: 0,
        });

        let options = ReconcileOptions::default().with_delete_policy(DeletePolicy::DeleteOrphans);
        let (snapshot, batch) = edit(&store, flow, |doc| doc.content.clear(), options).await;

        let report = apply_batch(&store, &store, &batch, &snapshot).await.unwrap();
        assert_eq!(report.detached.len(), 3);
        assert_eq!(report.deleted.len(), 2);
        assert_eq!(report.kept, vec![shared]);
        assert!(store.block(shared).is_some());
        assert!(report.snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_stale_update_is_a_conflict_and_batch_continues() {
        let (store, flow) = seeded();
        let (snapshot, batch) = edit(
            &store,
            flow,
            |doc| {
                let id = doc.content[0].block_id().unwrap();
                doc.content[0] = Node::paragraph("mine").with_block_id(id);
                doc.content.push(Node::paragraph("tail"));
            },
            ReconcileOptions::default(),
        )
        .await;

        // someone else edits block "a" first
        let first = snapshot.entries()[0].block_id();
        let mut theirs = store.block(first).unwrap();
        theirs.set_content("theirs");
        store.put_block(theirs.clone());

        let report = apply_batch(&store, &store, &batch, &snapshot).await.unwrap();
        assert_eq!(report.conflicts.len(), 1);
        let conflict = &report.conflicts[0];
        assert_eq!(conflict.position, 0);
        assert_eq!(conflict.actual_hash.as_deref(), Some(theirs.hash()));
        assert_eq!(store.flow_text(flow), vec!["theirs", "b", "c", "tail"]);
        assert_eq!(report.snapshot.entry(first).unwrap().block.content(), "theirs");
    }

    #[tokio::test]
    async fn test_failure_reports_partial_progress() {
        let (store, flow) = seeded();
        let (snapshot, batch) = edit(
            &store,
            flow,
            |doc| {
                doc.content.insert(0, Node::paragraph("x"));
                doc.content.insert(0, Node::paragraph("y"));
            },
            ReconcileOptions::default(),
        )
        .await;
        // create, bind, create, then fail
        store.fail_after(3);

        let failure = apply_batch(&store, &store, &batch, &snapshot).await.unwrap_err();
        assert!(matches!(failure.error, ApplyError::Store(StoreError::Unavailable(_))));
        assert_eq!(failure.partial.applied, 3);
        assert_eq!(failure.partial.created.len(), 2);
        assert_eq!(failure.partial.bound.len(), 1);
        assert_eq!(failure.partial.snapshot.len(), 4);
    }
}
