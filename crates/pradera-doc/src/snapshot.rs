//! Last-known state of one flow: its flow-block rows joined with their blocks.
//!
//! The reconciler compares an edited document against this snapshot. The
//! applier keeps a working copy in step with every mutation it lands, so a
//! snapshot always describes what the store holds as far as this session
//! knows.

use std::collections::HashMap;

use pradera_types::{Block, BlockDto, BlockId, FlowBlock, FlowId};

use crate::{DocError, Document, project};

/// One flow-block row with the block it points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub flow_block: FlowBlock,
    pub block: Block,
}

impl SnapshotEntry {
    pub fn block_id(&self) -> BlockId {
        self.block.id
    }

    pub fn block_order(&self) -> i64 {
        self.flow_block.block_order
    }
}

/// Ordered snapshot of a flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowSnapshot {
    flow_id: FlowId,
    entries: Vec<SnapshotEntry>,
    index: HashMap<BlockId, usize>,
}

impl FlowSnapshot {
    /// An empty flow.
    pub fn empty(flow_id: FlowId) -> Self {
        Self {
            flow_id,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build from entries already in ascending `block_order`.
    ///
    /// Fails on rows of another flow, rows whose block id disagrees with the
    /// joined block, a block listed twice, or orders that are not strictly
    /// increasing.
    pub fn new(flow_id: FlowId, entries: Vec<SnapshotEntry>) -> Result<Self, DocError> {
        let mut snapshot = Self {
            flow_id,
            entries,
            index: HashMap::new(),
        };
        snapshot.check()?;
        Ok(snapshot)
    }

    /// Build from rows in any order; sorts by `block_order` first.
    pub fn from_unordered(flow_id: FlowId, mut entries: Vec<SnapshotEntry>) -> Result<Self, DocError> {
        entries.sort_by_key(|e| e.flow_block.block_order);
        Self::new(flow_id, entries)
    }

    /// Join flow-block rows with block records (any order) and validate.
    ///
    /// Block records are converted here, so an unknown block type surfaces as
    /// [`DocError::UnknownBlockType`].
    pub fn join(
        flow_id: FlowId,
        flow_blocks: Vec<FlowBlock>,
        records: Vec<BlockDto>,
    ) -> Result<Self, DocError> {
        let mut blocks: HashMap<BlockId, Block> = HashMap::with_capacity(records.len());
        for record in records {
            let block = Block::try_from(record)?;
            blocks.insert(block.id, block);
        }
        let mut entries = Vec::with_capacity(flow_blocks.len());
        for flow_block in flow_blocks {
            let block = blocks.get(&flow_block.block_id).cloned().ok_or_else(|| {
                DocError::InvalidSnapshot(format!(
                    "flow-block {} points at block {} which was not returned for flow {}",
                    flow_block.id, flow_block.block_id, flow_id
                ))
            })?;
            entries.push(SnapshotEntry { flow_block, block });
        }
        Self::from_unordered(flow_id, entries)
    }

    fn check(&mut self) -> Result<(), DocError> {
        self.index.clear();
        for (position, entry) in self.entries.iter().enumerate() {
            if entry.flow_block.flow_id != self.flow_id {
                return Err(DocError::InvalidSnapshot(format!(
                    "flow-block {} belongs to flow {}, not {}",
                    entry.flow_block.id, entry.flow_block.flow_id, self.flow_id
                )));
            }
            if entry.flow_block.block_id != entry.block.id {
                return Err(DocError::InvalidSnapshot(format!(
                    "flow-block {} points at block {} but carries block {}",
                    entry.flow_block.id, entry.flow_block.block_id, entry.block.id
                )));
            }
            if position > 0 {
                let prev = &self.entries[position - 1];
                if prev.block_order() == entry.block_order() {
                    return Err(DocError::DuplicateOrder {
                        flow_id: self.flow_id,
                        block_order: entry.block_order(),
                        first: prev.block_id(),
                        second: entry.block_id(),
                    });
                }
                if prev.block_order() > entry.block_order() {
                    return Err(DocError::InvalidSnapshot(format!(
                        "entries out of order at position {position}"
                    )));
                }
            }
            if self.index.insert(entry.block_id(), position).is_some() {
                return Err(DocError::InvalidSnapshot(format!(
                    "block {} appears twice in flow {}",
                    entry.block_id(),
                    self.flow_id
                )));
            }
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.entries.sort_by_key(|e| e.flow_block.block_order);
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, e)| (e.block_id(), position))
            .collect();
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: BlockId) -> Option<&SnapshotEntry> {
        self.index.get(&id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.index.contains_key(&id)
    }

    /// Blocks in ascending `block_order`.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.entries.iter().map(|e| &e.block)
    }

    /// Whether any block in this flow names `id` as its parent.
    pub fn has_children(&self, id: BlockId) -> bool {
        self.entries.iter().any(|e| e.block.parent == Some(id))
    }

    /// Project the snapshot into a document.
    pub fn project(&self) -> Document {
        project(self.blocks())
    }

    /// Whether the strict total order invariant currently holds.
    pub fn orders_are_unique(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[0].block_order() < w[1].block_order())
    }

    // ── Working-copy updates (applier) ─────────────────────────────────────

    /// Replace the block record of an entry, if present.
    pub fn replace_block(&mut self, block: Block) {
        if let Some(&i) = self.index.get(&block.id) {
            self.entries[i].block = block;
        }
    }

    /// Add a freshly bound row.
    pub fn insert_entry(&mut self, flow_block: FlowBlock, block: Block) {
        self.entries.push(SnapshotEntry { flow_block, block });
        self.reindex();
    }

    /// Drop the row of a detached block.
    pub fn remove_entry(&mut self, id: BlockId) -> Option<SnapshotEntry> {
        let &i = self.index.get(&id)?;
        let removed = self.entries.remove(i);
        self.reindex();
        Some(removed)
    }

    /// Record a new `block_order` for a block's row.
    pub fn set_order(&mut self, id: BlockId, block_order: i64) {
        if let Some(&i) = self.index.get(&id) {
            self.entries[i].flow_block.block_order = block_order;
            self.reindex();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pradera_types::{BlockType, FlowBlockId, UserId, UserRef};

    fn entry(flow: i64, row: i64, block: i64, order: i64) -> SnapshotEntry {
        SnapshotEntry {
            flow_block: FlowBlock {
                id: FlowBlockId::new(row),
                block_order: order,
                flow_id: FlowId::new(flow),
                block_id: BlockId::new(block),
            },
            block: Block::new(
                BlockId::new(block),
                BlockType::Paragraph,
                format!("block {block}"),
                Utc::now(),
                UserRef::new(UserId::new(1)),
            ),
        }
    }

    #[test]
    fn from_unordered_sorts_by_order() {
        let snap = FlowSnapshot::from_unordered(
            FlowId::new(1),
            vec![entry(1, 10, 3, 2), entry(1, 11, 1, 0), entry(1, 12, 2, 1)],
        )
        .unwrap();
        let ids: Vec<i64> = snap.blocks().map(|b| b.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(snap.entry(BlockId::new(3)).unwrap().block_order(), 2);
    }

    #[test]
    fn duplicate_order_is_rejected() {
        let err = FlowSnapshot::from_unordered(
            FlowId::new(1),
            vec![entry(1, 10, 1, 0), entry(1, 11, 2, 0)],
        )
        .unwrap_err();
        assert!(matches!(err, DocError::DuplicateOrder { block_order: 0, .. }));
    }

    #[test]
    fn foreign_rows_are_rejected() {
        let err = FlowSnapshot::new(FlowId::new(1), vec![entry(2, 10, 1, 0)]).unwrap_err();
        assert!(matches!(err, DocError::InvalidSnapshot(_)));
    }

    #[test]
    fn join_reports_unknown_type() {
        let fb = entry(1, 10, 1, 0).flow_block;
        let record = BlockDto {
            id: Some(BlockId::new(1)),
            block_type: "FOOTNOTE".into(),
            content: "x".into(),
            created_date: Some(Utc::now()),
            hash: None,
            parent: None,
            user: Some(UserRef::new(UserId::new(1))),
        };
        let err = FlowSnapshot::join(FlowId::new(1), vec![fb], vec![record]).unwrap_err();
        assert!(matches!(err, DocError::UnknownBlockType { .. }));
    }

    #[test]
    fn join_reports_missing_block() {
        let fb = entry(1, 10, 1, 0).flow_block;
        let err = FlowSnapshot::join(FlowId::new(1), vec![fb], vec![]).unwrap_err();
        assert!(matches!(err, DocError::InvalidSnapshot(_)));
    }

    #[test]
    fn working_copy_updates_keep_index() {
        let mut snap = FlowSnapshot::new(
            FlowId::new(1),
            vec![entry(1, 10, 1, 0), entry(1, 11, 2, 1)],
        )
        .unwrap();
        snap.set_order(BlockId::new(1), 5);
        assert_eq!(snap.entries()[1].block_id(), BlockId::new(1));
        assert!(snap.remove_entry(BlockId::new(2)).is_some());
        assert!(!snap.contains(BlockId::new(2)));
        assert_eq!(snap.entry(BlockId::new(1)).unwrap().block_order(), 5);
        assert!(snap.orders_are_unique());
    }
}
