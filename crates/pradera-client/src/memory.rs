//! In-memory block and flow store.
//!
//! Backs the `memory` CLI backend and every session test. Behaves like the
//! REST backend where it matters to the editor core: ids come from
//! per-table sequences, deleting a block removes its flow-block rows, and
//! flow names are validated.
//!
//! # Concurrency Model
//!
//! - DashMap per table for concurrent access
//! - atomics for id sequences
//! - parking_lot for the fault-injection budget

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use pradera_types::{
    Block, BlockCriteria, BlockDto, BlockId, BlockPatch, Book, BookId, BookRef, Flow, FlowBlock,
    FlowBlockCriteria, FlowBlockId, FlowId, NewBlock, NewFlow, NewFlowBlock, UserId,
};

use crate::store::{BlockStore, FlowStore, StoreError};

/// Thread-safe in-memory store implementing both store traits.
pub struct MemoryStore {
    blocks: DashMap<BlockId, Block>,
    flows: DashMap<FlowId, Flow>,
    flow_blocks: DashMap<FlowBlockId, FlowBlock>,
    books: DashMap<BookId, Book>,
    documents: DashMap<FlowId, serde_json::Value>,
    next_block: AtomicI64,
    next_flow: AtomicI64,
    next_flow_block: AtomicI64,
    next_book: AtomicI64,
    /// Calls left before the store starts failing; `None` = never fail.
    budget: Mutex<Option<usize>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            blocks: DashMap::new(),
            flows: DashMap::new(),
            flow_blocks: DashMap::new(),
            books: DashMap::new(),
            documents: DashMap::new(),
            next_block: AtomicI64::new(1),
            next_flow: AtomicI64::new(1),
            next_flow_block: AtomicI64::new(1),
            next_book: AtomicI64::new(1),
            budget: Mutex::new(None),
        }
    }

    // ── Fault injection ────────────────────────────────────────────────────

    /// Make every call fail with [`StoreError::Unavailable`] until reset.
    pub fn set_offline(&self, offline: bool) {
        *self.budget.lock() = offline.then_some(0);
    }

    /// Let `calls` more calls succeed, then go offline.
    pub fn fail_after(&self, calls: usize) {
        *self.budget.lock() = Some(calls);
    }

    fn gate(&self) -> Result<(), StoreError> {
        let mut budget = self.budget.lock();
        match budget.as_mut() {
            None => Ok(()),
            Some(0) => Err(StoreError::Unavailable("memory store is offline".into())),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
        }
    }

    // ── Seeding and inspection (synchronous, never gated) ──────────────────

    pub fn add_book(&self, title: impl Into<String>) -> Book {
        let id = BookId::new(self.next_book.fetch_add(1, Ordering::SeqCst));
        let book = Book {
            id,
            title: title.into(),
        };
        self.books.insert(id, book.clone());
        book
    }

    /// Insert a block directly, bypassing the gate.
    pub fn seed_block(&self, block: NewBlock) -> Block {
        let id = BlockId::new(self.next_block.fetch_add(1, Ordering::SeqCst));
        let mut stored = Block::new(id, block.block_type, block.content, Utc::now(), block.owner);
        stored.parent = block.parent;
        self.blocks.insert(id, stored.clone());
        stored
    }

    /// Insert a flow directly. The name is not validated.
    pub fn seed_flow(&self, flow: NewFlow) -> Flow {
        let id = FlowId::new(self.next_flow.fetch_add(1, Ordering::SeqCst));
        let stored = Flow {
            id,
            name: flow.name,
            owner: flow.owner,
            book: flow.book,
        };
        self.flows.insert(id, stored.clone());
        stored
    }

    /// Insert a flow-block row directly, without checking order uniqueness.
    pub fn seed_flow_block(&self, row: NewFlowBlock) -> FlowBlock {
        let id = FlowBlockId::new(self.next_flow_block.fetch_add(1, Ordering::SeqCst));
        let stored = FlowBlock {
            id,
            block_order: row.block_order,
            flow_id: row.flow_id,
            block_id: row.block_id,
        };
        self.flow_blocks.insert(id, stored);
        stored
    }

    /// Overwrite a stored record, for simulating foreign writers.
    pub fn put_block(&self, block: Block) {
        self.blocks.insert(block.id, block);
    }

    pub fn block(&self, id: BlockId) -> Option<Block> {
        self.blocks.get(&id).map(|b| b.value().clone())
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Rows of a flow in ascending `block_order`.
    pub fn rows(&self, flow: FlowId) -> Vec<FlowBlock> {
        let mut rows: Vec<FlowBlock> = self
            .flow_blocks
            .iter()
            .filter(|r| r.flow_id == flow)
            .map(|r| *r)
            .collect();
        rows.sort_by_key(|r| (r.block_order, r.id));
        rows
    }

    /// Block contents of a flow in ascending `block_order`.
    pub fn flow_text(&self, flow: FlowId) -> Vec<String> {
        self.rows(flow)
            .iter()
            .filter_map(|r| self.blocks.get(&r.block_id).map(|b| b.content().to_string()))
            .collect()
    }

    /// Last uploaded document state of a flow.
    pub fn document_state(&self, flow: FlowId) -> Option<serde_json::Value> {
        self.documents.get(&flow).map(|d| d.value().clone())
    }

    fn flows_of_block(&self, id: BlockId) -> Vec<FlowId> {
        self.flow_blocks
            .iter()
            .filter(|r| r.block_id == id)
            .map(|r| r.flow_id)
            .collect()
    }

    fn sorted_dtos(&self, mut blocks: Vec<Block>) -> Vec<BlockDto> {
        blocks.sort_by_key(|b| b.id);
        blocks.into_iter().map(BlockDto::from).collect()
    }

    fn matching(&self, criteria: &BlockCriteria) -> Vec<Block> {
        self.blocks
            .iter()
            .filter(|b| criteria.matches(b.value(), &self.flows_of_block(b.id)))
            .map(|b| b.value().clone())
            .collect()
    }

    fn book_ref(&self, book: Option<BookRef>) -> Result<Option<BookRef>, StoreError> {
        let Some(book) = book else { return Ok(None) };
        let stored = self
            .books
            .get(&book.id)
            .ok_or_else(|| StoreError::not_found("book", book.id))?;
        Ok(Some(BookRef {
            id: stored.id,
            title: Some(stored.title.clone()),
        }))
    }
}

fn invalid(err: impl std::fmt::Display) -> StoreError {
    StoreError::Rejected {
        status: 400,
        message: err.to_string(),
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn blocks_for_flow(&self, flow: FlowId) -> Result<Vec<BlockDto>, StoreError> {
        self.gate()?;
        let blocks = self
            .rows(flow)
            .iter()
            .filter_map(|r| self.blocks.get(&r.block_id).map(|b| b.value().clone()))
            .collect();
        Ok(self.sorted_dtos(blocks))
    }

    async fn get_block(&self, id: BlockId) -> Result<Block, StoreError> {
        self.gate()?;
        self.block(id).ok_or_else(|| StoreError::not_found("block", id))
    }

    async fn create_block(&self, block: &NewBlock) -> Result<Block, StoreError> {
        self.gate()?;
        if let Some(parent) = block.parent.filter(|p| !self.blocks.contains_key(p)) {
            return Err(StoreError::not_found("parent block", parent));
        }
        let stored = self.seed_block(block.clone());
        debug!("memory store created block {}", stored.id);
        Ok(stored)
    }

    async fn update_block(&self, block: &Block) -> Result<Block, StoreError> {
        self.gate()?;
        let mut entry = self
            .blocks
            .get_mut(&block.id)
            .ok_or_else(|| StoreError::not_found("block", block.id))?;
        let mut updated = block.clone();
        updated.set_content(block.content());
        *entry = updated.clone();
        Ok(updated)
    }

    async fn patch_block(&self, id: BlockId, patch: &BlockPatch) -> Result<Block, StoreError> {
        self.gate()?;
        let mut entry = self
            .blocks
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("block", id))?;
        patch.apply_to(&mut entry);
        Ok(entry.value().clone())
    }

    async fn delete_block(&self, id: BlockId) -> Result<(), StoreError> {
        self.gate()?;
        self.blocks
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("block", id))?;
        self.flow_blocks.retain(|_, r| r.block_id != id);
        Ok(())
    }

    async fn find_blocks(&self, criteria: &BlockCriteria) -> Result<Vec<BlockDto>, StoreError> {
        self.gate()?;
        Ok(self.sorted_dtos(self.matching(criteria)))
    }

    async fn count_blocks(&self, criteria: &BlockCriteria) -> Result<u64, StoreError> {
        self.gate()?;
        Ok(self.matching(criteria).len() as u64)
    }

    async fn search_blocks(&self, query: &str) -> Result<Vec<BlockDto>, StoreError> {
        self.gate()?;
        let needle = query.to_lowercase();
        let hits = self
            .blocks
            .iter()
            .filter(|b| b.content().to_lowercase().contains(&needle))
            .map(|b| b.value().clone())
            .collect();
        Ok(self.sorted_dtos(hits))
    }
}

#[async_trait]
impl FlowStore for MemoryStore {
    async fn flows_by_user(&self, user: UserId) -> Result<Vec<Flow>, StoreError> {
        self.gate()?;
        let mut flows: Vec<Flow> = self
            .flows
            .iter()
            .filter(|f| f.owned_by(user))
            .map(|f| f.value().clone())
            .collect();
        flows.sort_by_key(|f| f.id);
        Ok(flows)
    }

    async fn get_flow(&self, id: FlowId) -> Result<Flow, StoreError> {
        self.gate()?;
        self.flows
            .get(&id)
            .map(|f| f.value().clone())
            .ok_or_else(|| StoreError::not_found("flow", id))
    }

    async fn create_flow(&self, flow: &NewFlow) -> Result<Flow, StoreError> {
        self.gate()?;
        Flow::validate_name(&flow.name).map_err(invalid)?;
        let mut flow = flow.clone();
        flow.book = self.book_ref(flow.book)?;
        Ok(self.seed_flow(flow))
    }

    async fn update_flow(&self, flow: &Flow) -> Result<Flow, StoreError> {
        self.gate()?;
        Flow::validate_name(&flow.name).map_err(invalid)?;
        let book = self.book_ref(flow.book.clone())?;
        let mut entry = self
            .flows
            .get_mut(&flow.id)
            .ok_or_else(|| StoreError::not_found("flow", flow.id))?;
        *entry = Flow {
            book,
            ..flow.clone()
        };
        Ok(entry.value().clone())
    }

    async fn rename_flow(&self, id: FlowId, name: &str) -> Result<Flow, StoreError> {
        self.gate()?;
        Flow::validate_name(name).map_err(invalid)?;
        let mut entry = self
            .flows
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("flow", id))?;
        entry.name = name.to_string();
        Ok(entry.value().clone())
    }

    async fn delete_flow(&self, id: FlowId) -> Result<(), StoreError> {
        self.gate()?;
        self.flows
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("flow", id))?;
        self.flow_blocks.retain(|_, r| r.flow_id != id);
        self.documents.remove(&id);
        Ok(())
    }

    async fn flow_blocks(&self, criteria: &FlowBlockCriteria) -> Result<Vec<FlowBlock>, StoreError> {
        self.gate()?;
        let mut rows: Vec<FlowBlock> = self
            .flow_blocks
            .iter()
            .filter(|r| criteria.matches(r.value()))
            .map(|r| *r)
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    async fn create_flow_block(&self, row: &NewFlowBlock) -> Result<FlowBlock, StoreError> {
        self.gate()?;
        if !self.flows.contains_key(&row.flow_id) {
            return Err(StoreError::not_found("flow", row.flow_id));
        }
        if !self.blocks.contains_key(&row.block_id) {
            return Err(StoreError::not_found("block", row.block_id));
        }
        Ok(self.seed_flow_block(*row))
    }

    async fn reorder_flow_block(
        &self,
        id: FlowBlockId,
        block_order: i64,
    ) -> Result<FlowBlock, StoreError> {
        self.gate()?;
        let mut entry = self
            .flow_blocks
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("flow-block", id))?;
        entry.block_order = block_order;
        Ok(*entry)
    }

    async fn delete_flow_block(&self, id: FlowBlockId) -> Result<(), StoreError> {
        self.gate()?;
        self.flow_blocks
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("flow-block", id))
    }

    async fn upload_document_state(
        &self,
        flow: FlowId,
        state: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.gate()?;
        if !self.flows.contains_key(&flow) {
            return Err(StoreError::not_found("flow", flow));
        }
        self.documents.insert(flow, state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pradera_types::{BlockType, UserRef};

    fn owner() -> UserRef {
        UserRef::new(UserId::new(1)).with_login("admin")
    }

    #[tokio::test]
    async fn test_deleting_block_removes_its_rows() {
        let store = MemoryStore::new();
        let flow = store.seed_flow(NewFlow::new("first").unwrap().with_owner(owner()));
        let block = store
            .create_block(&NewBlock::new(BlockType::Paragraph, "p", owner()))
            .await
            .unwrap();
        store
            .create_flow_block(&NewFlowBlock {
                flow_id: flow.id,
                block_id: block.id,
                block_order: 0,
            })
            .await
            .unwrap();
        assert_eq!(store.rows(flow.id).len(), 1);

        store.delete_block(block.id).await.unwrap();
        assert!(store.rows(flow.id).is_empty());
        assert!(matches!(
            store.get_block(block.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_flow_name_is_validated() {
        let store = MemoryStore::new();
        let flow = NewFlow {
            name: "ab".into(),
            owner: None,
            book: None,
        };
        let err = store.create_flow(&flow).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_flow_book_must_exist() {
        let store = MemoryStore::new();
        let book = store.add_book("Saga");
        let flow = store.seed_flow(NewFlow::new("draft").unwrap());

        let moved = store
            .update_flow(&flow.clone().with_book(book.id))
            .await
            .unwrap();
        let linked = moved.book.unwrap();
        assert_eq!(linked.id, book.id);
        assert_eq!(linked.title.as_deref(), Some("Saga"));

        let err = store
            .update_flow(&flow.with_book(BookId::new(99)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_criteria_and_search() {
        let store = MemoryStore::new();
        let flow = store.seed_flow(NewFlow::new("flow").unwrap().with_owner(owner()));
        let a = store.seed_block(NewBlock::new(BlockType::Title, "Hello World", owner()));
        store.seed_block(NewBlock::new(BlockType::Paragraph, "hello again", owner()));
        store.seed_flow_block(NewFlowBlock {
            flow_id: flow.id,
            block_id: a.id,
            block_order: 0,
        });

        let in_flow = BlockCriteria::new().in_flow(flow.id);
        assert_eq!(store.count_blocks(&in_flow).await.unwrap(), 1);
        let titles = BlockCriteria::new().with_type(BlockType::Title);
        assert_eq!(store.find_blocks(&titles).await.unwrap()[0].id, Some(a.id));
        assert_eq!(store.search_blocks("HELLO").await.unwrap().len(), 2);
        assert_eq!(store.flows_by_user(UserId::new(1)).await.unwrap().len(), 1);
        assert!(store.flows_by_user(UserId::new(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_after_budget() {
        let store = MemoryStore::new();
        store.fail_after(1);
        assert!(store.search_blocks("x").await.is_ok());
        let err = store.search_blocks("x").await.unwrap_err();
        assert!(err.is_transient());
        store.set_offline(false);
        assert!(store.search_blocks("x").await.is_ok());
    }

    #[tokio::test]
    async fn test_patch_recomputes_hash() {
        let store = MemoryStore::new();
        let block = store.seed_block(NewBlock::new(BlockType::Paragraph, "x", owner()));
        let patched = store
            .patch_block(block.id, &BlockPatch::default().content("y"))
            .await
            .unwrap();
        assert_eq!(patched.content(), "y");
        assert!(patched.verify_hash());
        assert_ne!(patched.hash(), block.hash());
    }
}
