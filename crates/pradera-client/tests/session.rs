//! End-to-end tests for editor sessions against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, broadcast};

use pradera_client::{
    BlockStore, MemoryStore, SessionConfig, SessionError, SessionEvent, SessionHandle,
    SessionState, StoreError, Stores, spawn_session,
};
use pradera_doc::{DocError, Document, Node};
use pradera_types::{
    Block, BlockCriteria, BlockDto, BlockId, BlockPatch, BlockType, FlowId, NewBlock, NewFlow,
    NewFlowBlock, UserId, UserRef,
};

// ============================================================================
// Fixtures
// ============================================================================

fn user() -> UserRef {
    UserRef::new(UserId::new(1))
}

fn seed(store: &MemoryStore, texts: &[&str]) -> FlowId {
    let flow = store.seed_flow(NewFlow::new("novel").unwrap().with_owner(user()));
    for (order, text) in texts.iter().enumerate() {
        let block = store.seed_block(NewBlock::new(BlockType::Paragraph, *text, user()));
        store.seed_flow_block(NewFlowBlock {
            flow_id: flow.id,
            block_id: block.id,
            block_order: order as i64,
        });
    }
    flow.id
}

fn config(debounce_ms: u64) -> SessionConfig {
    SessionConfig {
        debounce_ms,
        ..SessionConfig::default()
    }
}

fn with_paragraphs(base: &Document, texts: &[&str]) -> Document {
    let mut doc = base.clone();
    doc.content.extend(texts.iter().map(|t| Node::paragraph(t)));
    doc
}

async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event channel closed")
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn reconciled_count(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Reconciled { .. }))
        .count()
}

/// Block store whose creates wait for a permit, to hold a batch in flight.
struct GatedBlocks {
    inner: Arc<MemoryStore>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl BlockStore for GatedBlocks {
    async fn blocks_for_flow(&self, flow: FlowId) -> Result<Vec<BlockDto>, StoreError> {
        self.inner.blocks_for_flow(flow).await
    }

    async fn get_block(&self, id: BlockId) -> Result<Block, StoreError> {
        self.inner.get_block(id).await
    }

    async fn create_block(&self, block: &NewBlock) -> Result<Block, StoreError> {
        self.gate
            .acquire()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .forget();
        self.inner.create_block(block).await
    }

    async fn update_block(&self, block: &Block) -> Result<Block, StoreError> {
        self.inner.update_block(block).await
    }

    async fn patch_block(&self, id: BlockId, patch: &BlockPatch) -> Result<Block, StoreError> {
        self.inner.patch_block(id, patch).await
    }

    async fn delete_block(&self, id: BlockId) -> Result<(), StoreError> {
        self.inner.delete_block(id).await
    }

    async fn find_blocks(&self, criteria: &BlockCriteria) -> Result<Vec<BlockDto>, StoreError> {
        self.inner.find_blocks(criteria).await
    }

    async fn count_blocks(&self, criteria: &BlockCriteria) -> Result<u64, StoreError> {
        self.inner.count_blocks(criteria).await
    }

    async fn search_blocks(&self, query: &str) -> Result<Vec<BlockDto>, StoreError> {
        self.inner.search_blocks(query).await
    }
}

fn open(store: &Arc<MemoryStore>, flow: FlowId, config: SessionConfig) -> SessionHandle {
    spawn_session(&config, Stores::new(store.clone()), user(), flow)
}

// ============================================================================
// Saving
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_change_is_saved_after_debounce() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a"]);
    let handle = open(&store, flow, config(200));
    let mut events = handle.subscribe();

    let base = handle.document().await.unwrap();
    assert_eq!(base.len(), 1);
    handle.change(with_paragraphs(&base, &["b"])).await.unwrap();
    assert_eq!(store.flow_text(flow), vec!["a"]);

    loop {
        if let SessionEvent::Reconciled { created, .. } = next_event(&mut events).await {
            assert_eq!(created, 1);
            break;
        }
    }
    assert_eq!(store.flow_text(flow), vec!["a", "b"]);

    let doc = handle.document().await.unwrap();
    assert_eq!(doc.block_ids().len(), 2);
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::Ready);
    assert_eq!(status.generation, 1);
}

#[tokio::test]
async fn test_save_with_nothing_pending_returns_at_once() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a"]);
    let handle = open(&store, flow, config(10_000));
    handle.save().await.unwrap();
    assert_eq!(handle.status().await.unwrap().generation, 0);
}

#[tokio::test]
async fn test_changes_in_flight_are_coalesced() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a"]);
    let gate = Arc::new(Semaphore::new(0));
    let stores = Stores::split(
        Arc::new(GatedBlocks {
            inner: store.clone(),
            gate: gate.clone(),
        }),
        store.clone(),
    );
    let handle = spawn_session(&config(0), stores, user(), flow);
    let mut events = handle.subscribe();
    let base = handle.document().await.unwrap();

    // first pass blocks on its create
    handle.change(with_paragraphs(&base, &["one"])).await.unwrap();
    handle
        .change(with_paragraphs(&base, &["one", "two"]))
        .await
        .unwrap();
    handle
        .change(with_paragraphs(&base, &["one", "two", "three"]))
        .await
        .unwrap();
    assert_eq!(
        handle.status().await.unwrap().state,
        SessionState::Reconciling
    );

    gate.add_permits(16);
    handle.save().await.unwrap();

    assert_eq!(reconciled_count(&drain(&mut events)), 2);
    assert_eq!(store.flow_text(flow), vec!["a", "one", "two", "three"]);
    assert_eq!(store.block_count(), 4);
    assert_eq!(handle.document().await.unwrap().block_ids().len(), 4);
}

#[tokio::test]
async fn test_ids_are_broadcast() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a"]);
    let handle = open(&store, flow, config(0));
    let mut events = handle.subscribe();
    let base = handle.document().await.unwrap();

    handle.change(with_paragraphs(&base, &["b"])).await.unwrap();
    handle.save().await.unwrap();

    let assigned = drain(&mut events).into_iter().find_map(|e| match e {
        SessionEvent::IdsAssigned(ids) => Some(ids),
        _ => None,
    });
    let rows = store.rows(flow);
    assert_eq!(assigned, Some(vec![(1, rows[1].block_id)]));
}

#[tokio::test]
async fn test_upload_document_state() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a"]);
    let config = SessionConfig {
        upload_document_state: true,
        ..config(0)
    };
    let handle = open(&store, flow, config);
    let base = handle.document().await.unwrap();

    handle.change(with_paragraphs(&base, &["b"])).await.unwrap();
    handle.save().await.unwrap();

    let state = store.document_state(flow).expect("document state uploaded");
    let doc = Document::from_value(state).unwrap();
    assert_eq!(doc.len(), 2);
    assert_eq!(doc.block_ids().len(), 2);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_save_keeps_edits_and_retries() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a"]);
    let handle = open(&store, flow, config(10_000));
    let base = handle.document().await.unwrap();

    // create x, bind x, create y; binding y fails
    store.fail_after(3);
    handle
        .change(with_paragraphs(&base, &["x", "y"]))
        .await
        .unwrap();
    let err = handle.save().await.unwrap_err();
    assert!(matches!(err, SessionError::Apply(_)));

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::Dirty);
    assert!(status.has_pending);
    assert!(status.last_error.is_some());
    assert_eq!(store.flow_text(flow), vec!["a", "x"]);

    store.set_offline(false);
    handle.save().await.unwrap();
    assert_eq!(store.flow_text(flow), vec!["a", "x", "y"]);
    assert_eq!(store.rows(flow).len(), 3);
    assert_eq!(handle.status().await.unwrap().state, SessionState::Ready);
}

#[tokio::test]
async fn test_conflicting_update_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a"]);
    let handle = open(&store, flow, config(0));
    let mut events = handle.subscribe();
    let base = handle.document().await.unwrap();
    let id = base.block_ids()[0];

    store
        .patch_block(id, &BlockPatch::default().content("theirs"))
        .await
        .unwrap();

    let mine = Document::new(vec![Node::paragraph("mine").with_block_id(id)]);
    handle.change(mine).await.unwrap();
    handle.save().await.unwrap();

    let conflicts = drain(&mut events).into_iter().find_map(|e| match e {
        SessionEvent::Conflicts(c) => Some(c),
        _ => None,
    });
    let conflicts = conflicts.expect("conflict event");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].block_id, id);
    assert_eq!(store.flow_text(flow), vec!["theirs"]);
}

#[tokio::test]
async fn test_conflicted_block_is_not_overwritten_by_later_saves() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a", "b"]);
    let handle = open(&store, flow, config(10_000));
    let mut events = handle.subscribe();
    let ids = handle.document().await.unwrap().block_ids();
    let (a, b) = (ids[0], ids[1]);
    let edit = |first: &str, second: &str| {
        Document::new(vec![
            Node::paragraph(first).with_block_id(a),
            Node::paragraph(second).with_block_id(b),
        ])
    };

    store
        .patch_block(a, &BlockPatch::default().content("theirs"))
        .await
        .unwrap();
    handle.change(edit("mine", "b")).await.unwrap();
    handle.save().await.unwrap();
    assert_eq!(store.flow_text(flow), vec!["theirs", "b"]);
    assert_eq!(handle.status().await.unwrap().conflicted, vec![a]);
    drain(&mut events);

    // editing another node leaves the conflicted one alone
    handle.change(edit("mine", "b!")).await.unwrap();
    handle.save().await.unwrap();
    assert_eq!(store.flow_text(flow), vec!["theirs", "b!"]);
    let events = drain(&mut events);
    assert_eq!(reconciled_count(&events), 1);
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::Conflicts(_))));
    assert_eq!(handle.status().await.unwrap().conflicted, vec![a]);

    // editing the conflicted node again is a deliberate overwrite
    handle.change(edit("mine, again", "b!")).await.unwrap();
    handle.save().await.unwrap();
    assert_eq!(store.flow_text(flow), vec!["mine, again", "b!"]);
    assert!(handle.status().await.unwrap().conflicted.is_empty());
}

#[tokio::test]
async fn test_dangling_reference_changes_nothing_until_reload() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a", "b"]);
    let elsewhere = seed(&store, &["elsewhere"]);
    let foreign = store.rows(elsewhere)[0].block_id;
    let handle = open(&store, flow, config(10_000));
    let base = handle.document().await.unwrap();

    let mut doc = base.clone();
    doc.content.push(Node::paragraph("stray").with_block_id(foreign));
    doc.content.push(Node::paragraph("new"));
    handle.change(doc).await.unwrap();

    let err = handle.save().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Document(DocError::DanglingBlockReference { .. })
    ));
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::Dirty);
    assert!(status.needs_reload);
    assert!(status.has_pending);
    // not a single mutation reached the store
    assert_eq!(store.flow_text(flow), vec!["a", "b"]);
    assert_eq!(store.rows(flow).len(), 2);
    assert_eq!(store.block_count(), 3);

    // the next save reloads, drops the foreign id and creates the node
    handle.save().await.unwrap();
    assert_eq!(store.flow_text(flow), vec!["a", "b", "stray", "new"]);
    assert_eq!(store.block_count(), 5);
    assert_eq!(store.flow_text(elsewhere), vec!["elsewhere"]);
    let saved = handle.document().await.unwrap().block_ids();
    assert_eq!(saved.len(), 4);
    assert!(!saved.contains(&foreign));
    assert!(!handle.status().await.unwrap().needs_reload);
}

#[tokio::test]
async fn test_unknown_flow_fails_to_load() {
    let store = Arc::new(MemoryStore::new());
    let handle = open(&store, FlowId::new(99), config(0));
    let err = handle.change(Document::default()).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));
    assert_eq!(
        handle.status().await.unwrap().state,
        SessionState::Uninitialized
    );
}

// ============================================================================
// Closing
// ============================================================================

#[tokio::test]
async fn test_close_flushes_pending_edits() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a"]);
    let handle = open(&store, flow, config(60_000));
    let base = handle.document().await.unwrap();

    handle.change(with_paragraphs(&base, &["b"])).await.unwrap();
    assert_eq!(store.flow_text(flow), vec!["a"]);
    handle.close().await.unwrap();
    assert_eq!(store.flow_text(flow), vec!["a", "b"]);
}

#[tokio::test]
async fn test_close_reports_failed_flush() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a"]);
    let handle = open(&store, flow, config(60_000));
    let other = handle.clone();
    let base = handle.document().await.unwrap();

    handle.change(with_paragraphs(&base, &["b"])).await.unwrap();
    store.set_offline(true);
    let err = handle.close().await.unwrap_err();
    assert!(matches!(err, SessionError::FlushFailed(_)));

    // the session is gone
    assert!(matches!(other.status().await, Err(SessionError::Shutdown)));
}

#[tokio::test]
async fn test_dropping_handles_flushes() {
    let store = Arc::new(MemoryStore::new());
    let flow = seed(&store, &["a"]);
    let handle = open(&store, flow, config(60_000));
    let base = handle.document().await.unwrap();

    handle.change(with_paragraphs(&base, &["b"])).await.unwrap();
    drop(handle);

    for _ in 0..200 {
        if store.flow_text(flow).len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(store.flow_text(flow), vec!["a", "b"]);
}
