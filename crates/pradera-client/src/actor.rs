//! Async driver for an [`EditorSession`].
//!
//! A tokio task owns the session. The `Send + Sync + Clone` [`SessionHandle`]
//! sends commands over mpsc and awaits oneshot replies; store work runs in
//! spawned tasks that report back over a second channel, so the actor keeps
//! accepting change events while a batch is being applied.
//!
//! ```text
//!   SessionHandle (Clone)      mpsc      SessionActor (tokio task)
//!   ┌─────────────────────┐  ───────▶  ┌──────────────────────────────┐
//!   │ .change(doc)        │            │ EditorSession                │
//!   │ .save() / .close()  │  ◀───────  │ debounce timer               │  spawn
//!   │ .subscribe()        │  oneshot   │ one store task at a time ────┼───────▶ apply / load
//!   └─────────────────────┘            └──────────────────────────────┘
//!            ▲                                   │ broadcast
//!            └──────────── SessionEvent ─────────┘
//! ```

use std::future::pending;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use pradera_doc::{Document, FlowSnapshot};
use pradera_types::{BlockId, FlowId, UserRef};

use crate::apply::{ApplyFailure, ApplyReport, Conflict, apply_batch};
use crate::config::SessionConfig;
use crate::loader::{SnapshotError, load_snapshot};
use crate::session::{EditorSession, ReconcileJob, SessionError, SessionState, SessionStatus};
use crate::store::Stores;

/// Capacity of the event channel; slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 64;

// ============================================================================
// Events
// ============================================================================

/// Broadcast to every subscriber of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A snapshot was installed (initial load or reload).
    Loaded { flow_id: FlowId, blocks: usize },
    Reconciled {
        generation: u64,
        applied: usize,
        created: usize,
    },
    /// Updates skipped because the stored block changed underneath.
    Conflicts(Vec<Conflict>),
    /// Ids the editing surface should write into its nodes.
    IdsAssigned(Vec<(usize, BlockId)>),
    Failed { error: String },
}

// ============================================================================
// Commands (internal)
// ============================================================================

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum SessionCommand {
    Change { document: Document, reply: Reply<()> },
    Save { reply: Reply<()> },
    Status { reply: oneshot::Sender<SessionStatus> },
    Document { reply: oneshot::Sender<Document> },
    Close { reply: Reply<()> },
}

/// Completion of a spawned store task.
enum TaskDone {
    Applied(Result<ApplyReport, ApplyFailure>),
    Loaded(Result<FlowSnapshot, SnapshotError>),
}

/// The store task currently running.
enum Task {
    Apply(ReconcileJob),
    Load,
}

// ============================================================================
// SessionHandle (Send + Sync public API)
// ============================================================================

/// Handle to a running session. Cheap to clone.
///
/// When the last handle is dropped the session flushes what it can and
/// stops; use [`SessionHandle::close`] to learn whether the flush worked.
#[derive(Clone)]
pub struct SessionHandle {
    flow_id: FlowId,
    tx: mpsc::UnboundedSender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Report the full current document. Saving happens after the debounce.
    pub async fn change(&self, document: Document) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Change { document, reply })
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Save now and wait until every edit made so far is in the store.
    pub async fn save(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Save { reply })
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }

    pub async fn status(&self) -> Result<SessionStatus, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Status { reply })
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// The newest document, saved or not, with every id known so far.
    pub async fn document(&self) -> Result<Document, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Document { reply })
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// Flush pending edits and stop the session.
    ///
    /// Fails with [`SessionError::FlushFailed`] if edits could not be saved.
    pub async fn close(self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Close { reply })
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("flow_id", &self.flow_id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SessionActor (owns the EditorSession)
// ============================================================================

struct SessionActor {
    session: EditorSession,
    stores: Stores,
    config: SessionConfig,
    events: broadcast::Sender<SessionEvent>,
    done_tx: mpsc::UnboundedSender<TaskDone>,
    task: Option<Task>,
    /// When the debounce expires; `None` when no save is scheduled.
    deadline: Option<Instant>,
    savers: Vec<Reply<()>>,
    /// Set by `close` or when every handle is gone.
    closing: bool,
    closer: Option<Reply<()>>,
    stopped: bool,
}

impl SessionActor {
    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Process commands until closed.
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<SessionCommand>,
        mut done_rx: mpsc::UnboundedReceiver<TaskDone>,
    ) {
        self.initial_load().await;
        let mut detached = false;

        while !self.stopped {
            let deadline = self.deadline;
            tokio::select! {
                cmd = rx.recv(), if !detached => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        debug!("flow {}: all handles dropped", self.session.flow_id());
                        detached = true;
                        self.begin_close(None);
                    }
                },
                Some(done) = done_rx.recv() => self.handle_done(done),
                _ = async move {
                    match deadline {
                        Some(at) => sleep_until(at).await,
                        None => pending::<()>().await,
                    }
                } => {
                    self.deadline = None;
                    self.kick();
                }
            }
        }
        debug!("session for flow {} stopped", self.session.flow_id());
    }

    async fn initial_load(&mut self) {
        if self.session.begin_load().is_err() {
            return;
        }
        let result = load_snapshot(
            self.stores.blocks.as_ref(),
            self.stores.flows.as_ref(),
            self.session.flow_id(),
        )
        .await;
        self.loaded(result);
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Change { document, reply } => {
                let result = self.session.on_change(document);
                if result.is_ok() {
                    self.schedule();
                }
                let _ = reply.send(result);
            }
            SessionCommand::Save { reply } => {
                if self.is_clean() {
                    let _ = reply.send(Ok(()));
                } else {
                    self.savers.push(reply);
                    self.deadline = None;
                    self.kick();
                }
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(self.session.status());
            }
            SessionCommand::Document { reply } => {
                let _ = reply.send(self.session.current_document().clone());
            }
            SessionCommand::Close { reply } => self.begin_close(Some(reply)),
        }
    }

    fn is_clean(&self) -> bool {
        self.task.is_none()
            && !self.session.needs_flush()
            && self.session.state() != SessionState::Uninitialized
    }

    /// Restart the debounce window.
    fn schedule(&mut self) {
        if self.closing || !self.savers.is_empty() {
            self.kick();
            return;
        }
        let debounce = self.config.debounce();
        if debounce.is_zero() {
            self.kick();
        } else {
            self.deadline = Some(Instant::now() + debounce);
        }
    }

    fn begin_close(&mut self, reply: Option<Reply<()>>) {
        info!("closing session for flow {}", self.session.flow_id());
        self.closing = true;
        self.closer = reply;
        self.deadline = None;
        self.kick();
    }

    /// Start the next store task if one is needed and none is running.
    fn kick(&mut self) {
        if self.task.is_some() {
            return;
        }
        if self.session.state() == SessionState::Uninitialized
            || self.session.needs_reload()
        {
            if self.closing && self.session.state() == SessionState::Uninitialized {
                // nothing was ever loaded, so nothing can be pending
                self.settle();
                return;
            }
            self.spawn_load();
            return;
        }
        match self.session.begin_reconcile() {
            Ok(Some(job)) => self.spawn_apply(job),
            Ok(None) => self.settle(),
            // a rejected document is reported; the next save reloads first
            Err(e) if self.closing && self.session.needs_reload() => {
                debug!(
                    "flow {}: reloading before the final save: {}",
                    self.session.flow_id(),
                    e
                );
                self.spawn_load();
            }
            Err(e) => self.fail(e),
        }
    }

    fn spawn_load(&mut self) {
        if self.session.state() == SessionState::Uninitialized && self.session.begin_load().is_err() {
            return;
        }
        self.task = Some(Task::Load);
        let stores = self.stores.clone();
        let flow_id = self.session.flow_id();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = load_snapshot(stores.blocks.as_ref(), stores.flows.as_ref(), flow_id).await;
            let _ = done.send(TaskDone::Loaded(result));
        });
    }

    fn spawn_apply(&mut self, job: ReconcileJob) {
        let stores = self.stores.clone();
        let upload = self.config.upload_document_state;
        let done = self.done_tx.clone();
        let work = job.clone();
        self.task = Some(Task::Apply(job));

        tokio::spawn(async move {
            let result = apply_batch(
                stores.blocks.as_ref(),
                stores.flows.as_ref(),
                &work.batch,
                &work.snapshot,
            )
            .await;
            if let (true, Ok(report)) = (upload, &result) {
                upload_document(&stores, &work, report).await;
            }
            let _ = done.send(TaskDone::Applied(result));
        });
    }

    fn handle_done(&mut self, done: TaskDone) {
        match (self.task.take(), done) {
            (Some(Task::Apply(job)), TaskDone::Applied(result)) => self.applied(&job, result),
            (Some(Task::Load), TaskDone::Loaded(result)) => self.loaded(result),
            (task, _) => {
                warn!("flow {}: unexpected task completion", self.session.flow_id());
                self.task = task;
            }
        }
    }

    fn loaded(&mut self, result: Result<FlowSnapshot, SnapshotError>) {
        let flow_id = self.session.flow_id();
        match result {
            Ok(snapshot) => {
                let blocks = snapshot.len();
                if self.session.state() == SessionState::Loading {
                    if let Err(e) = self.session.finish_load(snapshot) {
                        self.fail(e);
                        return;
                    }
                } else {
                    self.session.reload(snapshot);
                }
                self.emit(SessionEvent::Loaded { flow_id, blocks });
                self.kick_if_waiting();
            }
            Err(e) => {
                if self.session.state() == SessionState::Loading {
                    self.session.fail_load(&e);
                }
                self.fail(e.into());
            }
        }
    }

    fn applied(&mut self, job: &ReconcileJob, result: Result<ApplyReport, ApplyFailure>) {
        match self.session.finish_reconcile(job, result) {
            Ok(done) => {
                debug!(
                    "flow {}: generation {} applied {} mutations",
                    self.session.flow_id(),
                    done.generation,
                    done.applied
                );
                self.emit(SessionEvent::Reconciled {
                    generation: done.generation,
                    applied: done.applied,
                    created: done.created,
                });
                if !done.assigned.is_empty() {
                    self.emit(SessionEvent::IdsAssigned(done.assigned));
                }
                if !done.conflicts.is_empty() {
                    warn!(
                        "flow {}: {} blocks changed underneath, edits skipped",
                        self.session.flow_id(),
                        done.conflicts.len()
                    );
                    self.emit(SessionEvent::Conflicts(done.conflicts));
                }
                self.kick_if_waiting();
            }
            Err(e) => self.fail(e),
        }
    }

    /// Continue right away when someone is waiting on the result, or when
    /// the debounce already fired while the last task ran.
    fn kick_if_waiting(&mut self) {
        let dirty = self.session.state() == SessionState::Dirty;
        if self.closing || !self.savers.is_empty() || (dirty && self.deadline.is_none()) {
            self.kick();
        }
    }

    /// Nothing left to do: release waiters, stop if closing.
    fn settle(&mut self) {
        if !self.is_clean() && self.session.state() != SessionState::Uninitialized {
            return;
        }
        for saver in self.savers.drain(..) {
            let _ = saver.send(Ok(()));
        }
        if self.closing {
            if let Some(closer) = self.closer.take() {
                let _ = closer.send(Ok(()));
            }
            self.stopped = true;
        }
    }

    fn fail(&mut self, e: SessionError) {
        let flow_id = self.session.flow_id();
        warn!("flow {}: {}", flow_id, e);
        self.emit(SessionEvent::Failed {
            error: e.to_string(),
        });
        for saver in self.savers.drain(..) {
            let _ = saver.send(Err(e.clone()));
        }
        if self.closing {
            if self.session.needs_flush() {
                error!("flow {}: closing with unsaved edits: {}", flow_id, e);
            }
            if let Some(closer) = self.closer.take() {
                let _ = closer.send(Err(SessionError::FlushFailed(Box::new(e))));
            }
            self.stopped = true;
        }
    }
}

/// Push the reconciled document to the flow's document state.
async fn upload_document(stores: &Stores, job: &ReconcileJob, report: &ApplyReport) {
    let flow_id = job.batch.flow_id();
    let value = match job.document_with_ids(report).to_value() {
        Ok(value) => value,
        Err(e) => {
            warn!("flow {}: cannot encode document state: {}", flow_id, e);
            return;
        }
    };
    if let Err(e) = stores.flows.upload_document_state(flow_id, &value).await {
        warn!("flow {}: document state upload failed: {}", flow_id, e);
    }
}

// ============================================================================
// Public spawn function
// ============================================================================

/// Spawn a session for `flow_id` on the current tokio runtime.
///
/// The flow is loaded before the first command is processed, so commands
/// sent right away observe the loaded document.
pub fn spawn_session(
    config: &SessionConfig,
    stores: Stores,
    user: UserRef,
    flow_id: FlowId,
) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let actor = SessionActor {
        session: EditorSession::new(flow_id, user, config.reconcile_options()),
        stores,
        config: *config,
        events: events.clone(),
        done_tx,
        task: None,
        deadline: None,
        savers: Vec::new(),
        closing: false,
        closer: None,
        stopped: false,
    };
    tokio::spawn(actor.run(rx, done_rx));
    SessionHandle {
        flow_id,
        tx,
        events,
    }
}
