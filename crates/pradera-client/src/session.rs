//! Editor session core: one live document for one (user, flow) pair.
//!
//! This module is the state machine only. It does no I/O and owns no timers,
//! so every transition is unit-testable; [`crate::actor`] drives it from a
//! tokio task.
//!
//! # State Machine
//!
//! ```text
//! Uninitialized ──begin_load──▶ Loading ──finish_load──▶ Ready
//!       ▲                          │                      │ on_change
//!       └────────fail_load─────────┘                      ▼
//!                       finish_reconcile(ok, no pending)  Dirty ◀──┐
//!                 Ready ◀──────────────────────── Reconciling      │
//!                                                    │   begin_    │
//!                                                    │   reconcile │
//!                                                    └─────────────┘
//!                               finish_reconcile(err) or pending edits
//! ```
//!
//! # Coalescing
//!
//! At most one reconciliation is in flight. Changes that arrive meanwhile
//! replace a single pending document, so the next pass always works from the
//! latest edit and batches never interleave.
//!
//! # Conflicts
//!
//! When the store rejects an update because another writer changed the
//! block, the snapshot takes the store's version but the editing surface
//! still shows the rejected text. Later passes hold the update for that
//! block until its node is edited again, so an unrelated edit never
//! silently replays the rejected text over the other writer's.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use pradera_doc::{DocError, Document, FlowSnapshot, MutationBatch, ReconcileOptions, reconcile};
use pradera_types::{BlockId, BlockType, FlowId, UserRef};

use crate::apply::{ApplyError, ApplyFailure, ApplyReport, Conflict};
use crate::loader::SnapshotError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
    Dirty,
    Reconciling,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The operation needs a loaded flow.
    #[error("session for flow {flow_id} is {state:?}, cannot {action}")]
    InvalidState {
        flow_id: FlowId,
        state: SessionState,
        action: &'static str,
    },

    #[error(transparent)]
    Document(#[from] DocError),

    #[error("could not load flow: {0}")]
    Load(#[from] SnapshotError),

    #[error("could not apply changes: {0}")]
    Apply(#[from] ApplyError),

    /// Pending edits could not be saved before the session closed.
    #[error("unsaved edits were not flushed: {0}")]
    FlushFailed(Box<SessionError>),

    #[error("session shut down")]
    Shutdown,
}

/// One reconciliation pass, handed to whoever performs the I/O.
#[derive(Clone, Debug)]
pub struct ReconcileJob {
    pub generation: u64,
    pub snapshot: FlowSnapshot,
    pub document: Document,
    pub batch: MutationBatch,
}

impl ReconcileJob {
    /// The reconciled document with created ids written in.
    pub fn document_with_ids(&self, report: &ApplyReport) -> Document {
        let mut document = self.document.clone();
        document.assign_ids(
            self.batch
                .created_positions()
                .into_iter()
                .zip(report.bound.iter().copied()),
        );
        document
    }
}

/// Result of a successful pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciled {
    pub generation: u64,
    pub applied: usize,
    pub created: usize,
    pub conflicts: Vec<Conflict>,
    /// Ids written into the document the editing surface now shows:
    /// the pending document if edits are queued, else the reconciled one.
    pub assigned: Vec<(usize, BlockId)>,
}

/// Snapshot of session bookkeeping for status queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub flow_id: FlowId,
    pub state: SessionState,
    pub generation: u64,
    pub has_pending: bool,
    pub needs_reload: bool,
    /// Blocks whose last update lost to another writer, in id order.
    pub conflicted: Vec<BlockId>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub struct EditorSession {
    flow_id: FlowId,
    user: UserRef,
    options: ReconcileOptions,
    state: SessionState,
    snapshot: Option<FlowSnapshot>,
    /// Last document known to match the store.
    document: Document,
    /// Document currently being reconciled.
    in_flight: Option<Document>,
    /// Latest edit not yet handed to a reconciliation.
    pending: Option<Document>,
    /// Node versions the store rejected, by block.
    conflicted: HashMap<BlockId, (BlockType, String)>,
    needs_reload: bool,
    generation: u64,
    last_error: Option<String>,
}

impl EditorSession {
    pub fn new(flow_id: FlowId, user: UserRef, options: ReconcileOptions) -> Self {
        Self {
            flow_id,
            user,
            options,
            state: SessionState::Uninitialized,
            snapshot: None,
            document: Document::default(),
            in_flight: None,
            pending: None,
            conflicted: HashMap::new(),
            needs_reload: false,
            generation: 0,
            last_error: None,
        }
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn snapshot(&self) -> Option<&FlowSnapshot> {
        self.snapshot.as_ref()
    }

    /// Last document known to match the store.
    pub fn reconciled_document(&self) -> &Document {
        &self.document
    }

    /// What the editing surface should show: the newest edit, whether or not
    /// it has been saved.
    pub fn current_document(&self) -> &Document {
        self.pending
            .as_ref()
            .or(self.in_flight.as_ref())
            .unwrap_or(&self.document)
    }

    pub fn needs_reload(&self) -> bool {
        self.needs_reload
    }

    /// Whether there are edits the store has not seen yet.
    pub fn needs_flush(&self) -> bool {
        self.pending.is_some() || self.in_flight.is_some()
    }

    pub fn status(&self) -> SessionStatus {
        let mut conflicted: Vec<_> = self.conflicted.keys().copied().collect();
        conflicted.sort();
        SessionStatus {
            flow_id: self.flow_id,
            state: self.state,
            generation: self.generation,
            has_pending: self.pending.is_some(),
            needs_reload: self.needs_reload,
            conflicted,
            last_error: self.last_error.clone(),
        }
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidState {
            flow_id: self.flow_id,
            state: self.state,
            action,
        }
    }

    // ── Loading ────────────────────────────────────────────────────────────

    pub fn begin_load(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Uninitialized {
            return Err(self.invalid("load"));
        }
        self.state = SessionState::Loading;
        Ok(())
    }

    /// Install the initial snapshot and project it.
    pub fn finish_load(&mut self, snapshot: FlowSnapshot) -> Result<&Document, SessionError> {
        if self.state != SessionState::Loading {
            return Err(self.invalid("finish loading"));
        }
        self.document = snapshot.project();
        info!(
            "session for flow {} ready with {} blocks",
            self.flow_id,
            self.document.len()
        );
        self.snapshot = Some(snapshot);
        self.state = SessionState::Ready;
        self.last_error = None;
        Ok(&self.document)
    }

    pub fn fail_load(&mut self, error: &SnapshotError) {
        warn!("loading flow {} failed: {}", self.flow_id, error);
        self.state = SessionState::Uninitialized;
        self.last_error = Some(error.to_string());
    }

    /// Replace the snapshot after a dangling reference, keeping unsaved edits.
    ///
    /// Nodes of the pending document that point at blocks the flow no longer
    /// contains lose their id and will be saved as new blocks.
    pub fn reload(&mut self, snapshot: FlowSnapshot) -> Vec<usize> {
        let mut orphaned = Vec::new();
        if let Some(pending) = self.pending.as_mut() {
            for (position, node) in pending.content.iter_mut().enumerate() {
                if node.block_id().is_some_and(|id| !snapshot.contains(id)) {
                    node.attrs.block_id = None;
                    orphaned.push(position);
                }
            }
        }
        if !orphaned.is_empty() {
            warn!(
                "flow {}: {} nodes referenced blocks outside the flow and will be recreated",
                self.flow_id,
                orphaned.len()
            );
        }
        self.document = snapshot.project();
        self.snapshot = Some(snapshot);
        self.needs_reload = false;
        orphaned
    }

    // ── Editing ────────────────────────────────────────────────────────────

    /// Record a change event carrying the full current document.
    pub fn on_change(&mut self, document: Document) -> Result<(), SessionError> {
        match self.state {
            SessionState::Uninitialized | SessionState::Loading => {
                return Err(self.invalid("accept changes"));
            }
            SessionState::Ready => self.state = SessionState::Dirty,
            SessionState::Dirty | SessionState::Reconciling => {}
        }
        document.validate()?;
        if self.pending.replace(document).is_some() {
            debug!("flow {}: coalesced pending change", self.flow_id);
        }
        Ok(())
    }

    /// Start a pass over the latest edit.
    ///
    /// Returns `Ok(None)` if nothing needs saving or a pass is already in
    /// flight. A document the reconciler rejects stays pending and the
    /// session stays `Dirty`.
    pub fn begin_reconcile(&mut self) -> Result<Option<ReconcileJob>, SessionError> {
        if self.state != SessionState::Dirty {
            return Ok(None);
        }
        let (Some(snapshot), Some(document)) = (self.snapshot.as_ref(), self.pending.as_ref())
        else {
            self.state = SessionState::Ready;
            return Ok(None);
        };
        // a conflict is settled once its node differs from the rejected version
        self.conflicted.retain(|id, (block_type, text)| {
            document.nodes().iter().any(|n| {
                n.block_id() == Some(*id) && n.block_type() == *block_type && n.text() == *text
            })
        });
        let mut batch = match reconcile(snapshot, document, &self.user, self.options) {
            Ok(batch) => batch,
            Err(e) => {
                if matches!(e, DocError::DanglingBlockReference { .. }) {
                    self.needs_reload = true;
                }
                self.last_error = Some(e.to_string());
                return Err(e.into());
            }
        };
        let held = batch.hold_updates(|id| self.conflicted.contains_key(&id));
        if held > 0 {
            debug!(
                "flow {}: holding {} updates that lost to another writer",
                self.flow_id, held
            );
        }
        let snapshot = snapshot.clone();
        let Some(document) = self.pending.take() else {
            return Ok(None);
        };
        self.generation += 1;
        self.in_flight = Some(document.clone());
        self.state = SessionState::Reconciling;
        debug!("generation {}: {}", self.generation, batch.summary());
        Ok(Some(ReconcileJob {
            generation: self.generation,
            snapshot,
            document,
            batch,
        }))
    }

    /// Finish the pass started by `job`.
    pub fn finish_reconcile(
        &mut self,
        job: &ReconcileJob,
        result: Result<ApplyReport, ApplyFailure>,
    ) -> Result<Reconciled, SessionError> {
        if self.state != SessionState::Reconciling || job.generation != self.generation {
            return Err(self.invalid("finish a reconciliation it did not start"));
        }
        self.in_flight = None;
        match result {
            Ok(report) => {
                let reconciled = job.document_with_ids(&report);
                let assigned = self.absorb(&reconciled, &report);
                self.record_conflicts(&job.document, &report);
                if report
                    .conflicts
                    .iter()
                    .any(|c| c.actual_hash.is_none())
                {
                    self.needs_reload = true;
                }
                self.document = reconciled;
                self.snapshot = Some(report.snapshot);
                self.last_error = None;
                self.state = if self.pending.is_some() {
                    SessionState::Dirty
                } else {
                    SessionState::Ready
                };
                Ok(Reconciled {
                    generation: job.generation,
                    applied: report.applied,
                    created: report.bound.len(),
                    conflicts: report.conflicts,
                    assigned,
                })
            }
            Err(failure) => {
                let partial = *failure.partial;
                self.record_conflicts(&job.document, &partial);
                let retry = job.document_with_ids(&partial);
                if !partial.bound.is_empty() {
                    debug!(
                        "flow {}: keeping {} blocks bound before the failure",
                        self.flow_id,
                        partial.bound.len()
                    );
                }
                match self.pending.as_mut() {
                    Some(pending) => {
                        pending.adopt_new_ids(partial.bound.iter().copied());
                    }
                    None => self.pending = Some(retry),
                }
                self.snapshot = Some(partial.snapshot);
                self.last_error = Some(failure.error.to_string());
                self.state = SessionState::Dirty;
                warn!(
                    "flow {}: generation {} failed, edits kept: {}",
                    self.flow_id, job.generation, failure.error
                );
                Err(failure.error.into())
            }
        }
    }

    /// Remember the node versions the store rejected. A block that vanished
    /// is left to the reload instead.
    fn record_conflicts(&mut self, document: &Document, report: &ApplyReport) {
        if !report.has_conflicts() {
            return;
        }
        for conflict in report.conflicts.iter().filter(|c| c.actual_hash.is_some()) {
            if let Some(node) = document.nodes().get(conflict.position) {
                self.conflicted
                    .insert(conflict.block_id, (node.block_type(), node.text()));
            }
        }
    }

    /// Transfer created ids to the pending document, if any.
    fn absorb(&mut self, reconciled: &Document, report: &ApplyReport) -> Vec<(usize, BlockId)> {
        match self.pending.as_mut() {
            Some(pending) => pending.adopt_new_ids(report.bound.iter().copied()),
            None => {
                let created = &report.bound;
                reconciled
                    .nodes()
                    .iter()
                    .enumerate()
                    .filter_map(|(position, node)| {
                        node.block_id()
                            .filter(|id| created.contains(id))
                            .map(|id| (position, id))
                    })
                    .collect()
            }
        }
    }
}
