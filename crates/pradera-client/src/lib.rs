//! Pradera client library
//!
//! Talks to the block/flow store and keeps editor sessions in sync with it:
//!
//! - [`store`]: the `BlockStore` / `FlowStore` traits, with an in-memory
//!   backend ([`MemoryStore`]) and the REST backend ([`RestStore`]).
//! - [`loader`]: joins a flow's rows and blocks into a snapshot.
//! - [`apply`]: runs a mutation batch against the stores.
//! - [`session`] and [`actor`]: the editor session state machine and the
//!   tokio task that drives it.

pub mod actor;
pub mod apply;
pub mod config;
pub mod loader;
pub mod memory;
pub mod rest;
pub mod session;
pub mod store;

pub use actor::{SessionEvent, SessionHandle, spawn_session};
pub use apply::{ApplyError, ApplyFailure, ApplyReport, Conflict, apply_batch};
pub use config::{Backend, ConfigError, PraderaConfig, SessionConfig};
pub use loader::{SnapshotError, load_snapshot};
pub use memory::MemoryStore;
pub use rest::{RestConfig, RestStore};
pub use session::{
    EditorSession, ReconcileJob, Reconciled, SessionError, SessionState, SessionStatus,
};
pub use store::{BlockStore, FlowStore, StoreError, Stores};
