//! Teller Session - Channel session lifecycle management
//!
//! This crate implements the session subsystem of the Teller platform:
//!
//! - Per-channel security policies and the registry that serves them
//! - A generic key/value persistence layer for the current session record
//! - A replaceable scheduler/clock substrate with a deterministic test fake
//! - The lifecycle manager orchestrating create/validate/refresh/terminate
//!   plus a broadcast channel of lifecycle events
//!
//! Each manager instance owns exactly one current session. Collaborators
//! (authentication flows, fingerprint collection, UI layers) supply opaque
//! context values and observe lifecycle events; their internals are out of
//! scope here.

pub mod events;
pub mod manager;
pub mod policy;
pub mod scheduler;
pub mod store;
pub mod types;

pub use events::{LifecycleEvent, LifecycleEventKind};
pub use manager::{SessionManager, SessionManagerBuilder};
pub use policy::{PolicyRegistry, SessionPolicy};
pub use scheduler::{ManualTime, Scheduler, TimerHandle, TimerTask, TokioScheduler};
pub use store::{FileStore, MemoryStore, KEY_LAST_ACTIVITY, KEY_SESSION_DATA};
pub use types::{
    CreateSessionOptions, Session, SessionSnapshot, SessionState, TerminationReason,
};

pub use teller_core::{AccessMethod, BranchContext, Clock, ConfigError, DeviceInfo, KeyValueStore,
    StoreError, SystemClock};

/// Session subsystem error type
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The target session is missing, terminal, or past a time limit
    #[error("session is invalid or expired")]
    InvalidOrExpired,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type SessionResult<T> = Result<T, SessionError>;
