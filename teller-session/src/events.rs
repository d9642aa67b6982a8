//! Lifecycle event channel
//!
//! Consumer layers (re-authentication prompts, dashboards) subscribe to a
//! broadcast channel; every currently subscribed receiver is served, with no
//! ordering or delivery-count guarantee beyond that.

use crate::types::SessionSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// Duration limit reached; the consumer should prompt re-authentication
    Expired,
    /// Pre-expiry advisory signal; nothing is gated on it
    Warning,
    /// Inactivity window exceeded; the consumer should prompt
    /// re-authentication
    Inactive,
    /// A termination write could not be confirmed against the store; the
    /// in-memory session is already terminated and the record needs
    /// reconciliation
    ReconcileRequired,
}

/// Event payload delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub session: SessionSnapshot,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleEventKind, session: SessionSnapshot, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            session,
            timestamp: at,
        }
    }
}
