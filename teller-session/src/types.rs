//! Session types and structures
//!
//! The persisted `Session` record, its state machine vocabulary, creation
//! options, and the redacted snapshot carried on lifecycle events.

use crate::policy::SessionPolicy;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use teller_core::{AccessMethod, BranchContext, DeviceInfo};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    /// Advisory pre-expiry state; no operation is gated on it
    Warning,
    Expired,
    Terminated,
    Inactive,
}

impl SessionState {
    /// Terminal states are absorbing; no field of a terminal session changes
    /// afterwards
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Expired | SessionState::Terminated | SessionState::Inactive
        )
    }

    /// States under which the session can still be used
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Warning)
    }
}

/// Why a session was terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Manual,
    Expired,
    Inactive,
    TransactionComplete,
}

impl TerminationReason {
    /// Terminal state a reason maps onto
    pub fn terminal_state(&self) -> SessionState {
        match self {
            TerminationReason::Expired => SessionState::Expired,
            TerminationReason::Inactive => SessionState::Inactive,
            TerminationReason::Manual | TerminationReason::TransactionComplete => {
                SessionState::Terminated
            }
        }
    }
}

/// Inputs to `SessionManager::create_session`
#[derive(Debug, Clone)]
pub struct CreateSessionOptions {
    /// Required opaque branch context; its access method selects the policy
    pub branch_context: BranchContext,
    /// Optional fingerprint payload from the device collaborator
    pub device_info: Option<DeviceInfo>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
}

impl CreateSessionOptions {
    pub fn new(branch_context: BranchContext) -> Self {
        Self {
            branch_context,
            device_info: None,
            user_id: None,
            ip_address: None,
        }
    }

    pub fn with_device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = Some(device_info);
        self
    }

    pub fn with_user_id<S: Into<String>>(mut self, user_id: S) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_ip_address<S: Into<String>>(mut self, ip_address: S) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }
}

/// Authenticated channel session record
///
/// Serialized as JSON under the `SESSION_DATA` store key. Terminal records
/// remain in the store for audit after the current pointer is cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique, unguessable identifier (128-bit OS randomness)
    pub session_id: String,
    /// Unguessable secret independent of the id (256-bit OS randomness)
    pub session_token: String,
    pub access_method: AccessMethod,
    pub branch_context: BranchContext,
    pub device_info: Option<DeviceInfo>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub state: SessionState,
    pub user_id: Option<String>,
    /// Monotonic, non-decreasing
    pub transaction_count: u64,
    pub is_active: bool,
}

impl Session {
    /// Create a fresh active session under the given policy
    pub fn new(options: CreateSessionOptions, policy: &SessionPolicy, now: DateTime<Utc>) -> Self {
        Self {
            session_id: generate_id(),
            session_token: generate_token(),
            access_method: options.branch_context.access_method,
            branch_context: options.branch_context,
            device_info: options.device_info,
            ip_address: options.ip_address,
            created_at: now,
            expires_at: now + policy.session_duration(),
            last_activity: now,
            state: SessionState::Active,
            user_id: options.user_id,
            transaction_count: 0,
            is_active: true,
        }
    }

    /// Whether the duration limit has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the inactivity window has been exceeded at `now`
    pub fn is_stale_at(&self, now: DateTime<Utc>, inactivity_timeout: Duration) -> bool {
        now - self.last_activity > inactivity_timeout
    }

    /// Time left before expiry, floored at zero
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Redacted session view for lifecycle events and consumer layers
///
/// Carries neither the session token nor the opaque collaborator payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub access_method: AccessMethod,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub transaction_count: u64,
    pub user_id: Option<String>,
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            access_method: session.access_method,
            state: session.state,
            created_at: session.created_at,
            expires_at: session.expires_at,
            last_activity: session.last_activity,
            transaction_count: session.transaction_count,
            user_id: session.user_id.clone(),
        }
    }
}

/// 128-bit session identifier from the OS random source
fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 256-bit session token from the OS random source
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use teller_core::BranchContext;

    fn tablet_policy() -> SessionPolicy {
        SessionPolicy::new(AccessMethod::BranchTablet, 900_000, 300_000, 60_000)
    }

    fn new_session() -> Session {
        Session::new(
            CreateSessionOptions::new(BranchContext::new(AccessMethod::BranchTablet)),
            &tablet_policy(),
            Utc::now(),
        )
    }

    #[test]
    fn new_session_is_active_with_policy_expiry() {
        let now = Utc::now();
        let session = Session::new(
            CreateSessionOptions::new(BranchContext::new(AccessMethod::BranchTablet))
                .with_user_id("u-1")
                .with_ip_address("10.0.0.7"),
            &tablet_policy(),
            now,
        );
        assert_eq!(session.state, SessionState::Active);
        assert!(session.is_active);
        assert_eq!(session.transaction_count, 0);
        assert_eq!(session.expires_at, now + Duration::minutes(15));
        assert_eq!(session.last_activity, now);
    }

    #[test]
    fn identifiers_are_distinct_and_sized() {
        let a = new_session();
        let b = new_session();
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.session_token, b.session_token);
        assert_ne!(a.session_id, a.session_token);
        // 16 bytes -> 22 base64url chars, 32 bytes -> 43
        assert_eq!(a.session_id.len(), 22);
        assert_eq!(a.session_token.len(), 43);
    }

    #[test]
    fn terminal_state_mapping_follows_reason() {
        assert_eq!(
            TerminationReason::Expired.terminal_state(),
            SessionState::Expired
        );
        assert_eq!(
            TerminationReason::Inactive.terminal_state(),
            SessionState::Inactive
        );
        assert_eq!(
            TerminationReason::Manual.terminal_state(),
            SessionState::Terminated
        );
        assert_eq!(
            TerminationReason::TransactionComplete.terminal_state(),
            SessionState::Terminated
        );
    }

    #[test]
    fn session_record_round_trips_as_json() {
        let session = new_session();
        let json = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.session_id, session.session_id);
        assert_eq!(restored.state, SessionState::Active);
        assert_eq!(restored.expires_at, session.expires_at);
    }

    #[test]
    fn snapshot_omits_the_token() {
        let session = new_session();
        let snapshot = SessionSnapshot::from(&session);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains(&session.session_token));
        assert!(json.contains(&session.session_id));
    }
}
