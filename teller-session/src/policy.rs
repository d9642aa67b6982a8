//! Policy Registry - Static per-channel session rules
//!
//! One immutable `SessionPolicy` per access method, validated once at
//! startup. A malformed policy table fails registry construction, never a
//! later lookup.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use teller_core::{AccessMethod, ConfigError};
use tracing::info;

/// Time-based and behavioral rules for sessions of one access method
///
/// Durations are millisecond-denominated, matching the persisted policy
/// table format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Channel this policy governs
    pub access_method: AccessMethod,
    /// Maximum session lifetime from creation
    pub session_duration_ms: u64,
    /// Maximum gap between activity updates
    pub inactivity_timeout_ms: u64,
    /// How long before expiry the warning signal is raised
    pub warning_lead_ms: u64,
    /// Whether sessions must re-authenticate after `reauth_interval_ms`
    #[serde(default)]
    pub require_reauth: bool,
    /// Maximum session age before re-authentication, independent of activity
    #[serde(default)]
    pub reauth_interval_ms: Option<u64>,
    /// Terminate immediately once one transaction is recorded (single-use
    /// channels)
    #[serde(default)]
    pub auto_terminate_after_transaction: bool,
}

impl SessionPolicy {
    pub fn new(
        access_method: AccessMethod,
        session_duration_ms: u64,
        inactivity_timeout_ms: u64,
        warning_lead_ms: u64,
    ) -> Self {
        Self {
            access_method,
            session_duration_ms,
            inactivity_timeout_ms,
            warning_lead_ms,
            require_reauth: false,
            reauth_interval_ms: None,
            auto_terminate_after_transaction: false,
        }
    }

    /// Require re-authentication after the given interval
    pub fn with_reauth(mut self, interval_ms: u64) -> Self {
        self.require_reauth = true;
        self.reauth_interval_ms = Some(interval_ms);
        self
    }

    /// Mark this channel as single-use
    pub fn with_auto_terminate(mut self) -> Self {
        self.auto_terminate_after_transaction = true;
        self
    }

    pub fn session_duration(&self) -> Duration {
        Duration::milliseconds(self.session_duration_ms as i64)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::milliseconds(self.inactivity_timeout_ms as i64)
    }

    pub fn warning_lead(&self) -> Duration {
        Duration::milliseconds(self.warning_lead_ms as i64)
    }

    pub fn reauth_interval(&self) -> Option<Duration> {
        self.reauth_interval_ms
            .map(|ms| Duration::milliseconds(ms as i64))
    }

    /// Check the policy invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        let method = self.access_method.as_str();
        if self.session_duration_ms == 0 {
            return Err(ConfigError::invalid_policy(
                method,
                "session_duration_ms must be positive",
            ));
        }
        if self.session_duration_ms <= self.warning_lead_ms {
            return Err(ConfigError::invalid_policy(
                method,
                "session_duration_ms must exceed warning_lead_ms",
            ));
        }
        if self.inactivity_timeout_ms == 0 {
            return Err(ConfigError::invalid_policy(
                method,
                "inactivity_timeout_ms must be positive",
            ));
        }
        if self.require_reauth && !matches!(self.reauth_interval_ms, Some(ms) if ms > 0) {
            return Err(ConfigError::invalid_policy(
                method,
                "require_reauth needs a positive reauth_interval_ms",
            ));
        }
        Ok(())
    }
}

/// Policy entry as it appears in the TOML table, keyed by access method
#[derive(Debug, Deserialize)]
struct PolicyEntry {
    session_duration_ms: u64,
    inactivity_timeout_ms: u64,
    warning_lead_ms: u64,
    #[serde(default)]
    require_reauth: bool,
    #[serde(default)]
    reauth_interval_ms: Option<u64>,
    #[serde(default)]
    auto_terminate_after_transaction: bool,
}

#[derive(Debug, Deserialize)]
struct PolicyTableFile {
    policies: HashMap<String, PolicyEntry>,
}

/// Read-only mapping from access method to session policy
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<AccessMethod, SessionPolicy>,
}

impl PolicyRegistry {
    /// Build a registry from explicit policies, validating each
    pub fn new(policies: Vec<SessionPolicy>) -> Result<Self, ConfigError> {
        let mut map = HashMap::new();
        for policy in policies {
            policy.validate()?;
            if map.insert(policy.access_method, policy.clone()).is_some() {
                return Err(ConfigError::DuplicatePolicy {
                    method: policy.access_method.as_str().to_string(),
                });
            }
        }
        info!(policy_count = map.len(), "Policy registry initialized");
        Ok(Self { policies: map })
    }

    /// Built-in defaults for the four known channels
    pub fn builtin() -> Self {
        let policies = vec![
            // 15 min / 5 min inactivity / 1 min warning
            SessionPolicy::new(AccessMethod::BranchTablet, 900_000, 300_000, 60_000),
            // Agent portal: long-lived but re-authenticates every 4 hours
            SessionPolicy::new(AccessMethod::AgentPortal, 28_800_000, 1_800_000, 300_000)
                .with_reauth(14_400_000),
            // Kiosk sessions are single-use
            SessionPolicy::new(AccessMethod::CustomerKiosk, 600_000, 120_000, 60_000)
                .with_auto_terminate(),
            SessionPolicy::new(AccessMethod::WebSelfService, 1_800_000, 600_000, 120_000),
        ];
        // Built-in values satisfy the invariants
        Self::new(policies).unwrap_or_else(|e| panic!("built-in policy table invalid: {}", e))
    }

    /// Load a policy table from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let table: PolicyTableFile = toml::from_str(&content)?;

        let mut policies = Vec::with_capacity(table.policies.len());
        for (method, entry) in table.policies {
            let access_method: AccessMethod = method.parse()?;
            policies.push(SessionPolicy {
                access_method,
                session_duration_ms: entry.session_duration_ms,
                inactivity_timeout_ms: entry.inactivity_timeout_ms,
                warning_lead_ms: entry.warning_lead_ms,
                require_reauth: entry.require_reauth,
                reauth_interval_ms: entry.reauth_interval_ms,
                auto_terminate_after_transaction: entry.auto_terminate_after_transaction,
            });
        }
        info!(path = %path.as_ref().display(), "Loaded policy table");
        Self::new(policies)
    }

    /// Look up the policy for an access method
    pub fn policy_for(&self, access_method: &AccessMethod) -> Result<&SessionPolicy, ConfigError> {
        self.policies
            .get(access_method)
            .ok_or_else(|| ConfigError::UnknownAccessMethod {
                method: access_method.as_str().to_string(),
            })
    }

    /// Access methods with a registered policy
    pub fn access_methods(&self) -> Vec<AccessMethod> {
        self.policies.keys().copied().collect()
    }
}
