//! Core domain types
//!
//! Access methods identify the channel through which a session was
//! established. Branch context and device info are opaque carriers supplied
//! by external collaborators; the session subsystem transports them without
//! interpreting their contents.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Channel through which a session was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    /// Tablet device operated inside a branch
    BranchTablet,
    /// Back-office agent workstation portal
    AgentPortal,
    /// Self-service kiosk on branch premises (single-use sessions)
    CustomerKiosk,
    /// Customer-facing web self-service
    WebSelfService,
}

impl AccessMethod {
    /// All known access methods
    pub const ALL: [AccessMethod; 4] = [
        AccessMethod::BranchTablet,
        AccessMethod::AgentPortal,
        AccessMethod::CustomerKiosk,
        AccessMethod::WebSelfService,
    ];

    /// Stable identifier used in policy tables and persisted records
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMethod::BranchTablet => "branch_tablet",
            AccessMethod::AgentPortal => "agent_portal",
            AccessMethod::CustomerKiosk => "customer_kiosk",
            AccessMethod::WebSelfService => "web_self_service",
        }
    }
}

impl fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMethod {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "branch_tablet" => Ok(AccessMethod::BranchTablet),
            "agent_portal" => Ok(AccessMethod::AgentPortal),
            "customer_kiosk" => Ok(AccessMethod::CustomerKiosk),
            "web_self_service" => Ok(AccessMethod::WebSelfService),
            other => Err(crate::error::ConfigError::UnknownAccessMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// Branch context supplied by the authentication flow
///
/// Only the access method is read by the session subsystem; the attribute
/// map is carried opaquely (branch code, teller station, locale, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchContext {
    /// Channel the session belongs to
    pub access_method: AccessMethod,
    /// Uninterpreted attributes from the collaborator
    pub attributes: HashMap<String, String>,
}

impl BranchContext {
    pub fn new(access_method: AccessMethod) -> Self {
        Self {
            access_method,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Device information supplied by the fingerprint collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Opaque fingerprint string computed elsewhere
    pub fingerprint: String,
    /// Uninterpreted device attributes
    pub attributes: HashMap<String, String>,
}

impl DeviceInfo {
    pub fn new<S: Into<String>>(fingerprint: S) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
