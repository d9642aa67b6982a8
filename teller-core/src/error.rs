//! Error taxonomy shared across the platform
//!
//! Two concerns live here: configuration (policy table) errors and
//! persistence errors. The session subsystem wraps both in its own
//! `SessionError`.

use thiserror::Error;

/// Policy table and startup configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown access method: {method}")]
    UnknownAccessMethod { method: String },

    #[error("duplicate policy for access method: {method}")]
    DuplicatePolicy { method: String },

    #[error("invalid policy for {method}: {message}")]
    InvalidPolicy { method: String, message: String },

    #[error("failed to read policy table: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse policy table: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    /// Create an invalid-policy error
    pub fn invalid_policy<M: Into<String>, S: Into<String>>(method: M, message: S) -> Self {
        Self::InvalidPolicy {
            method: method.into(),
            message: message.into(),
        }
    }
}

/// Persistence adapter errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store read failed for key {key}: {message}")]
    Read { key: String, message: String },

    #[error("store write failed for key {key}: {message}")]
    Write { key: String, message: String },

    #[error("store delete failed for key {key}: {message}")]
    Delete { key: String, message: String },

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn read<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        Self::Read {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn write<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        Self::Write {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn delete<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        Self::Delete {
            key: key.into(),
            message: message.into(),
        }
    }
}
