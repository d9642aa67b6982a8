//! Substrate trait definitions
//!
//! The session subsystem is written against these seams so the same logic
//! can sit on an in-memory map, a file directory, or a remote cache row, and
//! so tests can substitute a deterministic clock.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Generic key/value persistence adapter
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Time source seam
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
