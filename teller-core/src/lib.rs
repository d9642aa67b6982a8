//! Teller Core - Shared substrate for the channel-session platform
//!
//! Defines the error taxonomy, logging bootstrap, core domain types and the
//! store/clock traits used by the session subsystem.

pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use error::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;
