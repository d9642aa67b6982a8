//! Session lifecycle demonstration
//!
//! Walks a branch-tablet session through creation, activity, refresh and
//! manual termination against the in-memory store, printing lifecycle
//! events as they arrive.

use std::sync::Arc;
use teller_core::{init_logging, LoggingConfig};
use teller_session::{
    AccessMethod, BranchContext, CreateSessionOptions, DeviceInfo, MemoryStore, PolicyRegistry,
    SessionManager, TerminationReason,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging(&LoggingConfig::default())?;

    let manager = SessionManager::builder()
        .with_policies(PolicyRegistry::builtin())
        .with_store(Arc::new(MemoryStore::new()))
        .build();

    // Print lifecycle events as the consumer layer would
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!(
                "event: {:?} for session {} (state {:?})",
                event.kind, event.session.session_id, event.session.state
            );
        }
    });

    let session = manager
        .create_session(
            CreateSessionOptions::new(
                BranchContext::new(AccessMethod::BranchTablet)
                    .with_attribute("branch_code", "0142"),
            )
            .with_device_info(DeviceInfo::new("fp-demo"))
            .with_user_id("customer-demo"),
        )
        .await?;
    println!(
        "created session {} expiring at {}",
        session.session_id, session.expires_at
    );

    manager.update_activity().await;
    manager.increment_transaction_count().await;
    println!("valid: {}", manager.validate_session(None).await);
    println!("remaining: {}s", manager.remaining_time().await.num_seconds());

    let refreshed = manager.refresh_session(None).await?;
    println!("refreshed until {}", refreshed.expires_at);

    manager
        .terminate_session(None, TerminationReason::Manual)
        .await?;
    println!("terminated; valid: {}", manager.validate_session(None).await);

    Ok(())
}
