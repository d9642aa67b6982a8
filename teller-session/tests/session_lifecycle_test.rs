//! Lifecycle tests for the session manager under a deterministic clock
//!
//! All timing here runs on `ManualTime`; no test waits on the wall clock.

use chrono::{DateTime, Duration as TimeDelta, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use teller_session::{
    AccessMethod, BranchContext, CreateSessionOptions, DeviceInfo, LifecycleEventKind, ManualTime,
    MemoryStore, PolicyRegistry, SessionManager, SessionPolicy, SessionState, TerminationReason,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn manager_with(time: &Arc<ManualTime>, policies: PolicyRegistry) -> SessionManager {
    SessionManager::builder()
        .with_policies(policies)
        .with_store(Arc::new(MemoryStore::new()))
        .with_clock(time.clone())
        .with_scheduler(time.clone())
        .build()
}

fn tablet_options() -> CreateSessionOptions {
    CreateSessionOptions::new(
        BranchContext::new(AccessMethod::BranchTablet).with_attribute("branch_code", "0142"),
    )
    .with_device_info(DeviceInfo::new("fp-7ac1"))
    .with_user_id("customer-31")
}

/// Millisecond-scale policy for the refresh race scenario
fn race_registry() -> PolicyRegistry {
    PolicyRegistry::new(vec![SessionPolicy::new(
        AccessMethod::BranchTablet,
        100,
        1_000,
        10,
    )])
    .unwrap()
}

#[tokio::test]
async fn expiry_equals_creation_plus_policy_duration_for_every_channel() {
    let registry = PolicyRegistry::builtin();
    for method in AccessMethod::ALL {
        let time = Arc::new(ManualTime::new(t0()));
        let manager = manager_with(&time, registry.clone());
        let policy_duration = registry.policy_for(&method).unwrap().session_duration();

        let session = manager
            .create_session(CreateSessionOptions::new(BranchContext::new(method)))
            .await
            .unwrap();

        assert_eq!(session.created_at, t0());
        assert_eq!(session.expires_at, session.created_at + policy_duration);
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(session.transaction_count, 0);
        assert!(manager.validate_session(None).await);
    }
}

#[tokio::test]
async fn validate_enforces_overdue_expiry_without_any_timer_firing() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());
    let mut events = manager.subscribe();

    manager.create_session(tablet_options()).await.unwrap();

    // Timer delivery withheld: time jumps past expiry with nothing fired
    time.skip_to(t0() + TimeDelta::minutes(16));

    assert!(!manager.validate_session(None).await);
    assert!(manager.current_session().await.is_none());
    assert_eq!(manager.session_state().await, None);

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, LifecycleEventKind::Expired);
    assert_eq!(event.session.state, SessionState::Expired);
}

#[tokio::test]
async fn validate_enforces_overdue_inactivity_without_any_timer_firing() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());
    let mut events = manager.subscribe();

    manager.create_session(tablet_options()).await.unwrap();

    // Past the 5 min inactivity window, well before the 15 min expiry
    time.skip_to(t0() + TimeDelta::minutes(6));

    assert!(!manager.validate_session(None).await);
    assert_eq!(events.try_recv().unwrap().kind, LifecycleEventKind::Inactive);
}

#[tokio::test]
async fn refresh_extends_expiry_and_disarms_the_old_deadline() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, race_registry());

    manager.create_session(tablet_options()).await.unwrap();

    // Refresh at T0+90ms, 10ms before the original 100ms expiry
    time.advance(Duration::from_millis(90)).await;
    let refreshed = manager.refresh_session(None).await.unwrap();
    let refresh_time = t0() + TimeDelta::milliseconds(90);
    assert_eq!(refreshed.expires_at, refresh_time + TimeDelta::milliseconds(100));
    assert_eq!(refreshed.last_activity, refresh_time);
    assert_eq!(refreshed.state, SessionState::Active);

    // The original expiration at T0+100ms must have no effect
    time.advance(Duration::from_millis(60)).await;
    assert!(manager.validate_session(None).await);

    // The refreshed deadline still applies
    time.advance(Duration::from_millis(40)).await;
    assert!(!manager.validate_session(None).await);
}

#[tokio::test]
async fn refresh_of_an_expired_session_fails() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());

    manager.create_session(tablet_options()).await.unwrap();
    time.skip_to(t0() + TimeDelta::minutes(20));

    let err = manager.refresh_session(None).await.unwrap_err();
    assert!(err.to_string().contains("invalid or expired"));
}

#[tokio::test]
async fn single_use_channel_terminates_after_one_transaction() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());

    manager
        .create_session(CreateSessionOptions::new(BranchContext::new(
            AccessMethod::CustomerKiosk,
        )))
        .await
        .unwrap();
    assert!(manager.validate_session(None).await);

    manager.increment_transaction_count().await;

    assert!(!manager.validate_session(None).await);
    assert!(manager.current_session().await.is_none());
}

#[tokio::test]
async fn transaction_count_is_monotonic_on_multi_use_channels() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());

    manager.create_session(tablet_options()).await.unwrap();
    manager.increment_transaction_count().await;
    manager.increment_transaction_count().await;

    let session = manager.current_session().await.unwrap();
    assert_eq!(session.transaction_count, 2);
    assert!(manager.validate_session(None).await);
}

#[tokio::test]
async fn terminate_is_idempotent() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());

    manager.create_session(tablet_options()).await.unwrap();

    manager
        .terminate_session(None, TerminationReason::Manual)
        .await
        .unwrap();
    // Second call is a no-op, not an error
    manager
        .terminate_session(None, TerminationReason::Manual)
        .await
        .unwrap();

    assert!(manager.current_session().await.is_none());
    assert!(!manager.validate_session(None).await);

    // Terminating with no session at all is also fine
    let idle = manager_with(&Arc::new(ManualTime::new(t0())), PolicyRegistry::builtin());
    idle.terminate_session(None, TerminationReason::Manual)
        .await
        .unwrap();
}

#[tokio::test]
async fn terminate_ignores_a_mismatched_session_id() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());

    let session = manager.create_session(tablet_options()).await.unwrap();
    manager
        .terminate_session(Some("some-other-session"), TerminationReason::Manual)
        .await
        .unwrap();

    assert!(manager.validate_session(Some(&session.session_id)).await);
}

#[tokio::test]
async fn validate_resolves_by_session_id() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());

    let session = manager.create_session(tablet_options()).await.unwrap();
    assert!(manager.validate_session(Some(&session.session_id)).await);
    assert!(!manager.validate_session(Some("unknown-session")).await);
}

#[tokio::test]
async fn warning_is_advisory_and_expiry_follows_it() {
    // Worked scenario: 15 min duration, 5 min inactivity, 1 min warning
    // lead, with activity keeping the session alive until the warning
    // window.
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());
    let mut events = manager.subscribe();

    manager.create_session(tablet_options()).await.unwrap();

    // Periodic activity: inactivity deadline ends up at T0+17min
    for _ in 0..3 {
        time.advance(Duration::from_secs(4 * 60)).await;
        manager.update_activity().await;
    }
    assert!(events.try_recv().is_err(), "no event expected before warning");

    // T0+14min: warning fires (15 - 1), session still fully usable
    time.advance(Duration::from_secs(2 * 60)).await;
    let warning = events.try_recv().unwrap();
    assert_eq!(warning.kind, LifecycleEventKind::Warning);
    assert_eq!(manager.session_state().await, Some(SessionState::Warning));
    assert!(manager.validate_session(None).await);

    // T0+15min: expired
    time.advance(Duration::from_secs(60)).await;
    assert!(!manager.validate_session(None).await);
    assert_eq!(events.try_recv().unwrap().kind, LifecycleEventKind::Expired);
    assert!(manager.current_session().await.is_none());
}

#[tokio::test]
async fn validate_enters_the_warning_window_without_any_timer_firing() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());
    let mut events = manager.subscribe();

    manager.create_session(tablet_options()).await.unwrap();

    // Stay active through minute 12, then jump into the warning window
    // (14-15 min) with timer delivery withheld
    for minutes in [4, 8, 12] {
        time.skip_to(t0() + TimeDelta::minutes(minutes));
        manager.update_activity().await;
    }
    time.skip_to(t0() + TimeDelta::seconds(14 * 60 + 30));

    assert!(manager.validate_session(None).await);
    assert_eq!(manager.session_state().await, Some(SessionState::Warning));
    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, LifecycleEventKind::Warning);
    assert_eq!(event.session.state, SessionState::Warning);

    // Already in the window: a second validation raises nothing new
    assert!(manager.validate_session(None).await);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn update_activity_rearms_only_the_inactivity_deadline() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());

    let session = manager.create_session(tablet_options()).await.unwrap();

    time.advance(Duration::from_secs(4 * 60)).await;
    manager.update_activity().await;

    // Activity does not move the expiry
    let current = manager.current_session().await.unwrap();
    assert_eq!(current.expires_at, session.expires_at);
    assert_eq!(current.last_activity, t0() + TimeDelta::minutes(4));

    // Without the reset the session would have gone inactive at T0+5min
    time.advance(Duration::from_secs(4 * 60)).await;
    assert!(manager.validate_session(None).await);

    // The reset deadline at T0+9min has since passed without new activity
    time.advance(Duration::from_secs(60)).await;
    assert!(!manager.validate_session(None).await);
}

#[tokio::test]
async fn requires_reauth_tracks_session_age_not_activity() {
    let registry = PolicyRegistry::new(vec![SessionPolicy::new(
        AccessMethod::AgentPortal,
        10_000,
        10_000,
        1_000,
    )
    .with_reauth(2_000)])
    .unwrap();
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, registry);

    manager
        .create_session(CreateSessionOptions::new(BranchContext::new(
            AccessMethod::AgentPortal,
        )))
        .await
        .unwrap();
    assert!(!manager.requires_reauth().await);

    time.advance(Duration::from_millis(1_999)).await;
    manager.update_activity().await;
    assert!(!manager.requires_reauth().await);

    time.advance(Duration::from_millis(1)).await;
    assert!(manager.requires_reauth().await);
}

#[tokio::test]
async fn read_accessors_are_safe_without_a_session() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());

    assert_eq!(manager.remaining_time().await, TimeDelta::zero());
    assert!(manager.current_session().await.is_none());
    assert_eq!(manager.session_state().await, None);
    assert!(!manager.requires_reauth().await);
    assert!(!manager.validate_session(None).await);
    manager.update_activity().await;
    manager.increment_transaction_count().await;
}

#[tokio::test]
async fn remaining_time_counts_down_and_floors_at_zero() {
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, PolicyRegistry::builtin());

    manager.create_session(tablet_options()).await.unwrap();
    assert_eq!(manager.remaining_time().await, TimeDelta::minutes(15));

    time.advance(Duration::from_secs(60)).await;
    assert_eq!(manager.remaining_time().await, TimeDelta::minutes(14));

    time.skip_to(t0() + TimeDelta::minutes(30));
    assert_eq!(manager.remaining_time().await, TimeDelta::zero());
}

#[tokio::test]
async fn unknown_channel_policy_fails_session_creation() {
    let registry = PolicyRegistry::new(vec![SessionPolicy::new(
        AccessMethod::BranchTablet,
        10_000,
        5_000,
        1_000,
    )])
    .unwrap();
    let time = Arc::new(ManualTime::new(t0()));
    let manager = manager_with(&time, registry);

    let err = manager
        .create_session(CreateSessionOptions::new(BranchContext::new(
            AccessMethod::AgentPortal,
        )))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("agent_portal"));
}
