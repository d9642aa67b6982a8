//! Session Lifecycle Manager
//!
//! The orchestrator: resolves per-channel policy, persists the current
//! session through the key/value seam, arms expiration/warning/inactivity
//! deadlines through the scheduler seam, and broadcasts lifecycle events.
//!
//! Each manager instance owns exactly one current session. Timer callbacks
//! and explicit calls funnel through the same transition logic, and every
//! read re-derives time-based expiry on its own because timer delivery
//! cannot be trusted to be timely. Timers are tagged with a generation
//! number; refresh and termination cancel the whole generation together so a
//! stale callback can never act on a session it no longer corresponds to.

use crate::events::{LifecycleEvent, LifecycleEventKind};
use crate::policy::{PolicyRegistry, SessionPolicy};
use crate::scheduler::{Scheduler, TimerHandle, TimerTask, TokioScheduler};
use crate::store::{MemoryStore, KEY_LAST_ACTIVITY, KEY_SESSION_DATA};
use crate::types::{
    CreateSessionOptions, Session, SessionSnapshot, SessionState, TerminationReason,
};
use crate::{SessionError, SessionResult};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use teller_core::{Clock, KeyValueStore, StoreError, SystemClock};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Handles for the three deadlines of the current timer generation
#[derive(Default)]
struct TimerSet {
    expiration: Option<TimerHandle>,
    warning: Option<TimerHandle>,
    inactivity: Option<TimerHandle>,
}

impl TimerSet {
    fn cancel_all(&mut self, scheduler: &dyn Scheduler) {
        for slot in [&mut self.expiration, &mut self.warning, &mut self.inactivity] {
            if let Some(handle) = slot.take() {
                scheduler.cancel(&handle);
            }
        }
    }
}

/// Cancel-then-arm: a timer slot never holds two live timers of one kind
fn rearm(
    slot: &mut Option<TimerHandle>,
    scheduler: &dyn Scheduler,
    delay: std::time::Duration,
    task: TimerTask,
) {
    if let Some(old) = slot.take() {
        scheduler.cancel(&old);
    }
    *slot = Some(scheduler.schedule(delay, task));
}

fn to_std(duration: Duration) -> std::time::Duration {
    duration.to_std().unwrap_or_default()
}

struct ManagerState {
    current: Option<Session>,
    /// Bumped whenever the timer set is replaced; stale callbacks compare
    /// against it before mutating anything
    generation: u64,
    timers: TimerSet,
}

/// Builder for `SessionManager`
pub struct SessionManagerBuilder {
    policies: Option<PolicyRegistry>,
    store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    store_write_timeout: std::time::Duration,
    event_capacity: usize,
}

impl SessionManagerBuilder {
    pub fn new() -> Self {
        Self {
            policies: None,
            store: None,
            clock: None,
            scheduler: None,
            store_write_timeout: std::time::Duration::from_secs(3),
            event_capacity: 100,
        }
    }

    pub fn with_policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Bound on the durable write performed by the termination path
    pub fn with_store_write_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.store_write_timeout = timeout;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> SessionManager {
        let (events, _) = broadcast::channel(self.event_capacity);
        SessionManager {
            policies: Arc::new(self.policies.unwrap_or_else(PolicyRegistry::builtin)),
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            scheduler: self.scheduler.unwrap_or_else(|| Arc::new(TokioScheduler::new())),
            state: Arc::new(RwLock::new(ManagerState {
                current: None,
                generation: 0,
                timers: TimerSet::default(),
            })),
            events,
            store_write_timeout: self.store_write_timeout,
        }
    }
}

impl Default for SessionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel session lifecycle manager
///
/// Cheap to clone; clones share the same current-session slot.
#[derive(Clone)]
pub struct SessionManager {
    policies: Arc<PolicyRegistry>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    state: Arc<RwLock<ManagerState>>,
    events: broadcast::Sender<LifecycleEvent>,
    store_write_timeout: std::time::Duration,
}

impl SessionManager {
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::new()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Create a new session for the channel named by the branch context
    ///
    /// The record is persisted before it is adopted as current; a live
    /// current session is superseded (its timers are cancelled with the
    /// rest of the old generation).
    pub async fn create_session(&self, options: CreateSessionOptions) -> SessionResult<Session> {
        let policy = self
            .policies
            .policy_for(&options.branch_context.access_method)?
            .clone();
        let now = self.clock.now();
        let session = Session::new(options, &policy, now);

        let mut state = self.state.write().await;
        if let Some(existing) = &state.current {
            if existing.state.is_live() {
                warn!(
                    old_session_id = %existing.session_id,
                    "Superseding live current session"
                );
            }
        }

        self.persist_session(&session).await?;

        state.timers.cancel_all(self.scheduler.as_ref());
        state.generation += 1;
        state.current = Some(session.clone());
        self.arm_all_timers(&mut state, &policy, &session);

        info!(
            session_id = %session.session_id,
            access_method = %session.access_method,
            expires_at = %session.expires_at,
            "Created session"
        );
        Ok(session)
    }

    /// Check whether the target session is currently usable
    ///
    /// Never errors. Re-derives time-based expiry independent of whether a
    /// timer has fired: an overdue duration or inactivity limit is enforced
    /// synchronously through the same termination path the timers use.
    /// Internal failures (unreadable store, missing policy) are fail-closed
    /// `false`.
    pub async fn validate_session(&self, session_id: Option<&str>) -> bool {
        let mut state = self.state.write().await;
        let current_matches = match (&state.current, session_id) {
            (Some(session), Some(id)) => session.session_id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if current_matches {
            let valid = self.evaluate_current(&mut state).await;
            debug!(valid, "Validated current session");
            return valid;
        }
        drop(state);

        let Some(id) = session_id else {
            return false;
        };
        // Lookup by id against the store; audit records are evaluated
        // without being adopted or transitioned.
        match self.load_record().await {
            Ok(Some(record)) if record.session_id == id => self.record_is_valid(&record),
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Store unreachable during validation; failing closed");
                false
            }
        }
    }

    /// Extend the current session by a full policy duration
    ///
    /// Requires the session to validate right now, otherwise
    /// `SessionError::InvalidOrExpired`. All three timers of the old
    /// generation are cancelled together and re-armed, so a deadline
    /// scheduled for the previous expiry can never fire afterwards.
    pub async fn refresh_session(&self, session_id: Option<&str>) -> SessionResult<Session> {
        let mut state = self.state.write().await;

        if let (Some(session), Some(id)) = (&state.current, session_id) {
            if session.session_id != id {
                return Err(SessionError::InvalidOrExpired);
            }
        }
        if !self.evaluate_current(&mut state).await {
            return Err(SessionError::InvalidOrExpired);
        }

        let Some(mut updated) = state.current.clone() else {
            return Err(SessionError::InvalidOrExpired);
        };
        let policy = self.policies.policy_for(&updated.access_method)?.clone();
        let now = self.clock.now();
        updated.expires_at = now + policy.session_duration();
        updated.last_activity = now;
        updated.state = SessionState::Active;

        self.persist_session(&updated).await?;

        state.current = Some(updated.clone());
        state.timers.cancel_all(self.scheduler.as_ref());
        state.generation += 1;
        self.arm_all_timers(&mut state, &policy, &updated);

        info!(
            session_id = %updated.session_id,
            expires_at = %updated.expires_at,
            "Refreshed session"
        );
        Ok(updated)
    }

    /// Terminate the current session
    ///
    /// Idempotent: no current session, a mismatched id, or an
    /// already-terminal session logs and returns `Ok`. The terminal record
    /// stays in the store for audit; only the current pointer is cleared.
    pub async fn terminate_session(
        &self,
        session_id: Option<&str>,
        reason: TerminationReason,
    ) -> SessionResult<()> {
        let mut state = self.state.write().await;
        match &state.current {
            None => {
                debug!("Termination requested with no current session");
                Ok(())
            }
            Some(session) if session_id.is_some_and(|id| id != session.session_id) => {
                debug!(session_id = ?session_id, "Termination requested for a non-current session");
                Ok(())
            }
            Some(session) if session.state.is_terminal() => {
                debug!(session_id = %session.session_id, "Session already terminal");
                Ok(())
            }
            Some(_) => self.finish_current(&mut state, reason).await,
        }
    }

    /// Record user activity on the current session
    ///
    /// No-op without a valid current session. Only the inactivity timer is
    /// re-armed; expiration and warning deadlines are untouched.
    pub async fn update_activity(&self) {
        let mut state = self.state.write().await;
        if !self.evaluate_current(&mut state).await {
            debug!("Activity update ignored; no valid current session");
            return;
        }

        let now = self.clock.now();
        let updated = {
            let Some(session) = state.current.as_mut() else {
                return;
            };
            session.last_activity = now;
            session.clone()
        };

        if let Err(e) = self.persist_session(&updated).await {
            warn!(error = %e, "Failed to persist activity update");
        }
        if let Ok(policy) = self.policies.policy_for(&updated.access_method) {
            let policy = policy.clone();
            self.arm_inactivity_timer(&mut state, &policy, &updated);
        }
        debug!(session_id = %updated.session_id, "Recorded activity");
    }

    /// Record a completed transaction on the current session
    ///
    /// No-op without a valid current session. Under an
    /// `auto_terminate_after_transaction` policy the session is terminated
    /// immediately with reason `transaction_complete`.
    pub async fn increment_transaction_count(&self) {
        let mut state = self.state.write().await;
        if !self.evaluate_current(&mut state).await {
            debug!("Transaction count ignored; no valid current session");
            return;
        }

        let updated = {
            let Some(session) = state.current.as_mut() else {
                return;
            };
            session.transaction_count += 1;
            session.clone()
        };

        if let Err(e) = self.persist_session(&updated).await {
            warn!(error = %e, "Failed to persist transaction count");
        }
        debug!(
            session_id = %updated.session_id,
            transaction_count = updated.transaction_count,
            "Recorded transaction"
        );

        let auto_terminate = self
            .policies
            .policy_for(&updated.access_method)
            .map(|p| p.auto_terminate_after_transaction)
            .unwrap_or(false);
        if auto_terminate {
            if let Err(e) = self
                .finish_current(&mut state, TerminationReason::TransactionComplete)
                .await
            {
                error!(error = %e, "Single-use termination failed to persist");
            }
        }
    }

    /// Whether the current session has aged past its re-authentication
    /// interval. Pure; `false` without a session or a reauth policy.
    pub async fn requires_reauth(&self) -> bool {
        let state = self.state.read().await;
        let Some(session) = &state.current else {
            return false;
        };
        let Ok(policy) = self.policies.policy_for(&session.access_method) else {
            return false;
        };
        if !policy.require_reauth {
            return false;
        }
        let Some(interval) = policy.reauth_interval() else {
            return false;
        };
        self.clock.now() - session.created_at >= interval
    }

    /// Adopt a previously persisted session if it is still valid
    ///
    /// Invalid or unreadable records are cleared from the store and `None`
    /// is returned. Valid records become current with timers re-armed from
    /// their remaining windows.
    pub async fn restore_session(&self) -> Option<Session> {
        let mut record = match self.load_record().await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e @ StoreError::Serialization(_)) => {
                // A record that cannot be parsed will never become valid
                warn!(error = %e, "Clearing malformed persisted session");
                self.clear_persisted_record().await;
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted session");
                return None;
            }
        };

        // LAST_ACTIVITY may be newer than the activity timestamp embedded in
        // the record; prefer it when parseable.
        if let Ok(Some(raw)) = self.store.get(KEY_LAST_ACTIVITY).await {
            if let Ok(last) = DateTime::parse_from_rfc3339(&raw) {
                let last = last.with_timezone(&Utc);
                if last > record.last_activity {
                    record.last_activity = last;
                }
            }
        }

        let policy = match self.valid_record_policy(&record) {
            Some(policy) => policy.clone(),
            None => {
                info!(session_id = %record.session_id, "Discarding invalid persisted session");
                self.clear_persisted_record().await;
                return None;
            }
        };

        let mut state = self.state.write().await;
        state.timers.cancel_all(self.scheduler.as_ref());
        state.generation += 1;
        state.current = Some(record.clone());
        self.arm_all_timers(&mut state, &policy, &record);

        info!(session_id = %record.session_id, "Restored persisted session");
        Some(record)
    }

    /// Time left before the current session expires, floored at zero
    pub async fn remaining_time(&self) -> Duration {
        let state = self.state.read().await;
        state
            .current
            .as_ref()
            .map(|s| s.remaining_at(self.clock.now()))
            .unwrap_or_else(Duration::zero)
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.state.read().await.current.clone()
    }

    pub async fn session_state(&self) -> Option<SessionState> {
        self.state.read().await.current.as_ref().map(|s| s.state)
    }

    // ---- internal transition logic ----

    /// Re-derive validity of the current session at the current instant,
    /// enforcing overdue limits through the shared termination path and
    /// entering the warning window when its timer has not delivered.
    async fn evaluate_current(&self, state: &mut ManagerState) -> bool {
        let now = self.clock.now();
        let (expired, access_method, last_activity, expires_at) = {
            let Some(session) = state.current.as_ref() else {
                return false;
            };
            if !session.is_active || !session.state.is_live() {
                return false;
            }
            (
                session.is_expired_at(now),
                session.access_method,
                session.last_activity,
                session.expires_at,
            )
        };

        if expired {
            if let Err(e) = self.finish_current(state, TerminationReason::Expired).await {
                error!(error = %e, "Overdue expiry failed to persist");
            }
            return false;
        }

        let policy = match self.policies.policy_for(&access_method) {
            Ok(policy) => policy.clone(),
            Err(e) => {
                warn!(error = %e, "No policy for current session; failing closed");
                return false;
            }
        };
        if now - last_activity > policy.inactivity_timeout() {
            if let Err(e) = self.finish_current(state, TerminationReason::Inactive).await {
                error!(error = %e, "Overdue inactivity failed to persist");
            }
            return false;
        }

        // The warning transition is timer-driven but re-derived here too, so
        // a host with withheld timer delivery still surfaces the advisory
        // state.
        if policy.warning_lead() > Duration::zero()
            && now >= expires_at - policy.warning_lead()
        {
            self.raise_warning(state, now).await;
        }
        true
    }

    /// Move an active, unexpired session into the warning window, persisting
    /// the state and emitting the advisory event. No-op otherwise.
    async fn raise_warning(&self, state: &mut ManagerState, now: DateTime<Utc>) {
        let (snapshot, updated) = {
            let Some(session) = state.current.as_mut() else {
                return;
            };
            // Advisory only, and only ever from active
            if session.state != SessionState::Active || now > session.expires_at {
                return;
            }
            session.state = SessionState::Warning;
            (SessionSnapshot::from(&*session), session.clone())
        };

        if let Err(e) = self.persist_session(&updated).await {
            warn!(error = %e, "Failed to persist warning state");
        }
        info!(
            session_id = %updated.session_id,
            expires_at = %updated.expires_at,
            "Session entering warning window"
        );
        self.emit(LifecycleEventKind::Warning, snapshot, now);
    }

    /// Validity of a non-current store record, evaluated without transition.
    /// Returns the governing policy when the record is still usable.
    fn valid_record_policy(&self, record: &Session) -> Option<&SessionPolicy> {
        if !record.is_active || !record.state.is_live() {
            return None;
        }
        let now = self.clock.now();
        if record.is_expired_at(now) {
            return None;
        }
        let policy = self.policies.policy_for(&record.access_method).ok()?;
        if record.is_stale_at(now, policy.inactivity_timeout()) {
            return None;
        }
        Some(policy)
    }

    fn record_is_valid(&self, record: &Session) -> bool {
        self.valid_record_policy(record).is_some()
    }

    /// The single termination path shared by explicit calls, lazy re-checks
    /// and timer callbacks.
    ///
    /// The durable write is bounded by `store_write_timeout`; when it cannot
    /// be confirmed the in-memory session is still terminated (fail-closed)
    /// and a `reconcile_required` event is raised before the error is
    /// surfaced.
    async fn finish_current(
        &self,
        state: &mut ManagerState,
        reason: TerminationReason,
    ) -> SessionResult<()> {
        let Some(mut session) = state.current.take() else {
            return Ok(());
        };
        session.state = reason.terminal_state();
        session.is_active = false;

        state.timers.cancel_all(self.scheduler.as_ref());
        state.generation += 1;

        let now = self.clock.now();
        let snapshot = SessionSnapshot::from(&session);
        info!(
            session_id = %session.session_id,
            reason = ?reason,
            state = ?session.state,
            "Session terminated"
        );

        let write = self.persist_session(&session);
        let result = match tokio::time::timeout(self.store_write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "Termination write failed; session terminated in memory only");
                self.emit(LifecycleEventKind::ReconcileRequired, snapshot.clone(), now);
                Err(SessionError::Store(e))
            }
            Err(_) => {
                let timeout_ms = self.store_write_timeout.as_millis() as u64;
                error!(timeout_ms, "Termination write timed out; session terminated in memory only");
                self.emit(LifecycleEventKind::ReconcileRequired, snapshot.clone(), now);
                Err(SessionError::Store(StoreError::Timeout { timeout_ms }))
            }
        };

        match reason {
            TerminationReason::Expired => self.emit(LifecycleEventKind::Expired, snapshot, now),
            TerminationReason::Inactive => self.emit(LifecycleEventKind::Inactive, snapshot, now),
            TerminationReason::Manual | TerminationReason::TransactionComplete => {}
        }
        result
    }

    async fn clear_persisted_record(&self) {
        for key in [KEY_SESSION_DATA, KEY_LAST_ACTIVITY] {
            if let Err(e) = self.store.delete(key).await {
                warn!(error = %e, key, "Failed to clear persisted record");
            }
        }
    }

    async fn persist_session(&self, session: &Session) -> Result<(), StoreError> {
        let json = serde_json::to_string(session)?;
        self.store.set(KEY_SESSION_DATA, &json).await?;
        self.store
            .set(KEY_LAST_ACTIVITY, &session.last_activity.to_rfc3339())
            .await
    }

    async fn load_record(&self) -> Result<Option<Session>, StoreError> {
        match self.store.get(KEY_SESSION_DATA).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn emit(&self, kind: LifecycleEventKind, snapshot: SessionSnapshot, at: DateTime<Utc>) {
        // Zero subscribers is fine
        let _ = self.events.send(LifecycleEvent::new(kind, snapshot, at));
    }

    /// Arm expiration, warning and inactivity deadlines for the current
    /// generation. Caller has already bumped the generation.
    fn arm_all_timers(&self, state: &mut ManagerState, policy: &SessionPolicy, session: &Session) {
        let generation = state.generation;
        let now = self.clock.now();
        let until_expiry = (session.expires_at - now).max(Duration::zero());

        let mgr = self.clone();
        rearm(
            &mut state.timers.expiration,
            self.scheduler.as_ref(),
            to_std(until_expiry),
            Box::pin(async move { mgr.on_expiration_deadline(generation).await }),
        );

        if policy.warning_lead() > Duration::zero() {
            let warning_delay = (until_expiry - policy.warning_lead()).max(Duration::zero());
            let mgr = self.clone();
            rearm(
                &mut state.timers.warning,
                self.scheduler.as_ref(),
                to_std(warning_delay),
                Box::pin(async move { mgr.on_warning_deadline(generation).await }),
            );
        } else if let Some(handle) = state.timers.warning.take() {
            self.scheduler.cancel(&handle);
        }

        self.arm_inactivity_timer(state, policy, session);
    }

    fn arm_inactivity_timer(
        &self,
        state: &mut ManagerState,
        policy: &SessionPolicy,
        session: &Session,
    ) {
        let generation = state.generation;
        let now = self.clock.now();
        let deadline = session.last_activity + policy.inactivity_timeout();
        let mgr = self.clone();
        rearm(
            &mut state.timers.inactivity,
            self.scheduler.as_ref(),
            to_std((deadline - now).max(Duration::zero())),
            Box::pin(async move { mgr.on_inactivity_deadline(generation).await }),
        );
    }

    async fn on_expiration_deadline(self, generation: u64) {
        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!("Stale expiration timer ignored");
            return;
        }
        let now = self.clock.now();
        {
            let Some(session) = state.current.as_ref() else {
                return;
            };
            if !session.state.is_live() {
                return;
            }
            // Re-derive from the clock rather than trusting schedule-time
            // arithmetic; a refresh may have raced this callback.
            if now < session.expires_at {
                debug!("Expiration deadline no longer due");
                return;
            }
        }
        if let Err(e) = self.finish_current(&mut state, TerminationReason::Expired).await {
            error!(error = %e, "Expiration transition failed to persist");
        }
    }

    async fn on_warning_deadline(self, generation: u64) {
        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!("Stale warning timer ignored");
            return;
        }
        let now = self.clock.now();
        self.raise_warning(&mut state, now).await;
    }

    async fn on_inactivity_deadline(self, generation: u64) {
        let mut state = self.state.write().await;
        if state.generation != generation {
            debug!("Stale inactivity timer ignored");
            return;
        }
        let now = self.clock.now();
        {
            let Some(session) = state.current.as_ref() else {
                return;
            };
            if !session.state.is_live() {
                return;
            }
            let deadline = match self.policies.policy_for(&session.access_method) {
                Ok(policy) => session.last_activity + policy.inactivity_timeout(),
                Err(_) => return,
            };
            // An activity update re-arms this timer, but re-check anyway
            if now < deadline {
                debug!("Inactivity deadline no longer due");
                return;
            }
        }
        if let Err(e) = self.finish_current(&mut state, TerminationReason::Inactive).await {
            error!(error = %e, "Inactivity transition failed to persist");
        }
    }
}
