//! Timer scheduling substrate
//!
//! The manager arms expiration, warning and inactivity deadlines through the
//! `Scheduler` seam. `TokioScheduler` drives them off the runtime clock;
//! `ManualTime` is a deterministic fake implementing both `Clock` and
//! `Scheduler`, letting tests advance virtual time without wall-clock waits.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use teller_core::Clock;
use tracing::trace;

/// Boxed deadline callback
pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Opaque handle to a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Schedule/cancel primitives for session deadlines
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;

    /// Cancel a pending timer; cancelling a fired or unknown handle is a
    /// no-op
    fn cancel(&self, handle: &TimerHandle);
}

/// Runtime-backed scheduler using spawned sleep tasks
#[derive(Default)]
pub struct TokioScheduler {
    next_id: AtomicU64,
    handles: Mutex<HashMap<u64, tokio::task::AbortHandle>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|_, handle| !handle.is_finished());
        handles.insert(id, join.abort_handle());
        TimerHandle(id)
    }

    fn cancel(&self, handle: &TimerHandle) {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(abort) = handles.remove(&handle.0) {
            abort.abort();
        }
    }
}

struct ManualTimer {
    id: u64,
    due: DateTime<Utc>,
    task: TimerTask,
}

struct ManualInner {
    now: DateTime<Utc>,
    next_id: u64,
    timers: Vec<ManualTimer>,
}

/// Deterministic clock and scheduler for tests
///
/// `advance` moves virtual time forward and runs every due timer task to
/// completion, in due-then-schedule order, before returning.
pub struct ManualTime {
    inner: Mutex<ManualInner>,
}

impl ManualTime {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(ManualInner {
                now: start,
                next_id: 0,
                timers: Vec::new(),
            }),
        }
    }

    /// Advance virtual time by `delta`, firing due timers along the way
    pub async fn advance(&self, delta: Duration) {
        let target = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.now + chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::MAX)
        };

        loop {
            // Pop the earliest due timer without holding the lock across the
            // task await; fired tasks may schedule or cancel further timers.
            let next = {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                let due_index = inner
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.id))
                    .map(|(i, _)| i);
                match due_index {
                    Some(i) => {
                        let timer = inner.timers.remove(i);
                        inner.now = timer.due.max(inner.now);
                        Some(timer)
                    }
                    None => {
                        inner.now = target;
                        None
                    }
                }
            };

            match next {
                Some(timer) => {
                    trace!(timer_id = timer.id, "Firing manual timer");
                    timer.task.await;
                }
                None => break,
            }
        }
    }

    /// Move virtual time forward without firing any timers
    ///
    /// Models a suspended host whose timer delivery is withheld; due timers
    /// stay pending and only fire on a later `advance`.
    pub fn skip_to(&self, instant: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.now = instant.max(inner.now);
    }

    /// Number of timers still pending
    pub fn pending_timers(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .timers
            .len()
    }
}

impl Clock for ManualTime {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).now
    }
}

impl Scheduler for ManualTime {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        let due = inner.now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        inner.timers.push(ManualTimer { id, due, task });
        TimerHandle(id)
    }

    fn cancel(&self, handle: &TimerHandle) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.timers.retain(|t| t.id != handle.0);
    }
}
