//! Timers for the client event loop.
//!
//! A fired timer never runs code directly. It posts
//! [`ClientEvent::Timer`](crate::client::ClientEvent) back into the event
//! queue, so timer handling is serialized with every other event.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::client::ClientEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// What a timer was armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerTask {
    Reconnect,
    TypingStop,
}

pub trait Scheduler: Send {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;

    /// Cancelling an unknown or already fired handle is a no-op.
    fn cancel(&self, handle: TimerHandle);
}

/// Scheduler backed by `tokio::time::sleep` tasks.
#[derive(Clone)]
pub struct TokioScheduler {
    events: mpsc::UnboundedSender<ClientEvent>,
    next: Arc<AtomicU64>,
    armed: Arc<Mutex<HashMap<TimerHandle, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new(events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            events,
            next: Arc::new(AtomicU64::new(1)),
            armed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn armed_count(&self) -> usize {
        self.armed.lock().map(|armed| armed.len()).unwrap_or(0)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle(self.next.fetch_add(1, Ordering::Relaxed));
        let events = self.events.clone();
        let armed = Arc::clone(&self.armed);

        // Held across the spawn so the timer cannot deregister before it is
        // registered.
        let Ok(mut guard) = self.armed.lock() else {
            tracing::error!("Timer registry poisoned, timer not armed");
            return handle;
        };
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut armed) = armed.lock() {
                armed.remove(&handle);
            }
            let _ = events.send(ClientEvent::Timer { handle, task });
        });
        guard.insert(handle, join.abort_handle());
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Ok(mut armed) = self.armed.lock() {
            if let Some(abort) = armed.remove(&handle) {
                abort.abort();
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    pub handle: TimerHandle,
    pub delay: Duration,
    pub task: TimerTask,
}

#[derive(Debug, Default)]
struct ManualState {
    next: u64,
    pending: BTreeMap<TimerHandle, PendingTimer>,
    scheduled: Vec<PendingTimer>,
}

/// Deterministic scheduler for tests: nothing fires until the test says so.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Timers currently armed, oldest first.
    pub fn pending(&self) -> Vec<PendingTimer> {
        self.state().pending.values().copied().collect()
    }

    pub fn pending_for(&self, task: TimerTask) -> Vec<PendingTimer> {
        self.pending().into_iter().filter(|t| t.task == task).collect()
    }

    /// Every timer ever armed, in order, including cancelled ones.
    pub fn history(&self) -> Vec<PendingTimer> {
        self.state().scheduled.clone()
    }

    /// Disarm the oldest pending timer for `task` and return it, as if it had
    /// just expired. The caller delivers it to whoever owns the handle.
    pub fn fire(&self, task: TimerTask) -> Option<PendingTimer> {
        let mut state = self.state();
        let handle = state
            .pending
            .values()
            .find(|t| t.task == task)
            .map(|t| t.handle)?;
        state.pending.remove(&handle)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let mut state = self.state();
        state.next += 1;
        let timer = PendingTimer {
            handle: TimerHandle(state.next),
            delay,
            task,
        };
        state.pending.insert(timer.handle, timer);
        state.scheduled.push(timer);
        timer.handle
    }

    fn cancel(&self, handle: TimerHandle) {
        self.state().pending.remove(&handle);
    }
}
