use std::time::Duration;

use crate::scheduler::{Scheduler, TimerHandle, TimerTask};

/// Collapses keystrokes into one "started typing" and one "stopped typing"
/// edge. Methods return the state to put on the wire, if any.
pub struct TypingDebouncer<S> {
    scheduler: S,
    debounce: Duration,
    typing: bool,
    timer: Option<TimerHandle>,
}

impl<S: Scheduler> TypingDebouncer<S> {
    pub fn new(scheduler: S, debounce: Duration) -> Self {
        Self {
            scheduler,
            debounce,
            typing: false,
            timer: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    pub fn set_typing(&mut self, is_typing: bool) -> Option<bool> {
        self.cancel_timer();

        if is_typing {
            self.timer = Some(self.scheduler.schedule(self.debounce, TimerTask::TypingStop));
            if !self.typing {
                self.typing = true;
                return Some(true);
            }
            None
        } else if self.typing {
            self.typing = false;
            Some(false)
        } else {
            None
        }
    }

    /// Debounce expiry. Handles this debouncer did not arm are ignored.
    pub fn handle_timer(&mut self, handle: TimerHandle) -> Option<bool> {
        if self.timer != Some(handle) {
            return None;
        }
        self.timer = None;
        if self.typing {
            self.typing = false;
            return Some(false);
        }
        None
    }

    /// Forget local state without emitting anything, e.g. after the
    /// connection dropped.
    pub fn reset(&mut self) {
        self.cancel_timer();
        self.typing = false;
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            self.scheduler.cancel(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    fn debouncer() -> (TypingDebouncer<ManualScheduler>, ManualScheduler) {
        let scheduler = ManualScheduler::new();
        (
            TypingDebouncer::new(scheduler.clone(), Duration::from_secs(1)),
            scheduler,
        )
    }

    #[test]
    fn test_burst_emits_single_start_and_rearms() {
        let (mut typing, scheduler) = debouncer();

        let edges: Vec<_> = (0..5).filter_map(|_| typing.set_typing(true)).collect();
        assert_eq!(edges, vec![true]);
        assert_eq!(scheduler.pending_for(TimerTask::TypingStop).len(), 1);
        assert_eq!(scheduler.history().len(), 5);

        let fired = scheduler.fire(TimerTask::TypingStop).unwrap();
        assert_eq!(typing.handle_timer(fired.handle), Some(false));
        assert!(!typing.is_typing());
    }

    #[test]
    fn test_explicit_stop_cancels_timer() {
        let (mut typing, scheduler) = debouncer();

        typing.set_typing(true);
        assert_eq!(typing.set_typing(false), Some(false));
        assert!(scheduler.pending().is_empty());
        assert_eq!(typing.set_typing(false), None);
    }

    #[test]
    fn test_stale_handle_ignored() {
        let (mut typing, scheduler) = debouncer();

        typing.set_typing(true);
        let first = scheduler.pending()[0].handle;
        typing.set_typing(true);

        assert_eq!(typing.handle_timer(first), None);
        assert!(typing.is_typing());
    }
}
