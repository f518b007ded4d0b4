//! Connection lifecycle to the relay server.
//!
//! [`TransportSession`] owns exactly one logical connection and moves opaque
//! text frames. It never blocks: the physical socket lives behind the
//! [`Link`] trait, which reports back through [`LinkEvent`]s delivered to
//! [`TransportSession::handle_link_event`]. Every physical attempt gets a
//! fresh [`ConnectionId`] and events carrying an older id are dropped, so a
//! torn-down socket can never move the state machine.
//!
//! ```text
//!   Idle ──connect──▶ Connecting ──opened──▶ Open
//!                        │  ▲                 │
//!                 closed │  │ timer / retry   │ closed / send failure
//!                        ▼  │                 ▼
//!                       Closed ◀──────────────┘
//! ```

pub mod mock;
pub mod ws;

use std::time::Duration;

use tracing::{debug, info, warn};

use murmur_shared::types::ConnectionStatus;

use crate::error::TransportError;
use crate::scheduler::{Scheduler, TimerHandle, TimerTask};

/// Identifies one physical connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake completed
    Opened,
    /// One inbound text frame
    Frame(String),
    /// The connection failed or closed, for whatever reason
    Closed { reason: String },
}

/// A physical bidirectional text channel.
///
/// `open` only starts an attempt; its outcome arrives later as
/// [`LinkEvent::Opened`] or [`LinkEvent::Closed`] tagged with the same id.
pub trait Link: Send {
    fn open(&mut self, id: ConnectionId) -> Result<(), TransportError>;

    fn send(&mut self, id: ConnectionId, text: &str) -> Result<(), TransportError>;

    /// Tear down without reporting anything further for `id`.
    fn close(&mut self, id: ConnectionId);
}

/// Receives everything the session reports. Raw transport errors are folded
/// into status changes and their reason strings.
pub trait SessionObserver {
    fn on_status_change(&mut self, status: ConnectionStatus, reason: Option<&str>);

    fn on_frame(&mut self, text: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Double the delay, capped at the maximum, and return the new value.
    pub fn advance(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub auto_reconnect: bool,
}

pub struct TransportSession<L, S> {
    link: L,
    scheduler: S,
    auto_reconnect: bool,
    status: ConnectionStatus,
    current: Option<ConnectionId>,
    next_id: u64,
    backoff: Backoff,
    reconnect_timer: Option<TimerHandle>,
    /// Cleared by an explicit `disconnect`, set again by `connect`.
    retry_enabled: bool,
}

impl<L: Link, S: Scheduler> TransportSession<L, S> {
    pub fn new(link: L, scheduler: S, config: SessionConfig) -> Self {
        Self {
            link,
            scheduler,
            auto_reconnect: config.auto_reconnect,
            status: ConnectionStatus::Idle,
            current: None,
            next_id: 0,
            backoff: Backoff::new(config.backoff_initial, config.backoff_max),
            reconnect_timer: None,
            retry_enabled: true,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == ConnectionStatus::Open
    }

    /// Delay the next reconnect timer will be armed with.
    pub fn backoff_delay(&self) -> Duration {
        self.backoff.current()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.current
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    pub fn connect(&mut self, observer: &mut dyn SessionObserver) {
        self.cancel_reconnect();
        if let Some(old) = self.current.take() {
            debug!(connection = %old, "Replacing existing connection");
            self.link.close(old);
        }
        self.retry_enabled = true;

        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.current = Some(id);
        self.transition(ConnectionStatus::Connecting, None, observer);

        if let Err(e) = self.link.open(id) {
            warn!(connection = %id, error = %e, "Could not start connection attempt");
            self.handle_drop(&e.to_string(), observer);
        }
    }

    /// Returns `false` without side effects unless the session is open. A
    /// transmit failure closes the connection and schedules a retry.
    pub fn send(&mut self, text: &str, observer: &mut dyn SessionObserver) -> bool {
        let Some(id) = self.current.filter(|_| self.is_open()) else {
            return false;
        };

        match self.link.send(id, text) {
            Ok(()) => true,
            Err(e) => {
                warn!(connection = %id, error = %e, "Send failed, dropping connection");
                self.handle_drop(&e.to_string(), observer);
                false
            }
        }
    }

    pub fn manual_reconnect(&mut self, observer: &mut dyn SessionObserver) {
        info!("Manual reconnect requested");
        self.cancel_reconnect();
        self.backoff.reset();
        self.connect(observer);
    }

    /// Caller-initiated teardown. No retry is scheduled until the next
    /// `connect`.
    pub fn disconnect(&mut self, observer: &mut dyn SessionObserver) {
        self.cancel_reconnect();
        self.retry_enabled = false;
        if let Some(id) = self.current.take() {
            self.link.close(id);
        }
        self.transition(ConnectionStatus::Closed, Some("disconnected"), observer);
    }

    pub fn handle_link_event(
        &mut self,
        id: ConnectionId,
        event: LinkEvent,
        observer: &mut dyn SessionObserver,
    ) {
        if self.current != Some(id) {
            debug!(connection = %id, "Ignoring event from stale connection");
            return;
        }

        match event {
            LinkEvent::Opened => {
                if self.status == ConnectionStatus::Connecting {
                    self.backoff.reset();
                    self.transition(ConnectionStatus::Open, None, observer);
                }
            }
            LinkEvent::Frame(text) => {
                if self.is_open() {
                    observer.on_frame(&text);
                } else {
                    debug!(connection = %id, status = %self.status, "Frame outside open state dropped");
                }
            }
            LinkEvent::Closed { reason } => self.handle_drop(&reason, observer),
        }
    }

    /// Returns `true` if the handle belonged to this session.
    pub fn handle_timer(&mut self, handle: TimerHandle, observer: &mut dyn SessionObserver) -> bool {
        if self.reconnect_timer != Some(handle) {
            return false;
        }
        self.reconnect_timer = None;

        if self.status == ConnectionStatus::Closed {
            let waited = self.backoff.current();
            self.backoff.advance();
            info!(waited_ms = waited.as_millis() as u64, "Reconnecting");
            self.connect(observer);
        }
        true
    }

    fn handle_drop(&mut self, reason: &str, observer: &mut dyn SessionObserver) {
        if self.status == ConnectionStatus::Closed {
            return;
        }

        let was = self.status;
        if let Some(id) = self.current.take() {
            self.link.close(id);
        }
        self.transition(ConnectionStatus::Closed, Some(reason), observer);

        let retry = matches!(was, ConnectionStatus::Open | ConnectionStatus::Connecting);
        if retry && self.auto_reconnect && self.retry_enabled {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect();
        let delay = self.backoff.current();
        debug!(delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        self.reconnect_timer = Some(self.scheduler.schedule(delay, TimerTask::Reconnect));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(handle) = self.reconnect_timer.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn transition(
        &mut self,
        status: ConnectionStatus,
        reason: Option<&str>,
        observer: &mut dyn SessionObserver,
    ) {
        if self.status == status {
            return;
        }
        info!(from = %self.status, to = %status, reason = reason.unwrap_or(""), "Connection status changed");
        self.status = status;
        observer.on_status_change(status, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use mock::MockLink;

    #[derive(Default)]
    struct Recorder {
        statuses: Vec<ConnectionStatus>,
        frames: Vec<String>,
    }

    impl SessionObserver for Recorder {
        fn on_status_change(&mut self, status: ConnectionStatus, _reason: Option<&str>) {
            self.statuses.push(status);
        }

        fn on_frame(&mut self, text: &str) {
            self.frames.push(text.to_string());
        }
    }

    fn session() -> (TransportSession<MockLink, ManualScheduler>, MockLink, ManualScheduler) {
        let link = MockLink::new();
        let scheduler = ManualScheduler::new();
        let session = TransportSession::new(
            link.clone(),
            scheduler.clone(),
            SessionConfig {
                backoff_initial: Duration::from_secs(1),
                backoff_max: Duration::from_secs(30),
                auto_reconnect: true,
            },
        );
        (session, link, scheduler)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<u64> = (0..7).map(|_| backoff.advance().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30, 30]);
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn test_connect_reports_connecting_then_open() {
        let (mut session, link, _) = session();
        let mut rec = Recorder::default();

        session.connect(&mut rec);
        let id = link.last_opened().unwrap();
        session.handle_link_event(id, LinkEvent::Opened, &mut rec);

        assert_eq!(rec.statuses, vec![ConnectionStatus::Connecting, ConnectionStatus::Open]);
        assert!(session.is_open());
    }

    #[test]
    fn test_connect_is_idempotent_and_silences_old_link() {
        let (mut session, link, _) = session();
        let mut rec = Recorder::default();

        session.connect(&mut rec);
        let first = link.last_opened().unwrap();
        session.connect(&mut rec);
        let second = link.last_opened().unwrap();
        assert_ne!(first, second);
        assert_eq!(link.closed(), vec![first]);

        session.handle_link_event(first, LinkEvent::Opened, &mut rec);
        assert_eq!(session.status(), ConnectionStatus::Connecting);
        session.handle_link_event(first, LinkEvent::Closed { reason: "late".into() }, &mut rec);
        assert_eq!(session.status(), ConnectionStatus::Connecting);
        assert_eq!(rec.statuses, vec![ConnectionStatus::Connecting]);
    }

    #[test]
    fn test_frames_only_delivered_while_open() {
        let (mut session, link, _) = session();
        let mut rec = Recorder::default();

        session.connect(&mut rec);
        let id = link.last_opened().unwrap();
        session.handle_link_event(id, LinkEvent::Frame("early".into()), &mut rec);
        session.handle_link_event(id, LinkEvent::Opened, &mut rec);
        session.handle_link_event(id, LinkEvent::Frame("a".into()), &mut rec);
        session.handle_link_event(id, LinkEvent::Frame("b".into()), &mut rec);

        assert_eq!(rec.frames, vec!["a", "b"]);
    }

    #[test]
    fn test_disconnect_does_not_schedule_retry() {
        let (mut session, link, scheduler) = session();
        let mut rec = Recorder::default();

        session.connect(&mut rec);
        session.handle_link_event(link.last_opened().unwrap(), LinkEvent::Opened, &mut rec);
        session.disconnect(&mut rec);

        assert_eq!(session.status(), ConnectionStatus::Closed);
        assert!(scheduler.pending().is_empty());
        assert!(!session.send("x", &mut rec));
    }

    #[test]
    fn test_open_failure_takes_retry_path() {
        let (mut session, link, scheduler) = session();
        let mut rec = Recorder::default();
        link.fail_opens(true);

        session.connect(&mut rec);

        assert_eq!(rec.statuses, vec![ConnectionStatus::Connecting, ConnectionStatus::Closed]);
        assert_eq!(scheduler.pending_for(TimerTask::Reconnect).len(), 1);
    }

    #[test]
    fn test_no_retry_when_auto_reconnect_disabled() {
        let link = MockLink::new();
        let scheduler = ManualScheduler::new();
        let mut session = TransportSession::new(
            link.clone(),
            scheduler.clone(),
            SessionConfig {
                backoff_initial: Duration::from_secs(1),
                backoff_max: Duration::from_secs(30),
                auto_reconnect: false,
            },
        );
        let mut rec = Recorder::default();

        session.connect(&mut rec);
        let id = link.last_opened().unwrap();
        session.handle_link_event(id, LinkEvent::Closed { reason: "refused".into() }, &mut rec);

        assert_eq!(session.status(), ConnectionStatus::Closed);
        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn test_foreign_timer_is_not_consumed() {
        let (mut session, _, _) = session();
        let mut rec = Recorder::default();
        assert!(!session.handle_timer(TimerHandle(999), &mut rec));
        assert!(rec.statuses.is_empty());
    }
}
