//! In-process [`Link`] for tests. It records every call; tests play the
//! server by feeding [`LinkEvent`](super::LinkEvent)s to the session.

use std::sync::{Arc, Mutex, MutexGuard};

use murmur_shared::frame::Frame;

use super::{ConnectionId, Link};
use crate::error::TransportError;

#[derive(Debug, Default)]
struct MockState {
    opened: Vec<ConnectionId>,
    closed: Vec<ConnectionId>,
    sent: Vec<(ConnectionId, String)>,
    fail_opens: bool,
    fail_sends: bool,
}

/// Cloning shares the recording, so a test keeps one clone while the
/// session owns the other.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fail_opens(&self, fail: bool) {
        self.state().fail_opens = fail;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state().fail_sends = fail;
    }

    pub fn opened(&self) -> Vec<ConnectionId> {
        self.state().opened.clone()
    }

    pub fn last_opened(&self) -> Option<ConnectionId> {
        self.state().opened.last().copied()
    }

    pub fn closed(&self) -> Vec<ConnectionId> {
        self.state().closed.clone()
    }

    /// Raw text of every frame sent, oldest first.
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.iter().map(|(_, text)| text.clone()).collect()
    }

    /// Sent frames that parse, oldest first.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent()
            .iter()
            .filter_map(|text| Frame::from_json(text).ok())
            .collect()
    }

    /// Forget recorded sends.
    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.state().sent)
            .into_iter()
            .map(|(_, text)| text)
            .collect()
    }
}

impl Link for MockLink {
    fn open(&mut self, id: ConnectionId) -> Result<(), TransportError> {
        let mut state = self.state();
        state.opened.push(id);
        if state.fail_opens {
            return Err(TransportError::InvalidUrl("mock refuses to open".into()));
        }
        Ok(())
    }

    fn send(&mut self, id: ConnectionId, text: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.fail_sends {
            return Err(TransportError::SendFailed("mock write error".into()));
        }
        state.sent.push((id, text.to_string()));
        Ok(())
    }

    fn close(&mut self, id: ConnectionId) {
        self.state().closed.push(id);
    }
}
