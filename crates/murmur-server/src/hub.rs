//! Fan-out of frames between connected sockets.
//!
//! Every socket task holds a [`broadcast::Receiver`] of [`Delivery`] values
//! and decides per delivery whether (and how) it reaches its user. The hub
//! never inspects message bodies: encrypted content and sealed keys pass
//! through as opaque strings.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use murmur_shared::frame::{ChatMessage, Frame, PresenceFrame, TypingFrame};
use murmur_shared::types::PresenceStatus;

use crate::error::ServerError;
use crate::history::History;

/// Broadcast buffer per receiver before it starts lagging.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    AllBut(String),
    Only(String),
}

impl Audience {
    fn includes(&self, username: &str) -> bool {
        match self {
            Self::Everyone => true,
            Self::AllBut(excluded) => excluded != username,
            Self::Only(recipient) => recipient == username,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Delivery {
    /// Pre-serialized frame for part of the room.
    Frame { text: Arc<str>, audience: Audience },
    /// Everyone currently typing; each socket renders it without its own user.
    Typing(Arc<BTreeSet<String>>),
}

impl Delivery {
    /// The text to write to `username`'s socket, if any.
    pub fn render_for(&self, username: &str) -> Result<Option<String>, ServerError> {
        match self {
            Self::Frame { text, audience } => {
                Ok(audience.includes(username).then(|| text.to_string()))
            }
            Self::Typing(typing) => {
                let others: Vec<&str> = typing
                    .iter()
                    .map(String::as_str)
                    .filter(|name| *name != username)
                    .collect();
                let frame = Frame::Typing(TypingFrame::indicator(typing_indicator(&others)));
                Ok(Some(frame.to_json()?))
            }
        }
    }
}

/// "alice is typing...", "alice and bob are typing...", or a summary.
pub fn typing_indicator(names: &[&str]) -> String {
    match names {
        [] => String::new(),
        [one] => format!("{one} is typing..."),
        [first, second] => format!("{first} and {second} are typing..."),
        _ => "several people are typing...".to_string(),
    }
}

#[derive(Debug)]
struct HubState {
    history: History,
    /// Open sockets per user; presence flips on the first and last one.
    connections: HashMap<String, usize>,
    typing: BTreeSet<String>,
}

#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<Delivery>,
    state: Arc<Mutex<HubState>>,
}

impl Hub {
    pub fn new(history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            state: Arc::new(Mutex::new(HubState {
                history: History::new(history_capacity),
                connections: HashMap::new(),
                typing: BTreeSet::new(),
            })),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, HubState>, ServerError> {
        self.state
            .lock()
            .map_err(|_| ServerError::Internal("hub state poisoned".to_string()))
    }

    /// Register a socket for `username`. Subscribes before announcing so the
    /// new socket sees everything that follows its own presence frame.
    pub fn join(&self, username: &str) -> Result<broadcast::Receiver<Delivery>, ServerError> {
        let rx = self.tx.subscribe();
        let first = {
            let mut state = self.state()?;
            let count = state.connections.entry(username.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first {
            info!(user = username, "User online");
            self.publish(
                &Frame::Presence(PresenceFrame {
                    username: username.to_string(),
                    status: PresenceStatus::Online,
                }),
                Audience::AllBut(username.to_string()),
            )?;
        }
        Ok(rx)
    }

    pub fn leave(&self, username: &str) -> Result<(), ServerError> {
        let (last, typing) = {
            let mut state = self.state()?;
            let Some(count) = state.connections.get_mut(username) else {
                return Ok(());
            };
            *count -= 1;
            let last = *count == 0;
            if last {
                state.connections.remove(username);
            }
            let typing = (last && state.typing.remove(username)).then(|| state.typing.clone());
            (last, typing)
        };

        if last {
            info!(user = username, "User offline");
            self.publish(
                &Frame::Presence(PresenceFrame {
                    username: username.to_string(),
                    status: PresenceStatus::Offline,
                }),
                Audience::AllBut(username.to_string()),
            )?;
        }
        if let Some(typing) = typing {
            self.send(Delivery::Typing(Arc::new(typing)));
        }
        Ok(())
    }

    /// Route one frame sent by `username`.
    pub fn handle_frame(&self, username: &str, text: &str) -> Result<(), ServerError> {
        let frame = Frame::from_json(text)?;
        debug!(user = username, kind = frame.kind(), "Inbound frame");

        match frame {
            Frame::Message(message) => {
                let stamped = ChatMessage {
                    content: message.content,
                    username: username.to_string(),
                    created_at: Utc::now(),
                    encrypted: message.encrypted,
                };
                let was_typing = {
                    let mut state = self.state()?;
                    state.history.push(stamped.clone());
                    state.typing.remove(username).then(|| state.typing.clone())
                };
                self.publish(&Frame::Message(stamped), Audience::Everyone)?;
                if let Some(typing) = was_typing {
                    self.send(Delivery::Typing(Arc::new(typing)));
                }
            }
            Frame::Typing(TypingFrame {
                is_typing: Some(is_typing),
                ..
            }) => {
                let changed = {
                    let mut state = self.state()?;
                    let changed = if is_typing {
                        state.typing.insert(username.to_string())
                    } else {
                        state.typing.remove(username)
                    };
                    changed.then(|| state.typing.clone())
                };
                if let Some(typing) = changed {
                    self.send(Delivery::Typing(Arc::new(typing)));
                }
            }
            Frame::KeyRequest(mut request) => {
                request.username = username.to_string();
                self.publish(
                    &Frame::KeyRequest(request),
                    Audience::AllBut(username.to_string()),
                )?;
            }
            Frame::KeyShare(share) => {
                let recipient = share.recipient.clone();
                debug!(from = username, to = %recipient, "Relaying key share");
                self.publish(&Frame::KeyShare(share), Audience::Only(recipient))?;
            }
            other => debug!(user = username, kind = other.kind(), "Ignoring client frame"),
        }
        Ok(())
    }

    /// Up to `limit` chat messages, most recent first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, ServerError> {
        Ok(self.state()?.history.recent(limit))
    }

    pub fn history_len(&self) -> Result<usize, ServerError> {
        Ok(self.state()?.history.len())
    }

    pub fn online_users(&self) -> Result<Vec<String>, ServerError> {
        let mut users: Vec<String> = self.state()?.connections.keys().cloned().collect();
        users.sort();
        Ok(users)
    }

    fn publish(&self, frame: &Frame, audience: Audience) -> Result<(), ServerError> {
        let text: Arc<str> = frame.to_json()?.into();
        self.send(Delivery::Frame { text, audience });
        Ok(())
    }

    fn send(&self, delivery: Delivery) {
        // No receivers just means nobody is connected.
        let _ = self.tx.send(delivery);
    }
}
