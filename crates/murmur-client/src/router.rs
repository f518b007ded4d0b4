//! Message Router: the layer between the transport session, the key
//! manager and the presentation layer.
//!
//! The session reports into an [`Inbox`] owned by the router; every public
//! operation finishes by draining it, so status changes and frames are
//! handled in the order the session produced them. The one-time history
//! backfill is awaited inside the first `Open`, which holds back every later
//! event until the history has been rendered.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use murmur_shared::crypto::ChannelKey;
use murmur_shared::frame::{
    ChatMessage, Frame, KeyRequestFrame, KeyShareFrame, PresenceFrame, TypingFrame,
};
use murmur_shared::identity::{self, IdentityKeyPair};
use murmur_shared::types::{ChannelId, ConnectionStatus, UserId};

use crate::backend::{AttachmentUploader, HistorySource};
use crate::config::ClientConfig;
use crate::error::{ClientError, InputError};
use crate::events::{ChatEntry, Presenter};
use crate::keys::KeyManager;
use crate::scheduler::{Scheduler, TimerHandle, TimerTask};
use crate::settings::Settings;
use crate::transport::{
    ConnectionId, Link, LinkEvent, SessionConfig, SessionObserver, TransportSession,
};
use crate::typing::TypingDebouncer;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub user: UserId,
    pub channel: ChannelId,
    pub encrypt: bool,
    pub history_limit: usize,
    pub typing_debounce: Duration,
    pub session: SessionConfig,
}

impl From<&ClientConfig> for RouterConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            user: config.username.clone(),
            channel: config.channel.clone(),
            encrypt: config.encrypt,
            history_limit: config.history_limit,
            typing_debounce: config.typing_debounce,
            session: SessionConfig {
                backoff_initial: config.backoff_initial,
                backoff_max: config.backoff_max,
                auto_reconnect: config.auto_reconnect,
            },
        }
    }
}

pub struct Collaborators {
    pub history: Arc<dyn HistorySource>,
    pub uploader: Arc<dyn AttachmentUploader>,
    pub presenter: Box<dyn Presenter>,
}

#[derive(Debug)]
enum Signal {
    Status(ConnectionStatus, Option<String>),
    Frame(String),
}

#[derive(Debug, Default)]
struct Inbox {
    signals: VecDeque<Signal>,
}

impl SessionObserver for Inbox {
    fn on_status_change(&mut self, status: ConnectionStatus, reason: Option<&str>) {
        self.signals
            .push_back(Signal::Status(status, reason.map(str::to_string)));
    }

    fn on_frame(&mut self, text: &str) {
        self.signals.push_back(Signal::Frame(text.to_string()));
    }
}

pub struct MessageRouter<L, S> {
    config: RouterConfig,
    session: TransportSession<L, S>,
    typing: TypingDebouncer<S>,
    keys: KeyManager,
    identity: IdentityKeyPair,
    channel_key: Option<ChannelKey>,
    /// Public keys announced through `key_request`, by username
    known_keys: HashMap<String, String>,
    history: Arc<dyn HistorySource>,
    uploader: Arc<dyn AttachmentUploader>,
    presenter: Box<dyn Presenter>,
    settings: Settings,
    backfilled: bool,
    /// A `key_request` went out and no share has been installed since
    awaiting_key: bool,
    inbox: Inbox,
}

impl<L: Link, S: Scheduler + Clone> MessageRouter<L, S> {
    pub fn new(
        config: RouterConfig,
        link: L,
        scheduler: S,
        keys: KeyManager,
        identity: IdentityKeyPair,
        settings: Settings,
        collaborators: Collaborators,
    ) -> Result<Self, ClientError> {
        let channel_key = keys.channel_key(&config.user, &config.channel)?;
        if channel_key.is_some() {
            debug!(channel = %config.channel, "Loaded channel key");
        }

        Ok(Self {
            session: TransportSession::new(link, scheduler.clone(), config.session),
            typing: TypingDebouncer::new(scheduler, config.typing_debounce),
            config,
            keys,
            identity,
            channel_key,
            known_keys: HashMap::new(),
            history: collaborators.history,
            uploader: collaborators.uploader,
            presenter: collaborators.presenter,
            settings,
            backfilled: false,
            awaiting_key: false,
            inbox: Inbox::default(),
        })
    }
}

impl<L: Link, S: Scheduler> MessageRouter<L, S> {
    pub fn status(&self) -> ConnectionStatus {
        self.session.status()
    }

    pub fn session(&self) -> &TransportSession<L, S> {
        &self.session
    }

    pub fn has_channel_key(&self) -> bool {
        self.channel_key.is_some()
    }

    pub fn user(&self) -> &UserId {
        &self.config.user
    }

    pub async fn connect(&mut self) {
        self.session.connect(&mut self.inbox);
        self.drain().await;
    }

    pub async fn manual_reconnect(&mut self) {
        self.session.manual_reconnect(&mut self.inbox);
        self.drain().await;
    }

    pub async fn disconnect(&mut self) {
        self.session.disconnect(&mut self.inbox);
        self.drain().await;
    }

    pub async fn handle_link_event(&mut self, id: ConnectionId, event: LinkEvent) {
        self.session.handle_link_event(id, event, &mut self.inbox);
        self.drain().await;
    }

    pub async fn handle_timer(&mut self, handle: TimerHandle, task: TimerTask) {
        match task {
            TimerTask::Reconnect => {
                self.session.handle_timer(handle, &mut self.inbox);
            }
            TimerTask::TypingStop => {
                if let Some(is_typing) = self.typing.handle_timer(handle) {
                    self.send_typing(is_typing);
                }
            }
        }
        self.drain().await;
    }

    /// `Ok(false)` means the frame was accepted locally but the transport
    /// failed to carry it.
    pub async fn send_chat_message(&mut self, text: &str) -> Result<bool, InputError> {
        if !self.session.is_open() {
            return Err(InputError::NotConnected);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(InputError::EmptyMessage);
        }

        // A held key always seals; `encrypt` only forbids falling back to plaintext.
        let (content, encrypted) = match &self.channel_key {
            Some(key) => match self.keys.encrypt_with_channel_key(text, key) {
                Ok(sealed) => (sealed, true),
                Err(e) => {
                    warn!(error = %e, "Could not encrypt message");
                    self.presenter.on_error(&format!("Could not encrypt message: {e}"));
                    return Ok(false);
                }
            },
            None if self.config.encrypt => {
                return Err(InputError::MissingChannelKey(self.config.channel.clone()));
            }
            None => (text.to_string(), false),
        };

        let sent = self.send_frame(&Frame::Message(ChatMessage {
            content,
            username: self.config.user.to_string(),
            created_at: Utc::now(),
            encrypted,
        }));
        if sent {
            if let Some(is_typing) = self.typing.set_typing(false) {
                self.send_typing(is_typing);
            }
        }
        self.drain().await;
        Ok(sent)
    }

    /// Keystrokes made while not connected are not recorded, so the first
    /// one after `Open` still announces the start.
    pub async fn set_typing(&mut self, is_typing: bool) {
        if self.session.is_open() {
            if let Some(state) = self.typing.set_typing(is_typing) {
                self.send_typing(state);
            }
        } else {
            self.typing.reset();
        }
        self.drain().await;
    }

    /// Upload `data` and post a chat message carrying its URL.
    pub async fn send_attachment(&mut self, file_name: &str, data: Vec<u8>) -> Result<bool, ClientError> {
        if !self.session.is_open() {
            return Err(InputError::NotConnected.into());
        }
        let url = self.uploader.upload(file_name, data).await?;
        info!(file = file_name, url = %url, "Attachment uploaded");
        Ok(self.send_chat_message(&format!("📎 {file_name} {url}")).await?)
    }

    /// Ask other members to seal the channel key for our identity.
    pub async fn request_channel_key(&mut self) -> Result<bool, ClientError> {
        if !self.session.is_open() {
            return Err(InputError::NotConnected.into());
        }
        let sent = self.send_key_request()?;
        self.drain().await;
        Ok(sent)
    }

    /// Start a fresh key for the channel. Anyone joining later gets it
    /// through `key_request`.
    pub fn create_channel_key(&mut self) -> Result<(), ClientError> {
        let key = self.keys.create_channel_key();
        self.keys
            .store_channel_key(&self.config.user, &self.config.channel, &key)?;
        self.channel_key = Some(key);
        info!(channel = %self.config.channel, "Created channel key");
        self.presenter
            .on_notice(&format!("created a new key for #{}", self.config.channel));
        Ok(())
    }

    /// Seal the channel key for a member whose public key we have seen.
    pub async fn share_channel_key_with(&mut self, username: &str) -> Result<bool, ClientError> {
        if !self.session.is_open() {
            return Err(InputError::NotConnected.into());
        }
        let public_key = self
            .known_keys
            .get(username)
            .cloned()
            .ok_or_else(|| InputError::UnknownRecipient(username.to_string()))?;
        let sent = self.share_key(username, &public_key)?;
        self.drain().await;
        Ok(sent)
    }

    pub async fn rotate_identity(&mut self) -> Result<(), ClientError> {
        self.identity = self
            .keys
            .rotate_identity_key_pair(&self.config.user)
            .await?;
        let fingerprint = identity::fingerprint(&self.identity.public_key_pem()?)?;
        self.presenter
            .on_notice(&format!("new identity key {fingerprint}"));
        Ok(())
    }

    pub fn report_error(&mut self, message: &str) {
        self.presenter.on_error(message);
    }

    fn send_frame(&mut self, frame: &Frame) -> bool {
        match frame.to_json() {
            Ok(json) => self.session.send(&json, &mut self.inbox),
            Err(e) => {
                warn!(kind = frame.kind(), error = %e, "Could not encode frame");
                false
            }
        }
    }

    fn send_typing(&mut self, is_typing: bool) {
        if self.session.is_open() {
            self.send_frame(&Frame::Typing(TypingFrame::state(is_typing)));
        }
    }

    fn send_key_request(&mut self) -> Result<bool, ClientError> {
        let public_key = self.identity.public_key_pem()?;
        debug!(channel = %self.config.channel, "Requesting channel key");
        let sent = self.send_frame(&Frame::KeyRequest(KeyRequestFrame {
            username: self.config.user.to_string(),
            public_key,
        }));
        self.awaiting_key |= sent;
        Ok(sent)
    }

    fn share_key(&mut self, recipient: &str, public_key: &str) -> Result<bool, ClientError> {
        let key = self
            .channel_key
            .as_ref()
            .ok_or_else(|| InputError::MissingChannelKey(self.config.channel.clone()))?;
        let sealed_key = self
            .keys
            .seal_for_recipient(&self.keys.export_channel_key(key), public_key)?;
        debug!(recipient, "Sharing channel key");
        Ok(self.send_frame(&Frame::KeyShare(KeyShareFrame {
            recipient: recipient.to_string(),
            sealed_key,
        })))
    }

    async fn drain(&mut self) {
        while let Some(signal) = self.inbox.signals.pop_front() {
            match signal {
                Signal::Status(status, reason) => self.on_status(status, reason.as_deref()).await,
                Signal::Frame(text) => self.on_frame(&text),
            }
        }
    }

    async fn on_status(&mut self, status: ConnectionStatus, reason: Option<&str>) {
        self.presenter.on_status(status, reason);

        match status {
            ConnectionStatus::Open => {
                if !self.backfilled {
                    self.backfill().await;
                }
                if self.config.encrypt && self.channel_key.is_none() {
                    if let Err(e) = self.send_key_request() {
                        self.presenter.on_error(&e.to_string());
                    }
                }
            }
            ConnectionStatus::Closed => self.typing.reset(),
            ConnectionStatus::Idle | ConnectionStatus::Connecting => {}
        }
    }

    async fn backfill(&mut self) {
        let limit = self.config.history_limit;
        match self.history.recent_messages(limit).await {
            Ok(mut messages) => {
                messages.reverse();
                let entries: Vec<ChatEntry> = messages
                    .into_iter()
                    .filter_map(|m| self.to_entry(m))
                    .collect();
                info!(count = entries.len(), "History loaded");
                self.presenter.on_history(&entries);
                self.backfilled = true;
            }
            Err(e) => {
                warn!(error = %e, "History backfill failed");
                self.presenter
                    .on_error(&format!("Could not load history: {e}"));
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        let frame = match Frame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        match frame {
            Frame::Message(message) => {
                if let Some(entry) = self.to_entry(message) {
                    self.presenter.on_message(&entry);
                    if !entry.own && self.settings.notifications_enabled() {
                        self.presenter.on_notify(&entry);
                    }
                }
            }
            Frame::Typing(TypingFrame { message: Some(indicator), .. }) => {
                self.presenter.on_typing(&indicator);
            }
            Frame::Typing(_) => debug!("Typing frame without indicator"),
            Frame::Presence(PresenceFrame { username, status }) => {
                self.presenter.on_presence(&username, status);
            }
            Frame::KeyRequest(request) => self.on_key_request(request),
            Frame::KeyShare(share) => self.on_key_share(share),
            Frame::Unknown => debug!("Ignoring frame of unknown type"),
        }
    }

    fn on_key_request(&mut self, request: KeyRequestFrame) {
        if request.username == self.config.user.as_str() {
            return;
        }
        self.known_keys
            .insert(request.username.clone(), request.public_key.clone());

        if self.channel_key.is_none() {
            debug!(from = %request.username, "Key requested but none held");
            return;
        }
        if let Err(e) = self.share_key(&request.username, &request.public_key) {
            warn!(from = %request.username, error = %e, "Could not share channel key");
            self.presenter
                .on_error(&format!("Could not share key with {}: {e}", request.username));
        }
    }

    fn on_key_share(&mut self, share: KeyShareFrame) {
        if share.recipient != self.config.user.as_str() {
            return;
        }
        if self.channel_key.is_some() {
            debug!("Already holding a channel key, ignoring share");
            return;
        }
        if !self.awaiting_key {
            warn!("Ignoring unsolicited channel key share");
            return;
        }

        match self.install_shared_key(&share.sealed_key) {
            Ok(()) => {
                info!(channel = %self.config.channel, "Installed shared channel key");
                self.presenter
                    .on_notice(&format!("received the key for #{}", self.config.channel));
            }
            Err(e) => {
                warn!(error = %e, "Could not open shared channel key");
                self.presenter
                    .on_error(&format!("Could not open shared key: {e}"));
            }
        }
    }

    fn install_shared_key(&mut self, sealed_key: &str) -> Result<(), ClientError> {
        let exported = self.keys.open_with_own_key(sealed_key, &self.identity)?;
        let key = self.keys.import_channel_key(&exported)?;
        self.keys
            .store_channel_key(&self.config.user, &self.config.channel, &key)?;
        self.channel_key = Some(key);
        self.awaiting_key = false;
        Ok(())
    }

    /// Decrypt if needed. A message that cannot be read is reported and
    /// never rendered.
    fn to_entry(&mut self, message: ChatMessage) -> Option<ChatEntry> {
        let content = if message.encrypted {
            let Some(key) = self.channel_key.as_ref() else {
                self.presenter.on_error(&format!(
                    "Encrypted message from {} but no key for #{}",
                    message.username, self.config.channel
                ));
                return None;
            };
            match self.keys.decrypt_with_channel_key(&message.content, key) {
                Ok(text) => text,
                Err(e) => {
                    warn!(from = %message.username, error = %e, "Could not decrypt message");
                    self.presenter.on_error(&format!(
                        "Could not decrypt message from {}",
                        message.username
                    ));
                    return None;
                }
            }
        } else {
            message.content
        };

        Some(ChatEntry {
            own: message.username == self.config.user.as_str(),
            username: message.username,
            content,
            created_at: message.created_at,
            encrypted: message.encrypted,
        })
    }
}
