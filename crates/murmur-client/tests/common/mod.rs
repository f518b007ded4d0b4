#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use murmur_client::backend::{AttachmentUploader, HistorySource};
use murmur_client::error::ClientError;
use murmur_client::events::{ChatEntry, Presenter};
use murmur_client::keys::KeyManager;
use murmur_client::router::{Collaborators, MessageRouter, RouterConfig};
use murmur_client::scheduler::{ManualScheduler, TimerTask};
use murmur_client::settings::{Settings, NOTIFICATIONS_ENABLED};
use murmur_client::transport::mock::MockLink;
use murmur_client::transport::{ConnectionId, LinkEvent, SessionConfig};
use murmur_shared::crypto::ChannelKey;
use murmur_shared::frame::{ChatMessage, Frame};
use murmur_shared::identity::IdentityKeyPair;
use murmur_shared::types::{ChannelId, ConnectionStatus, PresenceStatus, UserId};
use murmur_store::MemoryStore;

/// RSA generation is slow; each test binary generates these once.
pub fn identity(name: &str) -> IdentityKeyPair {
    static ALICE: OnceLock<IdentityKeyPair> = OnceLock::new();
    static BOB: OnceLock<IdentityKeyPair> = OnceLock::new();
    static CAROL: OnceLock<IdentityKeyPair> = OnceLock::new();
    let cell = match name {
        "alice" => &ALICE,
        "bob" => &BOB,
        _ => &CAROL,
    };
    cell.get_or_init(|| IdentityKeyPair::generate().unwrap()).clone()
}

pub fn message(username: &str, content: &str, minute: u32) -> ChatMessage {
    ChatMessage {
        content: content.to_string(),
        username: username.to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
        encrypted: false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shown {
    Status(ConnectionStatus),
    History(Vec<String>),
    Message { username: String, content: String },
    Notify(String),
    Typing(String),
    Presence(String, PresenceStatus),
    Error(String),
    Notice(String),
}

#[derive(Debug, Clone, Default)]
pub struct RecordingPresenter {
    log: Arc<Mutex<Vec<Shown>>>,
}

impl RecordingPresenter {
    fn push(&self, shown: Shown) {
        self.log.lock().unwrap().push(shown);
    }

    pub fn events(&self) -> Vec<Shown> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Shown::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Shown::Message { content, .. } => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Shown::Error(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Shown::Notify(from) => Some(from),
                _ => None,
            })
            .collect()
    }
}

impl Presenter for RecordingPresenter {
    fn on_status(&mut self, status: ConnectionStatus, _reason: Option<&str>) {
        self.push(Shown::Status(status));
    }

    fn on_history(&mut self, entries: &[ChatEntry]) {
        self.push(Shown::History(
            entries.iter().map(|e| e.content.clone()).collect(),
        ));
    }

    fn on_message(&mut self, entry: &ChatEntry) {
        self.push(Shown::Message {
            username: entry.username.clone(),
            content: entry.content.clone(),
        });
    }

    fn on_notify(&mut self, entry: &ChatEntry) {
        self.push(Shown::Notify(entry.username.clone()));
    }

    fn on_typing(&mut self, indicator: &str) {
        self.push(Shown::Typing(indicator.to_string()));
    }

    fn on_presence(&mut self, username: &str, status: PresenceStatus) {
        self.push(Shown::Presence(username.to_string(), status));
    }

    fn on_error(&mut self, message: &str) {
        self.push(Shown::Error(message.to_string()));
    }

    fn on_notice(&mut self, message: &str) {
        self.push(Shown::Notice(message.to_string()));
    }
}

/// History collaborator returning a fixed page, most recent first.
pub struct StaticHistory {
    messages: Vec<ChatMessage>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl HistorySource for StaticHistory {
    async fn recent_messages(&self, limit: usize) -> Result<Vec<ChatMessage>, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ClientError::Config("history unavailable".into()));
        }
        Ok(self.messages.iter().take(limit).cloned().collect())
    }
}

pub struct FakeUploader {
    uploads: Arc<Mutex<Vec<(String, usize)>>>,
}

#[async_trait]
impl AttachmentUploader for FakeUploader {
    async fn upload(&self, file_name: &str, data: Vec<u8>) -> Result<String, ClientError> {
        self.uploads
            .lock()
            .unwrap()
            .push((file_name.to_string(), data.len()));
        Ok(format!("http://relay.test/api/uploads/{file_name}"))
    }
}

pub struct Options {
    pub user: &'static str,
    pub encrypt: bool,
    pub channel_key: Option<ChannelKey>,
    /// Most recent first, as the server returns it
    pub history: Vec<ChatMessage>,
    pub fail_history: bool,
    pub notifications: bool,
    pub auto_reconnect: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            user: "alice",
            encrypt: false,
            channel_key: None,
            history: Vec::new(),
            fail_history: false,
            notifications: true,
            auto_reconnect: true,
        }
    }
}

pub struct Harness {
    pub router: MessageRouter<MockLink, ManualScheduler>,
    pub link: MockLink,
    pub scheduler: ManualScheduler,
    pub presenter: RecordingPresenter,
    pub history_calls: Arc<AtomicUsize>,
    pub uploads: Arc<Mutex<Vec<(String, usize)>>>,
    pub keys: KeyManager,
}

impl Harness {
    pub fn new(options: Options) -> Self {
        let user = UserId::new(options.user);
        let channel = ChannelId::default();
        let keys = KeyManager::new(Arc::new(MemoryStore::new()));
        if let Some(key) = &options.channel_key {
            keys.store_channel_key(&user, &channel, key).unwrap();
        }

        let link = MockLink::new();
        let scheduler = ManualScheduler::new();
        let presenter = RecordingPresenter::default();
        let history_calls = Arc::new(AtomicUsize::new(0));
        let uploads = Arc::new(Mutex::new(Vec::new()));

        let settings = Settings::default().with(
            NOTIFICATIONS_ENABLED,
            if options.notifications { "true" } else { "false" },
        );

        let router = MessageRouter::new(
            RouterConfig {
                user,
                channel,
                encrypt: options.encrypt,
                history_limit: 50,
                typing_debounce: Duration::from_secs(1),
                session: SessionConfig {
                    backoff_initial: Duration::from_secs(1),
                    backoff_max: Duration::from_secs(30),
                    auto_reconnect: options.auto_reconnect,
                },
            },
            link.clone(),
            scheduler.clone(),
            keys.clone(),
            identity(options.user),
            settings,
            Collaborators {
                history: Arc::new(StaticHistory {
                    messages: options.history,
                    fail: options.fail_history,
                    calls: Arc::clone(&history_calls),
                }),
                uploader: Arc::new(FakeUploader {
                    uploads: Arc::clone(&uploads),
                }),
                presenter: Box::new(presenter.clone()),
            },
        )
        .unwrap();

        Self {
            router,
            link,
            scheduler,
            presenter,
            history_calls,
            uploads,
            keys,
        }
    }

    pub fn current(&self) -> ConnectionId {
        self.router.session().connection_id().expect("no live connection")
    }

    /// Connect and complete the handshake.
    pub async fn open(&mut self) -> ConnectionId {
        self.router.connect().await;
        let id = self.current();
        self.router.handle_link_event(id, LinkEvent::Opened).await;
        id
    }

    pub async fn deliver(&mut self, frame: &Frame) {
        self.deliver_raw(&frame.to_json().unwrap()).await;
    }

    pub async fn deliver_raw(&mut self, text: &str) {
        let id = self.current();
        self.router
            .handle_link_event(id, LinkEvent::Frame(text.to_string()))
            .await;
    }

    pub async fn drop_connection(&mut self, reason: &str) {
        let id = self.current();
        self.router
            .handle_link_event(
                id,
                LinkEvent::Closed {
                    reason: reason.to_string(),
                },
            )
            .await;
    }

    /// Expire the oldest pending timer for `task`. Returns whether one was armed.
    pub async fn fire(&mut self, task: TimerTask) -> bool {
        match self.scheduler.fire(task) {
            Some(timer) => {
                self.router.handle_timer(timer.handle, timer.task).await;
                true
            }
            None => false,
        }
    }

    /// Frames sent since the last call.
    pub fn take_frames(&self) -> Vec<Frame> {
        self.link
            .take_sent()
            .iter()
            .map(|text| Frame::from_json(text).unwrap())
            .collect()
    }
}
