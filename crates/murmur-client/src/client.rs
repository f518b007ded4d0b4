//! The client event loop.
//!
//! One task owns the [`MessageRouter`] and consumes a single queue. Socket
//! tasks, timers and the user all post [`ClientEvent`]s into it, so no lock
//! guards session state and events are handled strictly in arrival order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use murmur_shared::identity;
use murmur_store::{Database, KeyValueStore};

use crate::backend::HttpBackend;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::Presenter;
use crate::keys::KeyManager;
use crate::router::{Collaborators, MessageRouter, RouterConfig};
use crate::scheduler::{Scheduler, TimerHandle, TimerTask, TokioScheduler};
use crate::settings::Settings;
use crate::transport::ws::{websocket_url, WsLink};
use crate::transport::{ConnectionId, Link, LinkEvent};

#[derive(Debug)]
pub enum ClientEvent {
    Link { id: ConnectionId, event: LinkEvent },
    Timer { handle: TimerHandle, task: TimerTask },
    Command(Command),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendMessage(String),
    SetTyping(bool),
    /// Retry now with the backoff reset
    Reconnect,
    Disconnect,
    SendAttachment { name: String, data: Vec<u8> },
    RequestChannelKey,
    CreateChannelKey,
    ShareChannelKey(String),
    RotateIdentity,
    Shutdown,
}

/// Cheap, cloneable way in from the outside.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientHandle {
    pub fn send(&self, command: Command) -> Result<(), ClientError> {
        self.events
            .send(ClientEvent::Command(command))
            .map_err(|_| ClientError::Stopped)
    }
}

pub struct EventLoop<L, S> {
    router: MessageRouter<L, S>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl<L: Link, S: Scheduler> EventLoop<L, S> {
    pub fn new(router: MessageRouter<L, S>, events: mpsc::UnboundedReceiver<ClientEvent>) -> Self {
        Self { router, events }
    }

    /// Connect, then process events until `Shutdown` or until every sender
    /// is gone. Returns the router for inspection.
    pub async fn run(mut self) -> MessageRouter<L, S> {
        self.router.connect().await;

        while let Some(event) = self.events.recv().await {
            match event {
                ClientEvent::Link { id, event } => self.router.handle_link_event(id, event).await,
                ClientEvent::Timer { handle, task } => self.router.handle_timer(handle, task).await,
                ClientEvent::Command(Command::Shutdown) => {
                    self.router.disconnect().await;
                    break;
                }
                ClientEvent::Command(command) => self.execute(command).await,
            }
        }

        info!("Event loop stopped");
        self.router
    }

    async fn execute(&mut self, command: Command) {
        let result = match command {
            Command::SendMessage(text) => match self.router.send_chat_message(&text).await {
                Ok(true) => Ok(()),
                Ok(false) => Err("Message was not delivered".to_string()),
                Err(e) => Err(e.to_string()),
            },
            Command::SetTyping(is_typing) => {
                self.router.set_typing(is_typing).await;
                Ok(())
            }
            Command::Reconnect => {
                self.router.manual_reconnect().await;
                Ok(())
            }
            Command::Disconnect => {
                self.router.disconnect().await;
                Ok(())
            }
            Command::SendAttachment { name, data } => self
                .router
                .send_attachment(&name, data)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Command::RequestChannelKey => self
                .router
                .request_channel_key()
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Command::CreateChannelKey => self.router.create_channel_key().map_err(|e| e.to_string()),
            Command::ShareChannelKey(username) => self
                .router
                .share_channel_key_with(&username)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Command::RotateIdentity => self.router.rotate_identity().await.map_err(|e| e.to_string()),
            Command::Shutdown => Ok(()),
        };

        if let Err(message) = result {
            warn!(error = %message, "Command failed");
            self.router.report_error(&message);
        }
    }
}

/// Wire a production client together and start its event loop.
pub async fn start(
    config: ClientConfig,
    presenter: Box<dyn Presenter>,
) -> Result<(ClientHandle, JoinHandle<MessageRouter<WsLink, TokioScheduler>>), ClientError> {
    let data_dir = config.resolve_data_dir()?;
    let store: Arc<dyn KeyValueStore> = Arc::new(Database::new(&data_dir)?);
    let settings = Settings::load(&store, &config.device)?;

    let keys = KeyManager::new(Arc::clone(&store));
    let identity = keys.get_or_create_identity_key_pair(&config.username).await?;
    info!(
        user = %config.username,
        fingerprint = %identity::fingerprint(&identity.public_key_pem()?)?,
        "Identity ready"
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let url = websocket_url(&config.server_url, &config.username)?;
    let link = WsLink::new(url, events_tx.clone());
    let scheduler = TokioScheduler::new(events_tx.clone());
    let backend = Arc::new(HttpBackend::new(&config.server_url)?);

    let router = MessageRouter::new(
        RouterConfig::from(&config),
        link,
        scheduler,
        keys,
        identity,
        settings,
        Collaborators {
            history: backend.clone(),
            uploader: backend,
            presenter,
        },
    )?;

    let task = tokio::spawn(EventLoop::new(router, events_rx).run());
    Ok((ClientHandle { events: events_tx }, task))
}
