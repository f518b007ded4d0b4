//! WebSocket [`Link`] on tokio-tungstenite.
//!
//! Each `open` spawns one task that owns the socket for that
//! [`ConnectionId`]: it connects, pumps outbound text from an unbounded
//! queue, forwards inbound text frames to the client event loop, and reports
//! a single `Closed` when it ends. `close` aborts the task, after which
//! nothing more is reported for that id.

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use murmur_shared::constants::{MAX_FRAME_SIZE, WS_PATH};
use murmur_shared::types::UserId;

use super::{ConnectionId, Link, LinkEvent};
use crate::client::ClientEvent;
use crate::error::TransportError;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// `http(s)://host[:port]` → `ws(s)://host[:port]/ws?username=<user>`
pub fn websocket_url(server_url: &str, username: &UserId) -> Result<Url, TransportError> {
    let base = Url::parse(server_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    let mut url = base
        .join(WS_PATH)
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::InvalidUrl(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(format!("cannot use scheme {scheme}")))?;
    url.query_pairs_mut().append_pair("username", username.as_str());
    Ok(url)
}

struct ActiveSocket {
    id: ConnectionId,
    outgoing: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

pub struct WsLink {
    url: Url,
    events: mpsc::UnboundedSender<ClientEvent>,
    active: Option<ActiveSocket>,
}

impl WsLink {
    pub fn new(url: Url, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            url,
            events,
            active: None,
        }
    }

    fn shutdown_active(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(connection = %active.id, "Aborting socket task");
            active.task.abort();
        }
    }
}

impl Link for WsLink {
    fn open(&mut self, id: ConnectionId) -> Result<(), TransportError> {
        self.shutdown_active();

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            self.url.clone(),
            id,
            outgoing_rx,
            self.events.clone(),
        ));
        self.active = Some(ActiveSocket { id, outgoing, task });
        Ok(())
    }

    fn send(&mut self, id: ConnectionId, text: &str) -> Result<(), TransportError> {
        match &self.active {
            Some(active) if active.id == id => active
                .outgoing
                .send(text.to_string())
                .map_err(|_| TransportError::LinkClosed),
            _ => Err(TransportError::LinkClosed),
        }
    }

    fn close(&mut self, id: ConnectionId) {
        if self.active.as_ref().is_some_and(|active| active.id == id) {
            self.shutdown_active();
        }
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.shutdown_active();
    }
}

async fn run_socket(
    url: Url,
    id: ConnectionId,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    info!(connection = %id, url = %url, "Connecting");

    let reason = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => {
            let _ = events.send(ClientEvent::Link {
                id,
                event: LinkEvent::Opened,
            });
            pump(socket, id, &mut outgoing, &events).await
        }
        Err(e) => format!("connect failed: {e}"),
    };

    let _ = events.send(ClientEvent::Link {
        id,
        event: LinkEvent::Closed { reason },
    });
}

/// Runs until the socket ends; returns why.
async fn pump(
    socket: Socket,
    id: ConnectionId,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<ClientEvent>,
) -> String {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            next = outgoing.recv() => match next {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        return format!("send failed: {e}");
                    }
                }
                None => {
                    let _ = write.close().await;
                    return "closed locally".to_string();
                }
            },

            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > MAX_FRAME_SIZE {
                        warn!(connection = %id, size = text.len(), "Oversized frame dropped");
                        continue;
                    }
                    if events.send(ClientEvent::Link { id, event: LinkEvent::Frame(text) }).is_err() {
                        return "client stopped".to_string();
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        return format!("pong failed: {e}");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return frame
                        .map(|f| format!("closed by server: {}", f.reason))
                        .unwrap_or_else(|| "closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return e.to_string(),
                None => return "connection lost".to_string(),
            },
        }
    }
}
