use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::Method,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_shared::constants::{
    DEFAULT_HISTORY_LIMIT, HISTORY_PATH, MAX_FRAME_SIZE, UPLOAD_PATH, WS_PATH,
};
use murmur_shared::frame::ChatMessage;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::Hub;
use crate::rate_limit::{rate_limit_middleware, RateKey, RateLimiter};
use crate::upload_store::UploadStore;

/// Hard cap on `?limit=` for the history endpoint.
const MAX_HISTORY_PAGE: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub uploads: Arc<UploadStore>,
    pub rate_limiter: RateLimiter,
    pub frame_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Multipart framing adds a little on top of the file itself.
    let body_limit = state.uploads.max_size() + 64 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route(HISTORY_PATH, get(recent_messages))
        .route(UPLOAD_PATH, post(upload))
        .route("/api/uploads/:id", get(download))
        .route(WS_PATH, get(ws_upgrade))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online: usize,
    stored_messages: usize,
    max_upload_size: usize,
}

#[derive(Serialize)]
struct UploadResponse {
    id: Uuid,
    url: String,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct ConnectQuery {
    #[serde(default)]
    username: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Result<Json<ServerInfoResponse>, ServerError> {
    Ok(Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online: state.hub.online_users()?.len(),
        stored_messages: state.hub.history_len()?,
        max_upload_size: state.uploads.max_size(),
    }))
}

async fn recent_messages(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_PAGE);
    Ok(Json(state.hub.recent(limit)?))
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("attachment").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;

            let id = state.uploads.store(&data).await?;
            info!(id = %id, file = %file_name, size = data.len(), "Attachment uploaded");

            return Ok(Json(UploadResponse {
                id,
                url: format!("/api/uploads/{id}"),
            }));
        }
    }

    Err(ServerError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

async fn download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Vec<u8>, ServerError> {
    state.uploads.get(id).await
}

async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ServerError> {
    let username = query.username.trim().to_string();
    if username.is_empty() {
        return Err(ServerError::BadRequest("username is required".to_string()));
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    Ok(ws
        .max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| run_socket(socket, state, username)))
}

/// Pump one socket until either side goes away.
async fn run_socket(socket: WebSocket, state: AppState, username: String) {
    let mut deliveries = match state.hub.join(&username) {
        Ok(rx) => rx,
        Err(e) => {
            warn!(user = %username, error = %e, "Could not register socket");
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();
    debug!(user = %username, "Socket opened");

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !state.frame_limiter.check(RateKey::User(username.clone())).await {
                        warn!(user = %username, "Dropping frame over rate limit");
                        continue;
                    }
                    if let Err(e) = state.hub.handle_frame(&username, &text) {
                        debug!(user = %username, error = %e, "Rejected frame");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(user = %username, error = %e, "Socket error");
                    break;
                }
            },
            delivery = deliveries.recv() => match delivery {
                Ok(delivery) => match delivery.render_for(&username) {
                    Ok(Some(text)) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Could not render delivery"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user = %username, skipped, "Socket fell behind, frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Err(e) = state.hub.leave(&username) {
        warn!(user = %username, error = %e, "Could not unregister socket");
    }
    debug!(user = %username, "Socket closed");
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use murmur_shared::frame::Frame;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_state() -> (AppState, TempDir) {
        let dir = TempDir::new().unwrap();
        let uploads = UploadStore::new(dir.path().to_path_buf(), 1024).await.unwrap();
        let state = AppState {
            hub: Hub::new(100),
            uploads: Arc::new(uploads),
            rate_limiter: RateLimiter::default(),
            frame_limiter: RateLimiter::for_frames(),
            config: Arc::new(ServerConfig::default()),
        };
        (state, dir)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn multipart_request(field: &str, data: &[u8]) -> Request<Body> {
        let boundary = "murmur-test-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"cat.png\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri(UPLOAD_PATH)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _dir) = test_state().await;
        let response = build_router(state)
            .oneshot(get_request("/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_history_returns_relayed_messages_newest_first() {
        let (state, _dir) = test_state().await;
        let _rx = state.hub.join("alice").unwrap();
        for content in ["one", "two", "three"] {
            let frame = Frame::Message(ChatMessage {
                content: content.into(),
                username: "alice".into(),
                created_at: chrono::Utc::now(),
                encrypted: false,
            });
            state
                .hub
                .handle_frame("alice", &frame.to_json().unwrap())
                .unwrap();
        }

        let response = build_router(state)
            .oneshot(get_request("/api/messages?limit=2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let contents: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap())
            .collect();
        assert_eq!(contents, vec!["three", "two"]);
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let (state, _dir) = test_state().await;
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(multipart_request("file", b"meow"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let url = body_json(response).await["url"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(url.starts_with("/api/uploads/"));

        let response = app.oneshot(get_request(&url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"meow");
    }

    #[tokio::test]
    async fn test_upload_errors_are_json() {
        let (state, _dir) = test_state().await;
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(multipart_request("other", b"meow"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("file"));

        let missing = format!("/api/uploads/{}", Uuid::new_v4());
        let response = app.oneshot(get_request(&missing)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_websocket_requires_username() {
        let (state, _dir) = test_state().await;
        let request = Request::builder()
            .uri("/ws?username=%20")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();

        let response = build_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
