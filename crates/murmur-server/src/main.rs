//! # murmur-server
//!
//! Relay server for Murmur chat rooms.
//!
//! This binary provides:
//! - **WebSocket fan-out** of chat, typing, presence and key-exchange frames.
//!   Message bodies and sealed keys are relayed without being read.
//! - **History** of recent chat messages for clients that just connected
//! - **Attachment storage** for files shared in the room
//! - **Per-IP and per-user rate limiting** to protect against abuse

mod api;
mod config;
mod error;
mod history;
mod hub;
mod rate_limit;
mod upload_store;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::rate_limit::RateLimiter;
use crate::upload_store::UploadStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur_server=debug")),
        )
        .init();

    info!("Starting Murmur relay server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let uploads = Arc::new(
        UploadStore::new(config.upload_storage_path.clone(), config.max_upload_size).await?,
    );

    // HTTP: 10 req/s sustained, burst of 30
    let rate_limiter = RateLimiter::default();
    let frame_limiter = RateLimiter::for_frames();

    let app_state = AppState {
        hub: Hub::new(config.history_capacity),
        uploads,
        rate_limiter: rate_limiter.clone(),
        frame_limiter: frame_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Every 5 minutes, evict buckets idle for more than 10
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.purge_stale(600.0).await;
            frame_limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server until shutdown
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
