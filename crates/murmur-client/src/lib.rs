//! # murmur-client
//!
//! Real-time messaging client for a Murmur relay.
//!
//! - [`transport`]: connection state machine with reconnect backoff
//! - [`router`]: frame dispatch, typing debounce, history backfill, channel
//!   key distribution
//! - [`keys`]: identity key pairs and channel keys, persisted in
//!   `murmur-store`
//! - [`client`]: the single-task event loop that drives all of the above

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod router;
pub mod scheduler;
pub mod settings;
pub mod transport;
pub mod typing;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
/// Logs go to stderr so they never interleave with chat output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("murmur_client=debug,murmur_store=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
