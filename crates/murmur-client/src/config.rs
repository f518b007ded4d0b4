//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so `murmur` starts against a local relay with
//! no configuration at all.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use murmur_shared::constants::{
    DEFAULT_BACKOFF_INITIAL_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_HISTORY_LIMIT,
    DEFAULT_HTTP_PORT, DEFAULT_TYPING_DEBOUNCE_MS,
};
use murmur_shared::types::{ChannelId, UserId};
use murmur_store::{Database, StoreError};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the relay server; the WebSocket URL is derived from it.
    /// Env: `MURMUR_SERVER_URL`
    /// Default: `http://127.0.0.1:8080`
    pub server_url: String,

    /// Opaque identity issued by whoever runs the relay.
    /// Env: `MURMUR_USERNAME`, falling back to `USER`
    pub username: UserId,

    /// Names the per-device settings namespace.
    /// Env: `MURMUR_DEVICE`
    pub device: String,

    /// Where `murmur.db` lives. `None` means the platform data directory.
    /// Env: `MURMUR_DATA_DIR`
    pub data_dir: Option<PathBuf>,

    /// Env: `MURMUR_BACKOFF_INITIAL_MS`
    pub backoff_initial: Duration,

    /// Env: `MURMUR_BACKOFF_MAX_MS`
    pub backoff_max: Duration,

    /// Env: `MURMUR_TYPING_DEBOUNCE_MS`
    pub typing_debounce: Duration,

    /// Messages requested by the one-time history backfill.
    /// Env: `MURMUR_HISTORY_LIMIT`
    pub history_limit: usize,

    /// Env: `MURMUR_AUTO_RECONNECT` (true/false)
    pub auto_reconnect: bool,

    /// Env: `MURMUR_CHANNEL`
    pub channel: ChannelId,

    /// Seal message bodies with the channel key.
    /// Env: `MURMUR_ENCRYPT` (true/false)
    pub encrypt: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            username: UserId::new("anonymous"),
            device: "default".to_string(),
            data_dir: None,
            backoff_initial: Duration::from_millis(DEFAULT_BACKOFF_INITIAL_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            typing_debounce: Duration::from_millis(DEFAULT_TYPING_DEBOUNCE_MS),
            history_limit: DEFAULT_HISTORY_LIMIT,
            auto_reconnect: true,
            channel: ChannelId::default(),
            encrypt: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("MURMUR_SERVER_URL") {
            config.server_url = url.trim_end_matches('/').to_string();
        }

        match lookup("MURMUR_USERNAME").or_else(|| lookup("USER")) {
            Some(name) if !name.trim().is_empty() => config.username = UserId::new(name.trim()),
            _ => {}
        }

        if let Some(device) = lookup("MURMUR_DEVICE") {
            config.device = device;
        }

        if let Some(dir) = lookup("MURMUR_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "MURMUR_BACKOFF_INITIAL_MS") {
            config.backoff_initial = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "MURMUR_BACKOFF_MAX_MS") {
            config.backoff_max = Duration::from_millis(ms);
        }

        if config.backoff_max < config.backoff_initial {
            tracing::warn!(
                initial = ?config.backoff_initial,
                max = ?config.backoff_max,
                "Backoff maximum below initial delay, clamping"
            );
            config.backoff_max = config.backoff_initial;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "MURMUR_TYPING_DEBOUNCE_MS") {
            config.typing_debounce = Duration::from_millis(ms);
        }

        if let Some(limit) = parse_var::<usize>(&lookup, "MURMUR_HISTORY_LIMIT") {
            config.history_limit = limit;
        }

        if let Some(val) = lookup("MURMUR_AUTO_RECONNECT") {
            config.auto_reconnect = val != "false" && val != "0";
        }

        if let Some(channel) = lookup("MURMUR_CHANNEL") {
            if !channel.trim().is_empty() {
                config.channel = ChannelId::new(channel.trim());
            }
        }

        if let Some(val) = lookup("MURMUR_ENCRYPT") {
            config.encrypt = val == "true" || val == "1";
        }

        config
    }

    /// `data_dir` if set, otherwise the platform data directory.
    pub fn resolve_data_dir(&self) -> Result<PathBuf, StoreError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Database::default_data_dir(),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(value = %raw, var = name, "Invalid value, using default");
            None
        }
    }
}
