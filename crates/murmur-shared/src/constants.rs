/// Application name
pub const APP_NAME: &str = "Murmur";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric channel key size in bytes (256-bit)
pub const CHANNEL_KEY_SIZE: usize = 32;

/// RSA modulus size for identity key pairs
pub const IDENTITY_KEY_BITS: usize = 2048;

/// Largest plaintext RSA-OAEP/SHA-256 can seal under a 2048-bit key:
/// k - 2*hLen - 2 = 256 - 64 - 2
pub const MAX_SEAL_SIZE: usize = IDENTITY_KEY_BITS / 8 - 2 * 32 - 2;

/// Maximum frame size accepted on either side of the socket (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Default HTTP/WebSocket port of the relay server
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// WebSocket path on the relay server
pub const WS_PATH: &str = "/ws";

/// History backfill path on the relay server
pub const HISTORY_PATH: &str = "/api/messages";

/// Attachment upload path on the relay server
pub const UPLOAD_PATH: &str = "/api/upload";

/// Default reconnect delays in milliseconds
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Inactivity window after which a "stopped typing" frame is emitted
pub const DEFAULT_TYPING_DEBOUNCE_MS: u64 = 1_000;

/// Number of messages requested by the initial history backfill
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
