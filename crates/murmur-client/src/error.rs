use thiserror::Error;

use murmur_shared::error::{CryptoError, FrameError};
use murmur_shared::types::ChannelId;
use murmur_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Client event loop has stopped")]
    Stopped,
}

/// Local rejections raised before anything reaches the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Not connected")]
    NotConnected,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("No public key known for {0}")]
    UnknownRecipient(String),

    #[error("No key for channel {0}")]
    MissingChannelKey(ChannelId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Connection is not open")]
    LinkClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),
}
