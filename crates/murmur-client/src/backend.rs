//! HTTP collaborators of the router: history backfill and attachment upload.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use murmur_shared::constants::{HISTORY_PATH, UPLOAD_PATH};
use murmur_shared::frame::ChatMessage;

use crate::error::ClientError;

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Up to `limit` messages, most recent first.
    async fn recent_messages(&self, limit: usize) -> Result<Vec<ChatMessage>, ClientError>;
}

#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    /// Store `data` and return a URL other members can fetch it from.
    async fn upload(&self, file_name: &str, data: Vec<u8>) -> Result<String, ClientError>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// Talks to the relay server's REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let base = Url::parse(server_url)
            .map_err(|e| ClientError::Config(format!("MURMUR_SERVER_URL: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("murmur/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path)
            .map_err(|e| ClientError::Config(format!("bad endpoint {path}: {e}")))
    }
}

#[async_trait]
impl HistorySource for HttpBackend {
    async fn recent_messages(&self, limit: usize) -> Result<Vec<ChatMessage>, ClientError> {
        let url = self.endpoint(HISTORY_PATH)?;
        let messages: Vec<ChatMessage> = self
            .client
            .get(url)
            .query(&[("limit", limit)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(count = messages.len(), "Fetched history");
        Ok(messages)
    }
}

#[async_trait]
impl AttachmentUploader for HttpBackend {
    async fn upload(&self, file_name: &str, data: Vec<u8>) -> Result<String, ClientError> {
        let size = data.len();
        let form = Form::new().part("file", Part::bytes(data).file_name(file_name.to_string()));
        let response: UploadResponse = self
            .client
            .post(self.endpoint(UPLOAD_PATH)?)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(file = file_name, size, url = %response.url, "Uploaded attachment");

        // The server answers with a path; hand out something clickable.
        Ok(self.endpoint(&response.url)?.to_string())
    }
}
