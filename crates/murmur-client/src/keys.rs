//! Key Manager: identity key pairs and channel keys.
//!
//! Identity pairs are persisted as PEM under `identity:<user>`, channel keys
//! as base64 under `channel-keys:<user>` keyed by channel id. Everything
//! handed out is a copy; nothing here keeps references into the store.

use std::sync::Arc;

use tracing::{debug, info};

use murmur_shared::crypto::{self, ChannelKey};
use murmur_shared::error::CryptoError;
use murmur_shared::identity::{self, IdentityExport, IdentityKeyPair};
use murmur_shared::types::{ChannelId, UserId};
use murmur_store::{KeyValueStore, Namespace};

use crate::error::ClientError;

const IDENTITY_KEY: &str = "keypair";

#[derive(Clone)]
pub struct KeyManager {
    store: Arc<dyn KeyValueStore>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The user's persisted identity, generating and persisting one on first
    /// use. Generation runs on a blocking worker.
    pub async fn get_or_create_identity_key_pair(
        &self,
        user: &UserId,
    ) -> Result<IdentityKeyPair, ClientError> {
        let namespace = Namespace::Identity(user.clone()).to_string();
        if let Some(export) = self.store.get_json::<IdentityExport>(&namespace, IDENTITY_KEY)? {
            debug!(user = %user, "Loaded identity key pair");
            return Ok(IdentityKeyPair::from_export(&export)?);
        }

        info!(user = %user, "No identity key pair, generating one");
        self.generate_and_store(user).await
    }

    /// Replace the user's identity. Channel keys sealed for the old public
    /// key can no longer be opened.
    pub async fn rotate_identity_key_pair(
        &self,
        user: &UserId,
    ) -> Result<IdentityKeyPair, ClientError> {
        info!(user = %user, "Rotating identity key pair");
        self.generate_and_store(user).await
    }

    async fn generate_and_store(&self, user: &UserId) -> Result<IdentityKeyPair, ClientError> {
        let pair = tokio::task::spawn_blocking(IdentityKeyPair::generate).await??;
        let namespace = Namespace::Identity(user.clone()).to_string();
        self.store
            .put_json(&namespace, IDENTITY_KEY, &pair.to_export()?)?;
        Ok(pair)
    }

    /// RSA-OAEP/SHA-256 seal for `recipient_public_key` (SPKI PEM), base64.
    pub fn seal_for_recipient(
        &self,
        plaintext: &str,
        recipient_public_key: &str,
    ) -> Result<String, CryptoError> {
        identity::seal(plaintext.as_bytes(), recipient_public_key)
    }

    pub fn open_with_own_key(
        &self,
        ciphertext: &str,
        own: &IdentityKeyPair,
    ) -> Result<String, CryptoError> {
        let bytes = own.open(ciphertext)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::DecryptionFailed)
    }

    pub fn create_channel_key(&self) -> ChannelKey {
        ChannelKey::generate()
    }

    pub fn export_channel_key(&self, key: &ChannelKey) -> String {
        key.export()
    }

    pub fn import_channel_key(&self, encoded: &str) -> Result<ChannelKey, CryptoError> {
        ChannelKey::import(encoded)
    }

    pub fn encrypt_with_channel_key(
        &self,
        plaintext: &str,
        key: &ChannelKey,
    ) -> Result<String, CryptoError> {
        crypto::encrypt_text(key, plaintext)
    }

    pub fn decrypt_with_channel_key(
        &self,
        ciphertext: &str,
        key: &ChannelKey,
    ) -> Result<String, CryptoError> {
        crypto::decrypt_text(key, ciphertext)
    }

    pub fn store_channel_key(
        &self,
        user: &UserId,
        channel: &ChannelId,
        key: &ChannelKey,
    ) -> Result<(), ClientError> {
        let namespace = Namespace::ChannelKeys(user.clone()).to_string();
        self.store.put(&namespace, channel.as_str(), &key.export())?;
        debug!(user = %user, channel = %channel, "Stored channel key");
        Ok(())
    }

    pub fn channel_key(
        &self,
        user: &UserId,
        channel: &ChannelId,
    ) -> Result<Option<ChannelKey>, ClientError> {
        let namespace = Namespace::ChannelKeys(user.clone()).to_string();
        match self.store.get(&namespace, channel.as_str())? {
            Some(encoded) => Ok(Some(ChannelKey::import(&encoded)?)),
            None => Ok(None),
        }
    }

    /// Channels the user holds a key for.
    pub fn channels(&self, user: &UserId) -> Result<Vec<ChannelId>, ClientError> {
        let namespace = Namespace::ChannelKeys(user.clone()).to_string();
        Ok(self
            .store
            .keys(&namespace)?
            .into_iter()
            .map(ChannelId::new)
            .collect())
    }
}
