//! The namespaced key-value contract shared by every store backend.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use murmur_shared::types::UserId;

use crate::error::{Result, StoreError};

/// Namespaced string key-value storage.
///
/// Implementations must be usable from the client's event-loop task, hence
/// `Send + Sync`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;

    /// Returns `true` if an entry was removed.
    fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// All keys in a namespace, sorted.
    fn keys(&self, namespace: &str) -> Result<Vec<String>>;

    /// Read a JSON-encoded value.
    fn get_json<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<T>>
    where
        Self: Sized,
    {
        let Some(raw) = self.get(namespace, key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                namespace: namespace.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    /// Write a value as JSON.
    fn put_json<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> Result<()>
    where
        Self: Sized,
    {
        let raw = serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
            namespace: namespace.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.put(namespace, key, &raw)
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        (**self).get(namespace, key)
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        (**self).put(namespace, key, value)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        (**self).delete(namespace, key)
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        (**self).keys(namespace)
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        (**self).get(namespace, key)
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        (**self).put(namespace, key, value)
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        (**self).delete(namespace, key)
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        (**self).keys(namespace)
    }
}

/// Well-known namespaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Namespace {
    /// Identity key pair of one user
    Identity(UserId),
    /// Channel keys held by one user, keyed by channel id
    ChannelKeys(UserId),
    /// Settings of one device
    Settings(String),
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity(user) => write!(f, "identity:{user}"),
            Self::ChannelKeys(user) => write!(f, "channel-keys:{user}"),
            Self::Settings(device) => write!(f, "settings:{device}"),
        }
    }
}

/// Volatile store for tests and sessions that must not touch disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), String>>> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries()?
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.entries()?
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .entries()?
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, key)| key.clone())
            .collect())
    }
}
