//! Per-device settings.
//!
//! Stored as one JSON object under `settings:<device>` and loaded once at
//! startup. The router only ever sees a read-only [`Settings`].

use std::collections::BTreeMap;

use murmur_store::{KeyValueStore, Namespace, StoreError};

pub const NOTIFICATIONS_ENABLED: &str = "notifications_enabled";
pub const SOUND: &str = "sound";
pub const THEME: &str = "theme";

const SETTINGS_KEY: &str = "values";

const DEFAULTS: &[(&str, &str)] = &[
    (NOTIFICATIONS_ENABLED, "true"),
    (SOUND, "true"),
    (THEME, "dark"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            values: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl Settings {
    /// Stored values layered over the defaults.
    pub fn load<K: KeyValueStore>(store: &K, device: &str) -> Result<Self, StoreError> {
        let mut settings = Self::default();
        let namespace = Namespace::Settings(device.to_string()).to_string();
        if let Some(stored) = store.get_json::<BTreeMap<String, String>>(&namespace, SETTINGS_KEY)? {
            settings.values.extend(stored);
        }
        Ok(settings)
    }

    /// Persist one value for `device`. Takes effect on the next [`Settings::load`].
    pub fn persist<K: KeyValueStore>(
        store: &K,
        device: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let namespace = Namespace::Settings(device.to_string()).to_string();
        let mut stored = store
            .get_json::<BTreeMap<String, String>>(&namespace, SETTINGS_KEY)?
            .unwrap_or_default();
        stored.insert(key.to_string(), value.to_string());
        store.put_json(&namespace, SETTINGS_KEY, &stored)
    }

    pub fn get_setting(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn notifications_enabled(&self) -> bool {
        self.get_setting(NOTIFICATIONS_ENABLED)
            .map_or(true, |v| v != "false" && v != "0")
    }

    /// Builder used by tests and embedders that bypass the store.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}
