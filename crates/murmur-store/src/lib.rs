//! # murmur-store
//!
//! Local persistent storage for the Murmur client, backed by SQLite.
//!
//! The store is a plain namespaced key-value table. Identity keys and channel
//! keys live in per-user namespaces, settings in a per-device namespace (see
//! [`Namespace`]). [`Database`] is the on-disk implementation of
//! [`KeyValueStore`]; [`MemoryStore`] backs tests and ephemeral sessions.

pub mod database;
pub mod kv;
pub mod migrations;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use kv::{KeyValueStore, MemoryStore, Namespace};
