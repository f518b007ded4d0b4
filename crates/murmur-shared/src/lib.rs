//! # murmur-shared
//!
//! Types shared by the Murmur client and relay server: the JSON wire
//! [`frame::Frame`], identifiers, protocol constants, and the two layers of
//! cryptography the client applies before a frame ever reaches the wire.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod identity;
pub mod types;
