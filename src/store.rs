//! Object-store contract the keychain persists through.
//!
//! The chain sees an abstract byte-blob store. Key records live under a
//! single namespace, addressed as `/<keyName>`; filesystem-backed stores
//! use a `.p8` file per record. A store may optionally expose an atomic
//! batch (used by rename) and a physical-path hint (surfaced on
//! `KeyInfo`).

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;

/// Filename extension for key records in filesystem-backed stores.
pub const KEY_EXTENSION: &str = "p8";

/// Store address for a key name.
pub fn ds_key(name: &str) -> String {
    format!("/{name}")
}

/// Key name carried by a store address.
pub fn name_of(key: &str) -> &str {
    key.strip_prefix('/').unwrap_or(key)
}

/// Byte-blob store the keychain persists key records in.
///
/// The store is the authority for existence: mutating chain operations
/// re-check it rather than trusting any cached view.
#[async_trait]
pub trait Store: Send + Sync {
    async fn has(&self, key: &str) -> Result<bool>;

    /// Fetch a record; a missing key is `KeyNotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a record; a missing key is `KeyNotFound`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Enumerate all record keys (keys only, no values).
    async fn query_keys(&self) -> Result<Vec<String>>;

    /// Atomic write facility, when the store has one. Rename commits
    /// `{put(new), delete(old)}` through it; stores returning `None`
    /// fall back to a documented two-step.
    fn batch(&self) -> Option<Box<dyn StoreBatch>> {
        None
    }

    /// Physical path of a record, when the store can name one.
    fn resolve_path(&self, key: &str) -> Option<PathBuf> {
        let _ = key;
        None
    }
}

/// Accumulated mutations committed as one atomic step.
#[async_trait]
pub trait StoreBatch: Send {
    fn put(&mut self, key: &str, value: Vec<u8>);
    fn delete(&mut self, key: &str);
    async fn commit(self: Box<Self>) -> Result<()>;
}
