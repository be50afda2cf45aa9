//! In-memory store (non-persistent; tests and embedded use).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{KeychainError, Result};
use crate::store::{name_of, Store, StoreBatch};

type Entries = Arc<RwLock<HashMap<String, Vec<u8>>>>;

/// In-memory key-value store with an atomic batch facility.
#[derive(Clone, Default)]
pub struct MemStore {
    entries: Entries,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| KeychainError::KeyNotFound(name_of(key).to_string()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| KeychainError::KeyNotFound(name_of(key).to_string()))
    }

    async fn query_keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    fn batch(&self) -> Option<Box<dyn StoreBatch>> {
        Some(Box::new(MemBatch {
            entries: Arc::clone(&self.entries),
            ops: Vec::new(),
        }))
    }
}

enum BatchOp {
    Put(String, Vec<u8>),
    Delete(String),
}

/// Batch applied under a single write lock, so readers observe either
/// none or all of its mutations.
struct MemBatch {
    entries: Entries,
    ops: Vec<BatchOp>,
}

#[async_trait]
impl StoreBatch for MemBatch {
    fn put(&mut self, key: &str, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key.to_string(), value));
    }

    fn delete(&mut self, key: &str) {
        self.ops.push(BatchOp::Delete(key.to_string()));
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut entries = self.entries.write().await;
        for op in self.ops {
            match op {
                BatchOp::Put(key, value) => {
                    entries.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
