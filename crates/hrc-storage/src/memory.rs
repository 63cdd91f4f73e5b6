//! In-memory cache store
//!
//! Intended for tests and single-process ephemeral use.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::backend::{CacheStore, CachedContent};
use crate::error::StorageError;

/// Cache store backed by a `HashMap`
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CachedContent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<CachedContent>, StorageError> {
        let record = self.entries.read().get(key).cloned();

        match record {
            Some(record) if record.is_expired() => {
                debug!("Cache entry {} expired, removing", key);
                let mut entries = self.entries.write();
                // Re-check: the key may have been saved again in between
                if entries.get(key).is_some_and(CachedContent::is_expired) {
                    entries.remove(key);
                }
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn save(&self, key: &str, content: Bytes, ttl_secs: u64) -> Result<(), StorageError> {
        debug!("Caching {} ({} bytes) in memory", key, content.len());
        self.entries
            .write()
            .insert(key.to_string(), CachedContent::with_ttl(content, ttl_secs));
        Ok(())
    }

    async fn purge(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.write().remove(key).is_some())
    }
}
