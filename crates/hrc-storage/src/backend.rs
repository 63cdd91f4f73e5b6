//! Primary cache store trait

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

use crate::error::StorageError;

/// A cached body together with the point in time it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedContent {
    pub content: Bytes,
    pub expires_at: DateTime<Utc>,
}

impl CachedContent {
    /// Build a record that expires `ttl_secs` seconds from now
    pub fn with_ttl(content: Bytes, ttl_secs: u64) -> Self {
        Self {
            content,
            expires_at: expiry_from_now(ttl_secs),
        }
    }

    /// Whether the record is logically absent at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whole seconds left before the record expires, zero once it has
    pub fn remaining_ttl(&self) -> u64 {
        (self.expires_at - Utc::now()).num_seconds().max(0) as u64
    }
}

/// Primary cache store trait
///
/// Implementations hold opaque response bodies addressed by cache key.
/// A store is shared between orchestrator instances, so implementations
/// must be safe for concurrent use.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a cached body. Expired records are reported as absent.
    async fn read(&self, key: &str) -> Result<Option<CachedContent>, StorageError>;

    /// Store a body for `ttl_secs` seconds, replacing any previous record
    async fn save(&self, key: &str, content: Bytes, ttl_secs: u64) -> Result<(), StorageError>;

    /// Delete a record, returning whether it existed
    async fn purge(&self, key: &str) -> Result<bool, StorageError>;
}

/// Absolute expiry for a TTL counted from now
pub fn expiry_from_now(ttl_secs: u64) -> DateTime<Utc> {
    let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
    Utc::now()
        .checked_add_signed(Duration::seconds(ttl.min(i64::MAX / 1000)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Validate a cache key before it is used to address storage.
///
/// Keys are produced by the key deriver as lowercase hex, but hooks may
/// rewrite them, so anything that could escape a directory is rejected.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StorageError::InvalidKey(format!(
            "Key contains unsupported characters: {}",
            key
        )));
    }

    Ok(())
}
