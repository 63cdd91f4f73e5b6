//! Local disk cache store

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::backend::{CacheStore, CachedContent, expiry_from_now, validate_key};
use crate::error::StorageError;

/// Size of the expiry header at the start of every record
const HEADER_LEN: usize = 8;

/// Local disk cache store
///
/// Stores one file per key in a three level fan-out:
/// `<base_path>/<key[0..2]>/<key[2..4]>/<key[4..6]>/<key>`
///
/// Each file starts with the absolute expiry (big-endian unix seconds)
/// followed by the raw content.
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    /// Create a new local store rooted at `base_path`
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;

        info!("Initialized local cache store at {:?}", base_path);

        Ok(Self { base_path })
    }

    /// Get the file path for a key
    fn entry_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;

        if key.len() < 6 {
            return Err(StorageError::InvalidKey(format!("Key too short: {}", key)));
        }

        Ok(self
            .base_path
            .join(&key[0..2])
            .join(&key[2..4])
            .join(&key[4..6])
            .join(key))
    }

    fn encode(record: &CachedContent) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + record.content.len());
        buf.put_i64(record.expires_at.timestamp());
        buf.put_slice(&record.content);
        buf.freeze()
    }

    fn decode(key: &str, data: Vec<u8>) -> Result<CachedContent, StorageError> {
        if data.len() < HEADER_LEN {
            return Err(StorageError::Corrupt(format!(
                "Record for {} is {} bytes long",
                key,
                data.len()
            )));
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&data[..HEADER_LEN]);
        let expires_at = DateTime::<Utc>::from_timestamp(i64::from_be_bytes(header), 0)
            .ok_or_else(|| StorageError::Corrupt(format!("Invalid expiry in record {}", key)))?;

        let mut content = Bytes::from(data);
        let content = content.split_off(HEADER_LEN);

        Ok(CachedContent {
            content,
            expires_at,
        })
    }
}

#[async_trait]
impl CacheStore for LocalStore {
    async fn read(&self, key: &str) -> Result<Option<CachedContent>, StorageError> {
        let path = self.entry_path(key)?;
        debug!("Reading cache entry from {:?}", path);

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let record = Self::decode(key, data)?;
        if record.is_expired() {
            debug!("Cache entry {} expired, removing", key);
            if let Err(e) = self.purge(key).await {
                warn!("Failed to remove expired cache entry {}: {}", key, e);
            }
            return Ok(None);
        }

        Ok(Some(record))
    }

    async fn save(&self, key: &str, content: Bytes, ttl_secs: u64) -> Result<(), StorageError> {
        let path = self.entry_path(key)?;
        debug!("Writing cache entry to {:?}", path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let record = CachedContent {
            content,
            expires_at: expiry_from_now(ttl_secs),
        };

        // Write atomically using a temp file
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, Self::encode(&record)).await?;
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    async fn purge(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.entry_path(key)?;
        debug!("Deleting cache entry at {:?}", path);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
