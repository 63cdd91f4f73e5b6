//! Primary store operations

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hrc_storage::backend::{expiry_from_now, validate_key};
use hrc_storage::{CacheStore, CachedContent, StorageError};
use sqlx::Row;
use tracing::{debug, info};

use crate::error::DbError;
use crate::repository::Database;

/// Rows removed by [`Database::prune_expired`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub cache_entries: u64,
    pub index_entries: u64,
}

impl Database {
    // ==================== Cache Entry Operations ====================

    /// Insert or replace a cached body
    pub async fn upsert_cache_entry(
        &self,
        key: &str,
        content: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, content, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET content = excluded.content, expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(content)
        .bind(expires_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a cached body by key, expired or not
    pub async fn get_cache_entry(&self, key: &str) -> Result<Option<CachedContent>, DbError> {
        let result = sqlx::query("SELECT content, expires_at FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = result else {
            return Ok(None);
        };

        let content: Vec<u8> = row.get("content");
        let expires_at: i64 = row.get("expires_at");
        let expires_at =
            DateTime::<Utc>::from_timestamp(expires_at, 0).ok_or_else(|| DbError::InvalidValue {
                field: "expires_at",
                value: expires_at.to_string(),
            })?;

        Ok(Some(CachedContent {
            content: Bytes::from(content),
            expires_at,
        }))
    }

    /// Delete a cached body by key
    pub async fn delete_cache_entry(&self, key: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get cache entry count, expired rows included
    pub async fn get_cache_entry_count(&self) -> Result<i64, DbError> {
        let result = sqlx::query("SELECT COUNT(*) as count FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(result.get("count"))
    }

    /// Delete every expired row from both the store and the index
    pub async fn prune_expired(&self) -> Result<PruneStats, DbError> {
        let now = Utc::now().timestamp();

        let cache_entries = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM index_tags WHERE key IN (SELECT key FROM index_entries WHERE expires_at <= ?)",
        )
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let index_entries = sqlx::query("DELETE FROM index_entries WHERE expires_at <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        info!(
            "Pruned {} cache entries and {} index entries",
            cache_entries, index_entries
        );

        Ok(PruneStats {
            cache_entries,
            index_entries,
        })
    }
}

#[async_trait]
impl CacheStore for Database {
    async fn read(&self, key: &str) -> Result<Option<CachedContent>, StorageError> {
        validate_key(key)?;

        match self.get_cache_entry(key).await? {
            Some(record) if record.is_expired() => {
                debug!("Cache entry {} expired, removing", key);
                self.delete_cache_entry(key).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn save(&self, key: &str, content: Bytes, ttl_secs: u64) -> Result<(), StorageError> {
        validate_key(key)?;
        debug!("Caching {} ({} bytes) in database", key, content.len());
        self.upsert_cache_entry(key, &content, expiry_from_now(ttl_secs))
            .await?;
        Ok(())
    }

    async fn purge(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        Ok(self.delete_cache_entry(key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use hrc_index::TagIndex;

    #[tokio::test]
    async fn test_save_read_purge() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.read("key").await.unwrap().is_none());

        CacheStore::save(&db, "key", Bytes::from_static(b"body"), 60)
            .await
            .unwrap();
        let record = db.read("key").await.unwrap().unwrap();
        assert_eq!(record.content, Bytes::from_static(b"body"));
        assert!(!record.is_expired());

        CacheStore::save(&db, "key", Bytes::from_static(b"other"), 60)
            .await
            .unwrap();
        assert_eq!(db.get_cache_entry_count().await.unwrap(), 1);

        assert!(db.purge("key").await.unwrap());
        assert!(!db.purge("key").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_and_removed() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_cache_entry("key", b"body", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        assert!(db.read("key").await.unwrap().is_none());
        assert_eq!(db.get_cache_entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_keys() {
        let db = Database::in_memory().await.unwrap();
        assert!(matches!(
            CacheStore::save(&db, "../x", Bytes::new(), 60).await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let db = Database::in_memory().await.unwrap();
        let past = Utc::now() - Duration::seconds(5);
        let future = Utc::now() + Duration::seconds(60);

        db.upsert_cache_entry("old", b"a", past).await.unwrap();
        db.upsert_cache_entry("new", b"b", future).await.unwrap();
        TagIndex::save(&db, "old", &["t".to_string()], past)
            .await
            .unwrap();
        TagIndex::save(&db, "new", &["t".to_string()], future)
            .await
            .unwrap();

        let stats = db.prune_expired().await.unwrap();
        assert_eq!(
            stats,
            PruneStats {
                cache_entries: 1,
                index_entries: 1
            }
        );
        assert_eq!(db.get_cache_entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("hrc.db").display());

        let db = Database::new(&url).await.unwrap();
        CacheStore::save(&db, "key", Bytes::from_static(b"body"), 60)
            .await
            .unwrap();
        db.pool().close().await;

        let db = Database::new(&url).await.unwrap();
        let record = db.read("key").await.unwrap().unwrap();
        assert_eq!(record.content, Bytes::from_static(b"body"));
    }
}
