//! Tag index operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hrc_index::tags::validate_tags;
use hrc_index::{IndexError, TagIndex, canonical_tags};
use sqlx::Row;
use tracing::{debug, warn};

use crate::error::DbError;
use crate::repository::Database;

/// Build `?, ?, ?` for a dynamic `IN` list
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl Database {
    // ==================== Index Operations ====================

    /// Replace the tag set recorded for a key
    pub async fn upsert_index_entry(
        &self,
        key: &str,
        tags: &[String],
        expires_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM index_tags WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO index_entries (key, expires_at)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(expires_at.timestamp())
        .execute(&mut *tx)
        .await?;

        for tag in tags {
            sqlx::query("INSERT INTO index_tags (key, tag) VALUES (?, ?)")
                .bind(key)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete the index entry for a key
    pub async fn delete_index_entry(&self, key: &str) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM index_tags WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM index_entries WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Keys whose tag set contains every tag, optionally only live ones
    pub async fn find_index_keys(
        &self,
        tags: &[String],
        live_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>, DbError> {
        match live_at {
            Some(now) => {
                self.select_index_keys(tags, "AND e.expires_at > ?", Some(now.timestamp()))
                    .await
            }
            None => self.select_index_keys(tags, "", None).await,
        }
    }

    /// Keys carrying every tag whose entry has expired at `now`
    pub async fn find_expired_index_keys(
        &self,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, DbError> {
        self.select_index_keys(tags, "AND e.expires_at <= ?", Some(now.timestamp()))
            .await
    }

    async fn select_index_keys(
        &self,
        tags: &[String],
        expiry_clause: &str,
        expiry: Option<i64>,
    ) -> Result<Vec<String>, DbError> {
        let tags = canonical_tags(tags);

        let sql = if tags.is_empty() {
            format!(
                "SELECT e.key AS key FROM index_entries e WHERE 1 = 1 {} ORDER BY e.key",
                expiry_clause
            )
        } else {
            format!(
                r#"
                SELECT e.key AS key
                FROM index_entries e
                JOIN index_tags t ON t.key = e.key
                WHERE t.tag IN ({}) {}
                GROUP BY e.key
                HAVING COUNT(DISTINCT t.tag) = ?
                ORDER BY e.key
                "#,
                placeholders(tags.len()),
                expiry_clause
            )
        };

        let mut query = sqlx::query(&sql);
        for tag in &tags {
            query = query.bind(tag);
        }
        if let Some(expiry) = expiry {
            query = query.bind(expiry);
        }
        if !tags.is_empty() {
            query = query.bind(tags.len() as i64);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| row.get("key")).collect())
    }

    /// Delete the expired entries carrying every tag, returning how many
    /// were removed. Entries refreshed in the meantime are kept.
    pub async fn sweep_expired_index_entries(
        &self,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let keys = self.find_expired_index_keys(tags, now).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        let now = now.timestamp();
        let mut removed = 0;
        let mut tx = self.pool.begin().await?;
        for key in &keys {
            sqlx::query(
                "DELETE FROM index_tags WHERE key IN (SELECT key FROM index_entries WHERE key = ? AND expires_at <= ?)",
            )
            .bind(key)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            removed += sqlx::query("DELETE FROM index_entries WHERE key = ? AND expires_at <= ?")
                .bind(key)
                .bind(now)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        Ok(removed)
    }
}

#[async_trait]
impl TagIndex for Database {
    async fn save(
        &self,
        key: &str,
        tags: &[String],
        expires_at: DateTime<Utc>,
    ) -> Result<(), IndexError> {
        validate_tags(tags)?;
        let tags = canonical_tags(tags);
        debug!("Indexing {} with tags {:?}", key, tags);
        self.upsert_index_entry(key, &tags, expires_at).await?;
        Ok(())
    }

    async fn delete_entry_by_key(&self, key: &str) -> Result<bool, IndexError> {
        Ok(self.delete_index_entry(key).await?)
    }

    async fn delete_entry_by_tags(&self, tags: &[String]) -> Result<(), IndexError> {
        let keys = self.find_index_keys(tags, None).await?;
        debug!("Deleting {} index entries by tags {:?}", keys.len(), tags);
        for key in keys {
            self.delete_index_entry(&key).await?;
        }
        Ok(())
    }

    async fn select_by_tags(&self, tags: &[String]) -> Result<Vec<String>, IndexError> {
        let now = Utc::now();
        let keys = self.find_index_keys(tags, Some(now)).await?;

        match self.sweep_expired_index_entries(tags, now).await {
            Ok(0) => {}
            Ok(removed) => debug!("Swept {} expired index entries", removed),
            Err(e) => warn!("Failed to sweep expired index entries for {:?}: {}", tags, e),
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + Duration::seconds(60)
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[tokio::test]
    async fn test_select_uses_and_semantics() {
        let db = Database::in_memory().await.unwrap();
        db.save("k1", &tags(&["a", "b", "c"]), later()).await.unwrap();
        db.save("k2", &tags(&["a"]), later()).await.unwrap();
        db.save("k3", &tags(&["b", "c"]), later()).await.unwrap();

        assert_eq!(db.select_by_tags(&tags(&["a"])).await.unwrap(), tags(&["k1", "k2"]));
        assert_eq!(db.select_by_tags(&tags(&["c", "a"])).await.unwrap(), tags(&["k1"]));
        assert_eq!(db.select_by_tags(&tags(&["b", "b"])).await.unwrap(), tags(&["k1", "k3"]));
        assert!(db.select_by_tags(&tags(&["d"])).await.unwrap().is_empty());
        assert_eq!(db.select_by_tags(&[]).await.unwrap(), tags(&["k1", "k2", "k3"]));
    }

    #[tokio::test]
    async fn test_resave_replaces_tags() {
        let db = Database::in_memory().await.unwrap();
        db.save("k1", &tags(&["old"]), later()).await.unwrap();
        db.save("k1", &tags(&["new", "new"]), later()).await.unwrap();

        assert!(db.select_by_tags(&tags(&["old"])).await.unwrap().is_empty());
        assert_eq!(db.select_by_tags(&tags(&["new"])).await.unwrap(), tags(&["k1"]));
    }

    #[tokio::test]
    async fn test_expired_entries_are_not_selected() {
        let db = Database::in_memory().await.unwrap();
        db.save("k1", &tags(&["a"]), Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        db.save("k2", &tags(&["a"]), later()).await.unwrap();

        assert_eq!(db.select_by_tags(&tags(&["a"])).await.unwrap(), tags(&["k2"]));

        // The expired entry was swept, not just filtered out
        assert_eq!(db.find_index_keys(&[], None).await.unwrap(), tags(&["k2"]));
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_tags")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_sweep_only_touches_queried_tags() {
        let db = Database::in_memory().await.unwrap();
        let past = Utc::now() - Duration::seconds(1);
        db.save("k1", &tags(&["a"]), past).await.unwrap();
        db.save("k2", &tags(&["b"]), past).await.unwrap();

        assert!(db.select_by_tags(&tags(&["a"])).await.unwrap().is_empty());
        assert_eq!(db.find_index_keys(&[], None).await.unwrap(), tags(&["k2"]));

        db.save("k2", &tags(&["b"]), later()).await.unwrap();
        assert_eq!(db.sweep_expired_index_entries(&[], Utc::now()).await.unwrap(), 0);
        assert_eq!(db.select_by_tags(&tags(&["b"])).await.unwrap(), tags(&["k2"]));
    }

    #[tokio::test]
    async fn test_delete_by_key_and_tags() {
        let db = Database::in_memory().await.unwrap();
        db.save("k1", &tags(&["a", "b"]), later()).await.unwrap();
        db.save("k2", &tags(&["a"]), later()).await.unwrap();
        db.save("k3", &tags(&["b"]), later()).await.unwrap();

        assert!(db.delete_entry_by_key("k3").await.unwrap());
        assert!(!db.delete_entry_by_key("k3").await.unwrap());

        db.delete_entry_by_tags(&tags(&["a", "b"])).await.unwrap();
        assert_eq!(db.select_by_tags(&[]).await.unwrap(), tags(&["k2"]));
    }

    #[tokio::test]
    async fn test_rejects_empty_tag_list() {
        let db = Database::in_memory().await.unwrap();
        assert!(matches!(
            db.save("k1", &[], later()).await,
            Err(IndexError::EmptyTags)
        ));
    }
}
