//! Tag index trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IndexError;

/// Inverted index between cache keys and invalidation tags
///
/// Implementations are shared between orchestrator instances and must be
/// safe for concurrent use. An entry is logically absent once its expiry has
/// passed, whether or not it has been physically removed yet.
#[async_trait]
pub trait TagIndex: Send + Sync {
    /// Associate `key` with `tags` until `expires_at`.
    ///
    /// Saving a key again replaces its previous association; it never
    /// produces a second entry.
    async fn save(
        &self,
        key: &str,
        tags: &[String],
        expires_at: DateTime<Utc>,
    ) -> Result<(), IndexError>;

    /// Remove the entry for `key`, returning whether one existed
    async fn delete_entry_by_key(&self, key: &str) -> Result<bool, IndexError>;

    /// Remove every entry whose tag set contains all of `tags`.
    ///
    /// An empty `tags` slice matches every entry.
    async fn delete_entry_by_tags(&self, tags: &[String]) -> Result<(), IndexError>;

    /// Keys of live entries whose tag set contains all of `tags`.
    ///
    /// An empty `tags` slice selects every live key. Expired entries are
    /// left out of the result and removed opportunistically.
    async fn select_by_tags(&self, tags: &[String]) -> Result<Vec<String>, IndexError>;
}
