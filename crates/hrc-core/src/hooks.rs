//! Read and save hooks

use async_trait::async_trait;
use bytes::Bytes;

use crate::matcher::MatchedRule;

/// Data handed to read hooks.
///
/// `content` is empty before the store lookup and holds the cached body
/// afterwards. Setting `purge` in `before_read` purges the entry instead of
/// serving it.
#[derive(Debug, Clone)]
pub struct ReadPayload {
    pub key: String,
    pub content: Option<Bytes>,
    pub rule: MatchedRule,
    pub purge: bool,
}

/// Data handed to save hooks. Clearing `save` in `before_save` cancels the
/// write.
#[derive(Debug, Clone)]
pub struct SavePayload {
    pub key: String,
    pub content: Bytes,
    pub rule: MatchedRule,
    pub save: bool,
}

/// Extension points around cache reads and saves.
///
/// Every method defaults to doing nothing.
#[async_trait]
pub trait CacheHook: Send + Sync {
    async fn before_read(&self, _payload: &mut ReadPayload) {}

    async fn after_read(&self, _payload: &mut ReadPayload) {}

    /// May rewrite the key, the content or cancel the save.
    ///
    /// A rewritten key must still suit the configured backends. The bucketed
    /// tag index only accepts keys shaped like derived keys (32 alphanumeric
    /// characters) and the local store needs at least six characters. A key
    /// a backend rejects fails the save and nothing is stored.
    async fn before_save(&self, _payload: &mut SavePayload) {}

    async fn after_save(&self, _payload: &mut SavePayload) {}
}
