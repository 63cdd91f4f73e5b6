//! Cache orchestrator
//!
//! [`Hrc`] ties rule matching, key derivation, the primary store, the tag
//! index and hooks together. Every call receives the request it works on and
//! returns its own [`DebugLog`], so one instance can serve concurrent
//! requests.

use bytes::Bytes;
use hrc_index::TagIndex;
use hrc_storage::backend::expiry_from_now;
use hrc_storage::{CacheStore, CachedContent};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::callback::CallbackRegistry;
use crate::definition::RuleDefinitions;
use crate::error::CoreError;
use crate::hooks::{CacheHook, ReadPayload, SavePayload};
use crate::key::derive_joint_key;
use crate::log::{DebugLog, Traced};
use crate::matcher::{Fragment, MatchedRule, match_rule};
use crate::request::{CONTROL_KEY_HEADER, DEBUG_HEADER, PURGE_HEADER, RequestContext};
use crate::rule::Rule;
use crate::stats::CacheStats;

/// Result of [`Hrc::read`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Hit(CachedContent),
    Miss,
    /// The entry existed but a purge was requested, so it was removed
    Purged,
}

impl ReadOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, ReadOutcome::Hit(_))
    }

    pub fn content(&self) -> Option<&Bytes> {
        match self {
            ReadOutcome::Hit(cached) => Some(&cached.content),
            _ => None,
        }
    }

    /// Seconds the served entry has left to live
    pub fn remaining_ttl(&self) -> Option<u64> {
        match self {
            ReadOutcome::Hit(cached) => Some(cached.remaining_ttl()),
            _ => None,
        }
    }
}

/// Result of [`Hrc::save`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(String),
    /// Not cacheable: not a GET request, no rule matched or caching is
    /// disabled for the matched rule
    Skipped,
    /// A hook cancelled the save
    Cancelled,
}

impl SaveOutcome {
    pub fn key(&self) -> Option<&str> {
        match self {
            SaveOutcome::Saved(key) => Some(key),
            _ => None,
        }
    }
}

/// HTTP response cache with tag based invalidation
pub struct Hrc {
    rules: Vec<Rule>,
    store: Arc<dyn CacheStore>,
    index: Arc<dyn TagIndex>,
    hooks: Vec<Arc<dyn CacheHook>>,
    purge_flag: bool,
    control_key: Option<String>,
    stats: RwLock<CacheStats>,
}

impl Hrc {
    pub fn new(rules: Vec<Rule>, store: Arc<dyn CacheStore>, index: Arc<dyn TagIndex>) -> Self {
        info!("Initializing cache orchestrator with {} rules", rules.len());

        Self {
            rules,
            store,
            index,
            hooks: Vec::new(),
            purge_flag: false,
            control_key: None,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Build an orchestrator from rule definitions, validating every rule
    pub fn from_definitions(
        definitions: &RuleDefinitions,
        callbacks: &CallbackRegistry,
        store: Arc<dyn CacheStore>,
        index: Arc<dyn TagIndex>,
    ) -> Result<Self, CoreError> {
        Ok(Self::new(definitions.build(callbacks)?, store, index))
    }

    // ==================== Rules ====================

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name() == name)
    }

    /// Replace the rule list. Nothing changes if any definition is invalid.
    pub fn set_rules(
        &mut self,
        definitions: &RuleDefinitions,
        callbacks: &CallbackRegistry,
    ) -> Result<(), CoreError> {
        self.rules = definitions.build(callbacks)?;
        Ok(())
    }

    /// Add a rule with the lowest priority
    pub fn append_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Add a rule with the highest priority
    pub fn prepend_rule(&mut self, rule: Rule) {
        self.rules.insert(0, rule);
    }

    // ==================== Settings ====================

    /// Register a hook; registering the same instance twice has no effect
    pub fn register_hook(&mut self, hook: Arc<dyn CacheHook>) {
        if !self.hooks.iter().any(|h| Arc::ptr_eq(h, &hook)) {
            self.hooks.push(hook);
        }
    }

    pub fn purge_flag(&self) -> bool {
        self.purge_flag
    }

    /// When set, every read purges the entry it finds
    pub fn set_purge_flag(&mut self, purge: bool) {
        self.purge_flag = purge;
    }

    pub fn control_key(&self) -> Option<&str> {
        self.control_key.as_deref()
    }

    /// Require `X-HRC-Control-Key` to carry this value for purge and debug
    /// requests. An empty key removes the requirement.
    pub fn set_control_key(&mut self, key: Option<String>) {
        self.control_key = key.filter(|k| !k.is_empty());
    }

    pub async fn stats(&self) -> CacheStats {
        *self.stats.read().await
    }

    // ==================== Authorization ====================

    /// Whether the request asks for, and may trigger, purge-on-read
    pub fn can_purge(&self, request: &RequestContext) -> bool {
        self.authorized(request, PURGE_HEADER)
    }

    /// Whether the request asks for, and may see, the debug log
    pub fn can_debug(&self, request: &RequestContext) -> bool {
        self.authorized(request, DEBUG_HEADER)
    }

    fn authorized(&self, request: &RequestContext, header: &str) -> bool {
        if request.header(header).is_none() {
            return false;
        }

        match &self.control_key {
            None => true,
            Some(key) => request.header(CONTROL_KEY_HEADER) == Some(key.as_str()),
        }
    }

    // ==================== Matching ====================

    /// Resolve the rule for a request.
    ///
    /// With `rule_override` the named rule is used as is, without matching
    /// and with an empty fragment; an unknown name resolves to nothing.
    /// Otherwise rules are tried in order and the first match wins.
    pub fn matched_rule(
        &self,
        request: &RequestContext,
        rule_override: Option<&str>,
    ) -> Option<MatchedRule> {
        if let Some(name) = rule_override {
            return self
                .rule(name)
                .map(|rule| MatchedRule::new(rule.clone(), Fragment::default()));
        }

        self.rules.iter().find_map(|rule| {
            match_rule(rule, request).map(|fragment| MatchedRule::new(rule.clone(), fragment))
        })
    }

    /// Shared first steps of read and save
    fn resolve(
        &self,
        request: &RequestContext,
        rule_override: Option<&str>,
        log: &mut DebugLog,
    ) -> Option<MatchedRule> {
        if !request.is_get() {
            log.add("CacheRule-Match", "Only GET requests can be cached.");
            return None;
        }

        match self.matched_rule(request, rule_override) {
            Some(matched) if matched.rule.ttl() > 0 => {
                log.add(
                    "CacheRule-Match",
                    format!("{} rule matched the request.", matched.rule.name()),
                );
                Some(matched)
            }
            _ => {
                log.add("CacheRule-Match", "No rule matched the request.");
                None
            }
        }
    }

    // ==================== Cache Operations ====================

    /// Look up the cached content for `name` under the request's rule
    pub async fn read(
        &self,
        request: &RequestContext,
        name: &str,
        rule_override: Option<&str>,
    ) -> Traced<ReadOutcome> {
        let mut log = DebugLog::new();
        log.add("State", "Read");

        let Some(matched) = self.resolve(request, rule_override, &mut log) else {
            self.record_miss().await;
            return Traced::new(ReadOutcome::Miss, log);
        };

        let key = derive_joint_key(name, &matched.fragment_hash());
        let mut payload = ReadPayload {
            key,
            content: None,
            rule: matched,
            purge: false,
        };
        for hook in &self.hooks {
            hook.before_read(&mut payload).await;
        }

        log.add("CacheRule-CacheKey", payload.key.as_str());
        let cached = match self.store.read(&payload.key).await {
            Ok(Some(cached)) => cached,
            Ok(None) => {
                log.add("CacheStorage-Read", "MISS");
                self.record_miss().await;
                return Traced::new(ReadOutcome::Miss, log);
            }
            Err(e) => {
                warn!("Cache read failed for {}, treating as miss: {}", payload.key, e);
                log.add("CacheStorage-Read", format!("MISS ({})", e));
                self.record_miss().await;
                return Traced::new(ReadOutcome::Miss, log);
            }
        };
        log.add("CacheStorage-Read", "HIT");

        if self.purge_flag || self.can_purge(request) || payload.purge {
            log.add(
                "CacheRule-Purge",
                "A purge was requested. Purging cache and returning a miss.",
            );
            if let Err(e) = self.purge_by_cache_key(&payload.key).await {
                warn!("Purge on read failed for {}: {}", payload.key, e);
            }
            self.record_miss().await;
            return Traced::new(ReadOutcome::Purged, log);
        }

        payload.content = Some(cached.content.clone());
        for hook in &self.hooks {
            hook.after_read(&mut payload).await;
        }

        let content = payload.content.unwrap_or(cached.content);
        self.record_hit().await;
        Traced::new(
            ReadOutcome::Hit(CachedContent {
                content,
                expires_at: cached.expires_at,
            }),
            log,
        )
    }

    /// Store `content` for `name` under the request's rule.
    ///
    /// `extra_tags` are added to the rule's tags for this entry only.
    pub async fn save(
        &self,
        request: &RequestContext,
        name: &str,
        content: Bytes,
        rule_override: Option<&str>,
        extra_tags: &[String],
    ) -> Result<Traced<SaveOutcome>, CoreError> {
        let mut log = DebugLog::new();
        log.add("State", "Save");

        let Some(mut matched) = self.resolve(request, rule_override, &mut log) else {
            return Ok(Traced::new(SaveOutcome::Skipped, log));
        };
        matched.rule.add_tags(extra_tags);

        let key = derive_joint_key(name, &matched.fragment_hash());
        let mut payload = SavePayload {
            key,
            content,
            rule: matched,
            save: true,
        };
        for hook in &self.hooks {
            hook.before_save(&mut payload).await;
        }

        log.add("CacheRule-CacheKey", payload.key.as_str());
        if !payload.save {
            log.add("CacheStorage-Save", "Save cancelled by a hook.");
            return Ok(Traced::new(SaveOutcome::Cancelled, log));
        }

        let ttl = payload.rule.rule.ttl();
        self.store
            .save(&payload.key, payload.content.clone(), ttl)
            .await?;

        let tags = payload.rule.rule.tags();
        if let Err(e) = self
            .index
            .save(&payload.key, tags, expiry_from_now(ttl))
            .await
        {
            // An unindexed entry could never be purged by tag
            if let Err(purge_err) = self.store.purge(&payload.key).await {
                warn!("Failed to roll back {}: {}", payload.key, purge_err);
            }
            return Err(e.into());
        }
        debug!("Saved {} with tags {:?} for {}s", payload.key, tags, ttl);
        log.add("CacheStorage-Save", "Cache saved.");

        for hook in &self.hooks {
            hook.after_save(&mut payload).await;
        }

        self.record_save().await;
        Ok(Traced::new(SaveOutcome::Saved(payload.key), log))
    }

    // ==================== Purge Operations ====================

    /// Remove one entry, returning whether the store held it
    pub async fn purge_by_cache_key(&self, key: &str) -> Result<bool, CoreError> {
        self.index.delete_entry_by_key(key).await?;
        let found = self.store.purge(key).await?;
        if found {
            self.record_purges(1).await;
        }
        Ok(found)
    }

    /// Remove every entry carrying all of `tags`, returning how many keys
    /// were selected
    pub async fn purge_by_tags(&self, tags: &[String]) -> Result<usize, CoreError> {
        if tags.is_empty() {
            return Err(CoreError::InvalidInput(
                "At least one tag is required to purge by tags".to_string(),
            ));
        }

        let keys = self.index.select_by_tags(tags).await?;
        for key in &keys {
            self.store.purge(key).await?;
        }
        self.index.delete_entry_by_tags(tags).await?;

        info!("Purged {} entries tagged {:?}", keys.len(), tags);
        self.record_purges(keys.len() as u64).await;
        Ok(keys.len())
    }

    // ==================== Statistics ====================

    async fn record_hit(&self) {
        metrics::counter!("hrc_cache_hits_total").increment(1);
        let mut stats = self.stats.write().await;
        stats.hit_count += 1;
    }

    async fn record_miss(&self) {
        metrics::counter!("hrc_cache_misses_total").increment(1);
        let mut stats = self.stats.write().await;
        stats.miss_count += 1;
    }

    async fn record_save(&self) {
        metrics::counter!("hrc_cache_saves_total").increment(1);
        let mut stats = self.stats.write().await;
        stats.save_count += 1;
    }

    async fn record_purges(&self, count: u64) {
        metrics::counter!("hrc_cache_purges_total").increment(count);
        let mut stats = self.stats.write().await;
        stats.purge_count += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Predicates;
    use async_trait::async_trait;
    use hrc_index::{IndexError, MemoryIndex};
    use hrc_storage::{MemoryStore, StorageError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn catch_all(name: &str, ttl: u64, rule_tags: &[&str]) -> Rule {
        Rule::new(name, ttl, tags(rule_tags), Predicates::new().url("*").unwrap()).unwrap()
    }

    fn hrc(rules: Vec<Rule>) -> (Hrc, Arc<MemoryStore>, Arc<MemoryIndex>) {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemoryIndex::new());
        (Hrc::new(rules, store.clone(), index.clone()), store, index)
    }

    async fn save(hrc: &Hrc, request: &RequestContext, name: &str) -> SaveOutcome {
        hrc.save(request, name, Bytes::from_static(b"content"), None, &[])
            .await
            .unwrap()
            .into_inner()
    }

    #[tokio::test]
    async fn test_save_then_read() {
        let (hrc, _, _) = hrc(vec![catch_all("Default", 60, &["all"])]);
        let request = RequestContext::get("/page");

        let saved = hrc
            .save(&request, "n", Bytes::from_static(b"content"), None, &[])
            .await
            .unwrap();
        assert_eq!(saved.log.messages("CacheStorage-Save"), ["Cache saved.".to_string()]);
        let key = saved.value.key().unwrap().to_string();
        assert_eq!(key.len(), 32);

        let read = hrc.read(&request, "n", None).await;
        assert_eq!(read.value.content(), Some(&Bytes::from_static(b"content")));
        assert!(read.value.remaining_ttl().unwrap() > 50);
        assert_eq!(read.log.messages("CacheRule-CacheKey"), [key]);
        assert_eq!(read.log.messages("CacheStorage-Read"), ["HIT".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_ttl_rule_is_skipped() {
        let (hrc, store, _) = hrc(vec![catch_all("Off", 0, &["t"])]);
        let request = RequestContext::get("/");

        assert_eq!(save(&hrc, &request, "n").await, SaveOutcome::Skipped);
        assert!(store.is_empty());

        let read = hrc.read(&request, "n", None).await;
        assert_eq!(read.value, ReadOutcome::Miss);
        assert_eq!(
            read.log.messages("CacheRule-Match"),
            ["No rule matched the request.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rule_override() {
        let special = Rule::new(
            "Special",
            60,
            tags(&["special"]),
            Predicates::new().url("/never").unwrap(),
        )
        .unwrap();
        let (hrc, _, index) = hrc(vec![special, catch_all("Default", 60, &["all"])]);
        let request = RequestContext::get("/page");

        let key = hrc
            .save(&request, "n", Bytes::from_static(b"x"), Some("Special"), &[])
            .await
            .unwrap()
            .value;
        assert!(key.key().is_some());
        assert_eq!(index.select_by_tags(&tags(&["special"])).await.unwrap().len(), 1);

        // The override ignores the request, so any request finds the entry
        let other = RequestContext::get("/elsewhere");
        assert!(hrc.read(&other, "n", Some("Special")).await.value.is_hit());
        assert!(!hrc.read(&request, "n", None).await.value.is_hit());

        assert_eq!(
            hrc.read(&request, "n", Some("Unknown")).await.value,
            ReadOutcome::Miss
        );
    }

    #[tokio::test]
    async fn test_extra_tags_do_not_leak_into_rule() {
        let (hrc, _, index) = hrc(vec![catch_all("Default", 60, &["all"])]);
        let request = RequestContext::get("/");

        hrc.save(&request, "n", Bytes::from_static(b"x"), None, &tags(&["user-1"]))
            .await
            .unwrap();

        assert_eq!(index.select_by_tags(&tags(&["user-1", "all"])).await.unwrap().len(), 1);
        assert_eq!(hrc.rule("Default").unwrap().tags(), tags(&["all"]).as_slice());
    }

    #[tokio::test]
    async fn test_purge_header_and_control_key() {
        let (mut hrc, _, _) = hrc(vec![catch_all("Default", 60, &["all"])]);
        hrc.set_control_key(Some("secret".to_string()));
        let plain = RequestContext::get("/");

        save(&hrc, &plain, "n").await;

        // Wrong key: not authorized, but the header changes nothing else
        let wrong = RequestContext::get("/")
            .with_header("X-HRC-Purge", "1")
            .with_header("X-HRC-Control-Key", "guess");
        assert!(!hrc.can_purge(&wrong));
        assert!(hrc.read(&wrong, "n", None).await.value.is_hit());

        let right = RequestContext::get("/")
            .with_header("X-HRC-Purge", "1")
            .with_header("X-HRC-Control-Key", "secret");
        assert!(hrc.can_purge(&right));
        assert_eq!(hrc.read(&right, "n", None).await.value, ReadOutcome::Purged);
        assert_eq!(hrc.read(&plain, "n", None).await.value, ReadOutcome::Miss);
    }

    #[tokio::test]
    async fn test_can_debug() {
        let (mut hrc, _, _) = hrc(vec![]);
        let debug = RequestContext::get("/").with_header("x-hrc-debug", "1");

        assert!(hrc.can_debug(&debug));
        assert!(!hrc.can_debug(&RequestContext::get("/")));

        hrc.set_control_key(Some("secret".to_string()));
        assert!(!hrc.can_debug(&debug));
        assert!(hrc.can_debug(&debug.with_header("X-HRC-Control-Key", "secret")));

        hrc.set_control_key(Some(String::new()));
        assert_eq!(hrc.control_key(), None);
    }

    #[tokio::test]
    async fn test_purge_flag() {
        let (mut hrc, _, index) = hrc(vec![catch_all("Default", 60, &["all"])]);
        let request = RequestContext::get("/");
        save(&hrc, &request, "n").await;

        hrc.set_purge_flag(true);
        assert!(hrc.purge_flag());
        assert_eq!(hrc.read(&request, "n", None).await.value, ReadOutcome::Purged);
        assert!(index.is_empty());
    }

    struct RewriteKey;

    #[async_trait]
    impl CacheHook for RewriteKey {
        async fn before_read(&self, payload: &mut ReadPayload) {
            payload.key = "fixedkey".to_string();
        }

        async fn before_save(&self, payload: &mut SavePayload) {
            payload.key = "fixedkey".to_string();
            payload.content = Bytes::from_static(b"rewritten");
        }
    }

    #[tokio::test]
    async fn test_hooks_rewrite_key_and_content() {
        let (mut hrc, store, _) = hrc(vec![catch_all("Default", 60, &["all"])]);
        hrc.register_hook(Arc::new(RewriteKey));
        let request = RequestContext::get("/");

        assert_eq!(
            save(&hrc, &request, "n").await,
            SaveOutcome::Saved("fixedkey".to_string())
        );
        assert!(store.read("fixedkey").await.unwrap().is_some());

        let read = hrc.read(&request, "other-name", None).await;
        assert_eq!(read.value.content(), Some(&Bytes::from_static(b"rewritten")));
    }

    #[tokio::test]
    async fn test_rewritten_key_must_suit_bucket_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(hrc_index::BucketIndex::new(dir.path()).await.unwrap());
        let mut hrc = Hrc::new(vec![catch_all("Default", 60, &["all"])], store.clone(), index);
        hrc.register_hook(Arc::new(RewriteKey));

        let result = hrc
            .save(&RequestContext::get("/"), "n", Bytes::from_static(b"x"), None, &[])
            .await;
        assert!(matches!(result, Err(CoreError::Index(IndexError::InvalidKey(_)))));
        assert!(store.is_empty());
    }

    struct Cancel;

    #[async_trait]
    impl CacheHook for Cancel {
        async fn before_save(&self, payload: &mut SavePayload) {
            payload.save = false;
        }

        async fn before_read(&self, payload: &mut ReadPayload) {
            payload.purge = true;
        }
    }

    #[tokio::test]
    async fn test_hooks_cancel_save_and_request_purge() {
        let (mut hrc, store, _) = hrc(vec![catch_all("Default", 60, &["all"])]);
        let request = RequestContext::get("/");
        save(&hrc, &request, "n").await;

        hrc.register_hook(Arc::new(Cancel));
        assert_eq!(save(&hrc, &request, "m").await, SaveOutcome::Cancelled);
        assert_eq!(store.len(), 1);

        assert_eq!(hrc.read(&request, "n", None).await.value, ReadOutcome::Purged);
        assert!(store.is_empty());
    }

    #[derive(Default)]
    struct Counter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheHook for Counter {
        async fn after_read(&self, payload: &mut ReadPayload) {
            assert!(payload.content.is_some());
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        async fn after_save(&self, _payload: &mut SavePayload) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_same_hook_registered_once() {
        let (mut hrc, _, _) = hrc(vec![catch_all("Default", 60, &["all"])]);
        let counter = Arc::new(Counter::default());
        hrc.register_hook(counter.clone());
        hrc.register_hook(counter.clone());

        let request = RequestContext::get("/");
        save(&hrc, &request, "n").await;
        hrc.read(&request, "n", None).await;

        assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn read(&self, _key: &str) -> Result<Option<CachedContent>, StorageError> {
            Err(StorageError::Backend("offline".to_string()))
        }

        async fn save(&self, _key: &str, _content: Bytes, _ttl: u64) -> Result<(), StorageError> {
            Err(StorageError::Backend("offline".to_string()))
        }

        async fn purge(&self, _key: &str) -> Result<bool, StorageError> {
            Err(StorageError::Backend("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failures_fail_open_on_read_and_closed_on_save() {
        let hrc = Hrc::new(
            vec![catch_all("Default", 60, &["all"])],
            Arc::new(BrokenStore),
            Arc::new(MemoryIndex::new()),
        );
        let request = RequestContext::get("/");

        assert_eq!(hrc.read(&request, "n", None).await.value, ReadOutcome::Miss);
        assert!(matches!(
            hrc.save(&request, "n", Bytes::new(), None, &[]).await,
            Err(CoreError::Storage(_))
        ));
    }

    struct BrokenIndex;

    #[async_trait]
    impl TagIndex for BrokenIndex {
        async fn save(
            &self,
            _key: &str,
            _tags: &[String],
            _expires_at: chrono::DateTime<chrono::Utc>,
        ) -> Result<(), IndexError> {
            Err(IndexError::Backend("offline".to_string()))
        }

        async fn delete_entry_by_key(&self, _key: &str) -> Result<bool, IndexError> {
            Ok(false)
        }

        async fn delete_entry_by_tags(&self, _tags: &[String]) -> Result<(), IndexError> {
            Ok(())
        }

        async fn select_by_tags(&self, _tags: &[String]) -> Result<Vec<String>, IndexError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_index_failure_rolls_back_store() {
        let store = Arc::new(MemoryStore::new());
        let hrc = Hrc::new(
            vec![catch_all("Default", 60, &["all"])],
            store.clone(),
            Arc::new(BrokenIndex),
        );

        let result = hrc
            .save(&RequestContext::get("/"), "n", Bytes::new(), None, &[])
            .await;
        assert!(matches!(result, Err(CoreError::Index(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rule_management() {
        let (mut hrc, _, _) = hrc(vec![catch_all("Default", 60, &["all"])]);
        hrc.prepend_rule(catch_all("First", 60, &["first"]));
        hrc.append_rule(catch_all("Last", 60, &["last"]));

        let names: Vec<_> = hrc.rules().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["First", "Default", "Last"]);
        assert!(hrc.rule("Missing").is_none());

        let matched = hrc.matched_rule(&RequestContext::get("/"), None).unwrap();
        assert_eq!(matched.rule.name(), "First");

        let definitions: RuleDefinitions =
            serde_json::from_str(r#"{"Broken": {"Ttl": 1, "Match": {"Url": "*"}}}"#).unwrap();
        assert!(hrc.set_rules(&definitions, &CallbackRegistry::new()).is_err());
        assert_eq!(hrc.rules().len(), 3);

        let definitions: RuleDefinitions = serde_json::from_str(
            r#"{"Only": {"Ttl": 1, "Tags": ["o"], "Match": {"Url": "*"}}}"#,
        )
        .unwrap();
        hrc.set_rules(&definitions, &CallbackRegistry::new()).unwrap();
        assert_eq!(hrc.rules().len(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let (hrc, _, _) = hrc(vec![catch_all("Default", 60, &["all"])]);
        let request = RequestContext::get("/");

        hrc.read(&request, "n", None).await;
        save(&hrc, &request, "n").await;
        hrc.read(&request, "n", None).await;
        hrc.purge_by_tags(&tags(&["all"])).await.unwrap();

        let stats = hrc.stats().await;
        assert_eq!(
            stats,
            CacheStats {
                hit_count: 1,
                miss_count: 1,
                save_count: 1,
                purge_count: 1,
            }
        );
    }
}
