//! Volatile dual-map tag index
//!
//! Keeps a forward map (key -> tags) and a reverse map (tag -> keys) in sync.
//! Intended for tests and single-process ephemeral use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::IndexError;
use crate::index::TagIndex;
use crate::tags::{canonical_tags, validate_tags};

#[derive(Debug, Clone)]
struct Entry {
    tags: Vec<String>,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Maps {
    key_to_tags: HashMap<String, Entry>,
    tag_to_keys: HashMap<String, HashSet<String>>,
}

impl Maps {
    fn remove(&mut self, key: &str) -> bool {
        let Some(entry) = self.key_to_tags.remove(key) else {
            return false;
        };

        for tag in &entry.tags {
            if let Some(keys) = self.tag_to_keys.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(tag);
                }
            }
        }
        true
    }

    /// Keys carrying every tag, expired ones included
    fn matching(&self, tags: &[String]) -> Vec<String> {
        if tags.is_empty() {
            return self.key_to_tags.keys().cloned().collect();
        }

        let mut sets = Vec::with_capacity(tags.len());
        for tag in tags {
            match self.tag_to_keys.get(tag) {
                Some(keys) => sets.push(keys),
                None => return Vec::new(),
            }
        }

        // Intersect starting from the smallest set
        sets.sort_by_key(|s| s.len());
        let Some((smallest, rest)) = sets.split_first() else {
            return Vec::new();
        };
        smallest
            .iter()
            .filter(|key| rest.iter().all(|s| s.contains(*key)))
            .cloned()
            .collect()
    }
}

/// In-memory tag index
#[derive(Default)]
pub struct MemoryIndex {
    maps: RwLock<Maps>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, expired ones included
    pub fn len(&self) -> usize {
        self.maps.read().key_to_tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TagIndex for MemoryIndex {
    async fn save(
        &self,
        key: &str,
        tags: &[String],
        expires_at: DateTime<Utc>,
    ) -> Result<(), IndexError> {
        validate_tags(tags)?;
        let tags = canonical_tags(tags);

        let mut maps = self.maps.write();
        maps.remove(key);
        for tag in &tags {
            maps.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        maps.key_to_tags
            .insert(key.to_string(), Entry { tags, expires_at });

        Ok(())
    }

    async fn delete_entry_by_key(&self, key: &str) -> Result<bool, IndexError> {
        Ok(self.maps.write().remove(key))
    }

    async fn delete_entry_by_tags(&self, tags: &[String]) -> Result<(), IndexError> {
        let mut maps = self.maps.write();
        let keys = maps.matching(tags);
        debug!("Deleting {} index entries by tags {:?}", keys.len(), tags);
        for key in keys {
            maps.remove(&key);
        }
        Ok(())
    }

    async fn select_by_tags(&self, tags: &[String]) -> Result<Vec<String>, IndexError> {
        let now = Utc::now();
        let (live, expired): (Vec<String>, Vec<String>) = {
            let maps = self.maps.read();
            maps.matching(tags)
                .into_iter()
                .partition(|key| maps.key_to_tags[key].expires_at > now)
        };

        if !expired.is_empty() {
            debug!("Sweeping {} expired index entries", expired.len());
            let mut maps = self.maps.write();
            for key in &expired {
                // Re-check: the key may have been saved again in between
                if maps
                    .key_to_tags
                    .get(key)
                    .is_some_and(|e| e.expires_at <= now)
                {
                    maps.remove(key);
                }
            }
        }

        Ok(live)
    }
}
