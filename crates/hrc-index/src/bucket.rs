//! Persistent bucketed-log tag index
//!
//! Entries are grouped into buckets named after their canonical tag set and
//! sharded by key prefix:
//! `<base_path>/_<tag1>_<tag2>_/<key[0..2]>/<key[2..4]>/index.db`
//!
//! A tag set whose encoded name does not fit a directory name is stored under
//! `tagset-<digest>` instead, with its tags listed in a `tags` file inside the
//! bucket.
//!
//! Each shard log is an append-only sequence of fixed-width records: the
//! 32 character key followed by the expiry as 10 zero-padded unix seconds.
//! Deleting by tags removes whole bucket directories, so a purge costs one
//! directory removal per matching bucket instead of a scan of every entry.
//!
//! Shard access holds the bucket lock shared and the shard lock exclusively.
//! Removing a bucket holds the bucket lock exclusively.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::index::TagIndex;
use crate::tags::{canonical_tags, is_superset, validate_tags};

/// Length of a cache key inside a record
pub const KEY_LEN: usize = 32;

/// Length of the expiry timestamp inside a record
const EXPIRY_LEN: usize = 10;

/// Total width of a single record
pub const RECORD_LEN: usize = KEY_LEN + EXPIRY_LEN;

const SHARD_FILE: &str = "index.db";

/// Largest expiry that fits the record width
const MAX_EXPIRY: i64 = 9_999_999_999;

/// Longest encoded tag set used verbatim as a directory name
const MAX_BUCKET_NAME: usize = 200;

/// Name prefix of buckets addressed by the digest of their tag set
const DIGEST_PREFIX: &str = "tagset-";

/// Tag list of a digest-addressed bucket, one escaped tag per line
const MANIFEST_FILE: &str = "tags";

const OPEN_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    key: String,
    expires_at: i64,
}

impl Record {
    fn encode(&self) -> String {
        format!("{}{:010}", self.key, self.expires_at.clamp(0, MAX_EXPIRY))
    }
}

/// Locks keyed by path
struct PathLocks<L> {
    locks: Mutex<HashMap<PathBuf, Arc<L>>>,
}

impl<L: Default> Default for PathLocks<L> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<L: Default> PathLocks<L> {
    fn get(&self, path: &Path) -> Arc<L> {
        let mut locks = self.locks.lock();
        // Drop locks nobody holds any more
        locks.retain(|_, l| Arc::strong_count(l) > 1);
        locks.entry(path.to_path_buf()).or_default().clone()
    }
}

#[derive(Default)]
struct Locks {
    buckets: PathLocks<RwLock<()>>,
    shards: PathLocks<tokio::sync::Mutex<()>>,
}

impl Locks {
    async fn share_bucket(&self, bucket: &Path) -> OwnedRwLockReadGuard<()> {
        self.buckets.get(bucket).read_owned().await
    }

    async fn own_bucket(&self, bucket: &Path) -> OwnedRwLockWriteGuard<()> {
        self.buckets.get(bucket).write_owned().await
    }

    async fn shard(&self, shard: &Path) -> OwnedMutexGuard<()> {
        self.shards.get(shard).lock_owned().await
    }
}

/// Tag index stored as bucketed log files on local disk
pub struct BucketIndex {
    base_path: PathBuf,
    locks: Locks,
}

impl BucketIndex {
    /// Create a new bucketed index rooted at `base_path`
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;

        info!("Initialized bucketed tag index at {:?}", base_path);

        Ok(Self {
            base_path,
            locks: Locks::default(),
        })
    }

    fn validate_key(key: &str) -> Result<(), IndexError> {
        if key.len() != KEY_LEN || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(IndexError::InvalidKey(format!(
                "Expected {} alphanumeric characters, got {:?}",
                KEY_LEN, key
            )));
        }
        Ok(())
    }

    fn shard_path(bucket: &Path, key: &str) -> PathBuf {
        bucket.join(&key[0..2]).join(&key[2..4]).join(SHARD_FILE)
    }

    /// All bucket directories together with the tag set each one holds
    async fn buckets(&self) -> Result<Vec<(PathBuf, Vec<String>)>, IndexError> {
        let mut buckets = Vec::new();
        let mut dir = match fs::read_dir(&self.base_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(buckets),
            Err(e) => return Err(IndexError::Io(e)),
        };

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let tags = if name.starts_with(DIGEST_PREFIX) {
                read_manifest(&path).await?
            } else {
                parse_bucket_name(&name)
            };
            match tags {
                Some(tags) => buckets.push((path, tags)),
                None => debug!("Ignoring unrelated directory {:?}", path),
            }
        }

        Ok(buckets)
    }

    /// Buckets whose tag set contains every tag of `query`
    async fn matching_buckets(&self, query: &[String]) -> Result<Vec<PathBuf>, IndexError> {
        Ok(self
            .buckets()
            .await?
            .into_iter()
            .filter(|(_, tags)| is_superset(tags, query))
            .map(|(path, _)| path)
            .collect())
    }

    /// Every shard log below a bucket
    async fn shards(bucket: &Path) -> Result<Vec<PathBuf>, IndexError> {
        let mut shards = Vec::new();
        for level1 in list_dirs(bucket).await? {
            for level2 in list_dirs(&level1).await? {
                let shard = level2.join(SHARD_FILE);
                if fs::try_exists(&shard).await? {
                    shards.push(shard);
                }
            }
        }
        Ok(shards)
    }

    /// Insert or refresh a record, scanning the shard once for the key.
    /// The caller holds the bucket shared.
    async fn upsert(&self, shard: &Path, record: Record) -> Result<(), IndexError> {
        let _guard = self.locks.shard(shard).await;

        let mut records = read_records(shard).await?;
        match records.iter().position(|r| r.key == record.key) {
            Some(pos) if records[pos].expires_at == record.expires_at => Ok(()),
            Some(pos) => {
                records[pos] = record;
                write_records(shard, &records).await
            }
            None => {
                let mut file = open_for_append(shard).await?;
                file.write_all(record.encode().as_bytes()).await?;
                file.flush().await?;
                Ok(())
            }
        }
    }

    /// Rewrite a shard without the given keys, returning how many were
    /// removed. The caller holds the bucket shared.
    async fn remove_from_shard(
        &self,
        shard: &Path,
        keys: &HashSet<String>,
    ) -> Result<usize, IndexError> {
        let _guard = self.locks.shard(shard).await;

        let records = read_records(shard).await?;
        let before = records.len();
        let kept: Vec<Record> = records
            .into_iter()
            .filter(|r| !keys.contains(&r.key))
            .collect();
        let removed = before - kept.len();

        if removed > 0 {
            write_records(shard, &kept).await?;
        }

        Ok(removed)
    }

    /// Live keys of one shard, dropping expired records from the log.
    /// The caller holds the bucket shared.
    async fn live_keys(&self, shard: &Path, now: i64) -> Result<Vec<String>, IndexError> {
        let _guard = self.locks.shard(shard).await;

        let (live, expired): (Vec<Record>, Vec<Record>) = read_records(shard)
            .await?
            .into_iter()
            .partition(|r| r.expires_at > now);

        if !expired.is_empty() {
            debug!("Sweeping {} expired records from {:?}", expired.len(), shard);
            if let Err(e) = write_records(shard, &live).await {
                warn!("Failed to sweep expired records from {:?}: {}", shard, e);
            }
        }

        Ok(live.into_iter().map(|r| r.key).collect())
    }

    /// Remove a key from every bucket except `keep`
    async fn remove_everywhere(&self, key: &str, keep: Option<&Path>) -> Result<bool, IndexError> {
        let keys = HashSet::from([key.to_string()]);
        let mut found = false;

        for (bucket, _) in self.buckets().await? {
            if keep == Some(bucket.as_path()) {
                continue;
            }
            let _bucket = self.locks.share_bucket(&bucket).await;
            let shard = Self::shard_path(&bucket, key);
            if fs::try_exists(&shard).await? && self.remove_from_shard(&shard, &keys).await? > 0 {
                found = true;
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl TagIndex for BucketIndex {
    async fn save(
        &self,
        key: &str,
        tags: &[String],
        expires_at: DateTime<Utc>,
    ) -> Result<(), IndexError> {
        Self::validate_key(key)?;
        validate_tags(tags)?;

        let tags = canonical_tags(tags);
        let name = bucket_name(&tags);
        let bucket = self.base_path.join(&name);
        debug!("Indexing {} in bucket {:?}", key, bucket);

        // A key lives in exactly one bucket
        self.remove_everywhere(key, Some(&bucket)).await?;

        let _bucket = self.locks.share_bucket(&bucket).await;
        if name.starts_with(DIGEST_PREFIX) {
            write_manifest(&bucket, &tags, key).await?;
        }

        let shard = Self::shard_path(&bucket, key);
        self.upsert(
            &shard,
            Record {
                key: key.to_string(),
                expires_at: expires_at.timestamp(),
            },
        )
        .await
    }

    async fn delete_entry_by_key(&self, key: &str) -> Result<bool, IndexError> {
        Self::validate_key(key)?;
        self.remove_everywhere(key, None).await
    }

    async fn delete_entry_by_tags(&self, tags: &[String]) -> Result<(), IndexError> {
        let buckets = self.matching_buckets(tags).await?;
        info!("Removing {} index buckets for tags {:?}", buckets.len(), tags);

        for bucket in buckets {
            let _bucket = self.locks.own_bucket(&bucket).await;
            match fs::remove_dir_all(&bucket).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(IndexError::Io(e)),
            }
        }

        Ok(())
    }

    async fn select_by_tags(&self, tags: &[String]) -> Result<Vec<String>, IndexError> {
        let now = Utc::now().timestamp();
        let mut keys = Vec::new();

        for bucket in self.matching_buckets(tags).await? {
            let _bucket = self.locks.share_bucket(&bucket).await;
            for shard in Self::shards(&bucket).await? {
                keys.extend(self.live_keys(&shard, now).await?);
            }
        }

        Ok(keys)
    }
}

/// Directory name for a canonical tag set
fn bucket_name(tags: &[String]) -> String {
    let mut name = String::from("_");
    for tag in tags {
        name.push_str(&escape_tag(tag));
        name.push('_');
    }

    if name.len() <= MAX_BUCKET_NAME {
        return name;
    }
    let hash = Sha256::digest(name.as_bytes());
    format!("{}{}", DIGEST_PREFIX, hex::encode(&hash[..16]))
}

fn parse_bucket_name(name: &str) -> Option<Vec<String>> {
    let inner = name.strip_prefix('_')?.strip_suffix('_')?;
    if inner.is_empty() {
        return None;
    }
    inner.split('_').map(unescape_tag).collect()
}

/// Record the tag set of a digest-addressed bucket once
async fn write_manifest(bucket: &Path, tags: &[String], key: &str) -> Result<(), IndexError> {
    let manifest = bucket.join(MANIFEST_FILE);
    if fs::try_exists(&manifest).await? {
        return Ok(());
    }

    fs::create_dir_all(bucket).await?;
    let data: String = tags.iter().map(|t| format!("{}\n", escape_tag(t))).collect();

    // Concurrent writers produce identical content, each through its own
    // temp file
    let temp_path = bucket.join(format!("{}.{}.tmp", MANIFEST_FILE, key));
    fs::write(&temp_path, data.as_bytes()).await?;
    fs::rename(&temp_path, &manifest).await?;
    Ok(())
}

/// Tag set of a digest-addressed bucket, `None` while it has no manifest
async fn read_manifest(bucket: &Path) -> Result<Option<Vec<String>>, IndexError> {
    let data = match fs::read_to_string(bucket.join(MANIFEST_FILE)).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IndexError::Io(e)),
    };

    let tags: Option<Vec<String>> = data.lines().map(unescape_tag).collect();
    Ok(tags.filter(|t| !t.is_empty()))
}

/// Percent-encode everything outside `[A-Za-z0-9.-]`, which keeps `_` free
/// to act as the separator and `/` out of directory names.
fn escape_tag(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len());
    for byte in tag.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn unescape_tag(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = escaped.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    if out.is_empty() {
        return None;
    }
    String::from_utf8(out).ok()
}

async fn list_dirs(path: &Path) -> Result<Vec<PathBuf>, IndexError> {
    let mut dirs = Vec::new();
    let mut dir = match fs::read_dir(path).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(IndexError::Io(e)),
    };
    while let Some(entry) = dir.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

/// Open a shard log for appending, creating its directories. A sibling shard
/// that empties out may remove a shared parent in between, so `NotFound` is
/// retried.
async fn open_for_append(shard: &Path) -> Result<File, IndexError> {
    let mut attempt = 1;
    loop {
        let created = match shard.parent() {
            Some(parent) => fs::create_dir_all(parent).await,
            None => Ok(()),
        };
        let opened = match created {
            Ok(()) => {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(shard)
                    .await
            }
            Err(e) => Err(e),
        };

        match opened {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == ErrorKind::NotFound && attempt < OPEN_ATTEMPTS => {
                debug!("Directory of {:?} vanished, retrying", shard);
                attempt += 1;
            }
            Err(e) => return Err(IndexError::Io(e)),
        }
    }
}

async fn read_records(shard: &Path) -> Result<Vec<Record>, IndexError> {
    let data = match fs::read(shard).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(IndexError::Io(e)),
    };

    let corrupt = |reason: String| IndexError::Corrupt {
        path: shard.display().to_string(),
        reason,
    };

    if data.len() % RECORD_LEN != 0 {
        return Err(corrupt(format!(
            "length {} is not a multiple of {}",
            data.len(),
            RECORD_LEN
        )));
    }

    data.chunks(RECORD_LEN)
        .map(|chunk| -> Result<Record, IndexError> {
            let text = std::str::from_utf8(chunk)
                .map_err(|_| corrupt("record is not valid UTF-8".to_string()))?;
            let (key, expiry) = text.split_at(KEY_LEN);
            let expires_at = expiry
                .parse::<i64>()
                .map_err(|_| corrupt(format!("invalid expiry {:?}", expiry)))?;
            Ok(Record {
                key: key.to_string(),
                expires_at,
            })
        })
        .collect()
}

/// Replace a shard log, removing it and any emptied directories when no
/// records remain
async fn write_records(shard: &Path, records: &[Record]) -> Result<(), IndexError> {
    if records.is_empty() {
        match fs::remove_file(shard).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(IndexError::Io(e)),
        }
        // Directories still in use by a sibling are not empty and stay
        let mut dir = shard.parent();
        for _ in 0..3 {
            match dir {
                Some(d) if fs::remove_dir(d).await.is_ok() => dir = d.parent(),
                _ => break,
            }
        }
        return Ok(());
    }

    let data: String = records.iter().map(Record::encode).collect();

    // Write atomically using a temp file
    let temp_path = shard.with_extension("tmp");
    fs::write(&temp_path, data.as_bytes()).await?;
    fs::rename(&temp_path, shard).await?;
    Ok(())
}
