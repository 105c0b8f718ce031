//! Key-Value Store with Expiry Support
//!
//! This module implements the core storage of Redkite: a byte-value map
//! split into two regions.
//!
//! ## Design Decisions
//!
//! 1. **Two Regions**: keys without an expiry live in `persistent`, keys with
//!    one live in `volatile`. A key is in at most one region at a time.
//! 2. **Single Owner**: the store takes `&mut self` and has no locking of its
//!    own. All access is serialized through [`Db`](super::Db), so every
//!    operation runs to completion before the next one starts.
//! 3. **One Deletion Path**: explicit deletes and every expiration mechanism go
//!    through [`Store::remove`], which also drops the expiry record.
//! 4. **Dirty Counter**: every effective mutation bumps it exactly once; the
//!    snapshot manager reads it to decide when to save.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                    Store                     │
//! │  ┌──────────────┐   ┌──────────────┐         │
//! │  │  persistent  │   │   volatile   │◄─┐      │
//! │  │   HashMap    │   │   HashMap    │  │      │
//! │  └──────────────┘   └──────────────┘  │      │
//! │                     ┌──────────────┐  │      │
//! │                     │  TtlManager  │──┘      │
//! │                     └──────────────┘         │
//! └──────────────────────────────────────────────┘
//! ```

use crate::storage::expiry::ExpiryConfig;
use crate::storage::ttl::TtlManager;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// The key-value store.
///
/// # Example
///
/// ```
/// use redkite::storage::Store;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let mut store = Store::new();
///
/// store.set("name".to_string(), Bytes::from("kite"), None);
/// assert_eq!(store.get("name"), Some(Bytes::from("kite")));
/// assert_eq!(store.ttl("name"), -1);
///
/// store.set("session".to_string(), Bytes::from("abc123"), Some(Duration::from_secs(60)));
/// assert!(store.ttl("session") > 0);
/// assert_eq!(store.ttl("missing"), -2);
/// ```
#[derive(Debug, Default)]
pub struct Store {
    /// Keys without expiry
    persistent: HashMap<String, Bytes>,

    /// Keys with an expiry record in `ttl`
    volatile: HashMap<String, Bytes>,

    /// Expiry records of the volatile region
    ttl: TtlManager,

    /// Sampling and lazy cleanup tuning
    config: ExpiryConfig,

    /// Mutations since the last successful save
    dirty: u64,

    /// Statistics: number of keys removed by expiration
    expired: u64,
}

impl Store {
    /// Creates an empty store with the default expiry tuning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store using `config` for sampling and lazy cleanup.
    pub fn with_config(config: ExpiryConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. An expired key
    /// found here is removed on the spot (passive expiration).
    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        if let Some(value) = self.persistent.get(key) {
            return Some(value.clone());
        }
        if self.expire_if_due(key) {
            return None;
        }
        self.volatile.get(key).cloned()
    }

    /// Stores `value` under `key`.
    ///
    /// Without a TTL the key becomes persistent and loses any previous expiry.
    /// With a TTL it moves to the volatile region.
    pub fn set(&mut self, key: String, value: Bytes, ttl: Option<Duration>) {
        match ttl {
            None => {
                if self.volatile.remove(&key).is_some() {
                    self.ttl.cancel(&key);
                }
                self.persistent.insert(key, value);
            }
            Some(ttl) => {
                self.persistent.remove(&key);
                self.ttl.schedule(&key, ttl);
                self.volatile.insert(key, value);
            }
        }
        self.dirty += 1;
    }

    /// Deletes a key. Returns `true` if it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        if self.expire_if_due(key) {
            return false;
        }
        self.remove(key)
    }

    /// Deletes several keys, returning how many existed.
    pub fn delete_many<K: AsRef<str>>(&mut self, keys: &[K]) -> u64 {
        keys.iter().filter(|key| self.delete(key.as_ref())).count() as u64
    }

    /// Checks if a key exists (and is not expired).
    pub fn exists(&mut self, key: &str) -> bool {
        if self.persistent.contains_key(key) {
            return true;
        }
        !self.expire_if_due(key) && self.volatile.contains_key(key)
    }

    /// Sets an expiry of `seconds` on an existing key.
    ///
    /// Returns `false` if the key doesn't exist. A non-positive value deletes
    /// the key immediately and returns `true`.
    pub fn expire(&mut self, key: &str, seconds: i64) -> bool {
        self.pexpire(key, seconds.saturating_mul(1000))
    }

    /// Like [`Store::expire`] with a TTL in milliseconds.
    pub fn pexpire(&mut self, key: &str, millis: i64) -> bool {
        if !self.exists(key) {
            return false;
        }
        if millis <= 0 {
            return self.remove(key);
        }

        if let Some(value) = self.persistent.remove(key) {
            self.volatile.insert(key.to_owned(), value);
        }
        self.ttl.schedule(key, Duration::from_millis(millis.unsigned_abs()));
        self.dirty += 1;
        true
    }

    /// Remaining TTL in seconds, rounded to the nearest second.
    ///
    /// Returns `-1` if the key has no expiry and `-2` if it doesn't exist.
    pub fn ttl(&mut self, key: &str) -> i64 {
        match self.pttl(key) {
            ms if ms < 0 => ms,
            ms => (ms + 500) / 1000,
        }
    }

    /// Remaining TTL in milliseconds, `-1` without expiry, `-2` if absent.
    pub fn pttl(&mut self, key: &str) -> i64 {
        if self.persistent.contains_key(key) {
            return -1;
        }
        if self.expire_if_due(key) || !self.volatile.contains_key(key) {
            return -2;
        }
        self.ttl
            .remaining(key)
            .map_or(-1, |left| i64::try_from(left.as_millis()).unwrap_or(i64::MAX))
    }

    /// Removes the expiry from a key (makes it persistent).
    ///
    /// Returns `false` if the key doesn't exist or had no expiry.
    pub fn persist(&mut self, key: &str) -> bool {
        if self.expire_if_due(key) {
            return false;
        }
        match self.volatile.remove(key) {
            Some(value) => {
                self.ttl.cancel(key);
                self.persistent.insert(key.to_owned(), value);
                self.dirty += 1;
                true
            }
            None => false,
        }
    }

    /// Number of stored keys, including expired keys not yet reclaimed.
    pub fn len(&self) -> usize {
        self.persistent.len() + self.volatile.len()
    }

    /// Number of keys with an expiry.
    pub fn volatile_len(&self) -> usize {
        self.volatile.len()
    }

    /// Checks if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutations since the last successful save.
    pub fn dirty_count(&self) -> u64 {
        self.dirty
    }

    /// Records that a save captured `saved` mutations.
    ///
    /// Writes that happened while the save was in flight stay counted.
    pub fn mark_saved(&mut self, saved: u64) {
        self.dirty = self.dirty.saturating_sub(saved);
    }

    /// Copies every live key of both regions, sorted by key.
    ///
    /// Expiry information is not part of the copy.
    pub fn snapshot(&self) -> BTreeMap<String, Bytes> {
        let live_volatile = self
            .volatile
            .iter()
            .filter(|(key, _)| !self.ttl.is_expired(key));

        self.persistent
            .iter()
            .chain(live_volatile)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Replaces the whole content with `entries`, all persistent.
    ///
    /// Returns the number of keys loaded. The dirty counter starts over.
    pub fn replace_all<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, Bytes)>,
    {
        self.clear();
        self.persistent.extend(entries);
        self.persistent.len()
    }

    /// Removes every key and expiry record.
    pub fn clear(&mut self) {
        self.persistent.clear();
        self.volatile.clear();
        self.ttl.clear();
        self.dirty = 0;
    }

    /// Active expiration: removes every key whose deadline has passed.
    pub fn purge_expired(&mut self) -> usize {
        let due = self.ttl.due(Instant::now());
        due.iter().filter(|key| self.remove_expired(key)).count()
    }

    /// Earliest expiry deadline, if any key is volatile.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.ttl.next_deadline()
    }

    /// Sampling pass over random volatile keys, followed by a lazy batch
    /// cleanup once enough keys have been seen expired.
    pub fn sample_sweep(&mut self) -> usize {
        let sampled = self.ttl.sample_expired(self.config.sample_size);
        let removed = sampled
            .iter()
            .filter(|key| self.remove_expired(key))
            .count();
        self.ttl.note_possibly_expired(removed);

        removed + self.lazy_cleanup()
    }

    /// Returns statistics about the store.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            volatile_keys: self.volatile.len() as u64,
            expired: self.expired,
            dirty: self.dirty,
        }
    }

    fn lazy_cleanup(&mut self) -> usize {
        let Some(batch) = self
            .ttl
            .lazy_batch(self.config.lazy_threshold, self.config.lazy_batch_limit)
        else {
            return 0;
        };

        let removed = batch
            .expired
            .iter()
            .filter(|key| self.remove_expired(key))
            .count();
        self.ttl.settle(removed, batch.complete);
        removed
    }

    /// Passive expiration. Returns `true` if `key` was expired and removed.
    fn expire_if_due(&mut self, key: &str) -> bool {
        if !self.ttl.is_expired(key) {
            return false;
        }
        self.remove_expired(key);
        self.ttl.note_possibly_expired(1);
        true
    }

    fn remove_expired(&mut self, key: &str) -> bool {
        let removed = self.remove(key);
        if removed {
            self.expired += 1;
        }
        removed
    }

    /// The single deletion path.
    fn remove(&mut self, key: &str) -> bool {
        let removed = if self.persistent.remove(key).is_some() {
            true
        } else {
            self.ttl.cancel(key);
            self.volatile.remove(key).is_some()
        };
        if removed {
            self.dirty += 1;
        }
        removed
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Keys with an expiry
    pub volatile_keys: u64,
    /// Total expired keys cleaned up
    pub expired: u64,
    /// Mutations since the last save
    pub dirty: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn test_set_and_get() {
        let mut store = Store::new();

        store.set(key("name"), Bytes::from("kite"), None);
        assert_eq!(store.get("name"), Some(Bytes::from("kite")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_nonexistent() {
        let mut store = Store::new();
        assert_eq!(store.get("nonexistent"), None);
    }

    #[test]
    fn test_regions_are_exclusive() {
        let mut store = Store::new();

        store.set(key("k"), Bytes::from("v1"), Some(Duration::from_secs(60)));
        assert_eq!(store.volatile_len(), 1);

        store.set(key("k"), Bytes::from("v2"), None);
        assert_eq!(store.volatile_len(), 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.ttl("k"), -1);
        assert_eq!(store.next_expiry(), None);

        store.set(key("k"), Bytes::from("v3"), Some(Duration::from_secs(60)));
        assert_eq!(store.volatile_len(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k"), Some(Bytes::from("v3")));
    }

    #[test]
    fn test_delete() {
        let mut store = Store::new();

        store.set(key("a"), Bytes::from("1"), None);
        store.set(key("b"), Bytes::from("2"), Some(Duration::from_secs(60)));

        assert_eq!(store.delete_many(&["a", "b", "c"]), 2);
        assert!(!store.delete("a"));
        assert!(store.is_empty());
        assert_eq!(store.next_expiry(), None);
    }

    #[test]
    fn test_exists() {
        let mut store = Store::new();

        assert!(!store.exists("key"));
        store.set(key("key"), Bytes::from("value"), None);
        assert!(store.exists("key"));
    }

    #[test]
    fn test_ttl() {
        let mut store = Store::new();

        assert_eq!(store.ttl("nonexistent"), -2);
        assert_eq!(store.pttl("nonexistent"), -2);

        store.set(key("persistent"), Bytes::from("value"), None);
        assert_eq!(store.ttl("persistent"), -1);
        assert_eq!(store.pttl("persistent"), -1);

        store.set(
            key("expiring"),
            Bytes::from("value"),
            Some(Duration::from_secs(100)),
        );
        let ttl = store.ttl("expiring");
        assert!(ttl > 0 && ttl <= 100);
        let pttl = store.pttl("expiring");
        assert!(pttl > 99_000 && pttl <= 100_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_rounds_to_nearest_second() {
        let mut store = Store::new();
        store.set(key("k"), Bytes::from("v"), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(store.pttl("k"), 9600);
        assert_eq!(store.ttl("k"), 10);

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(store.ttl("k"), 9);
    }

    #[test]
    fn test_expire_and_persist() {
        let mut store = Store::new();

        assert!(!store.expire("missing", 10));
        assert_eq!(store.dirty_count(), 0);

        store.set(key("key"), Bytes::from("value"), None);
        assert!(store.expire("key", 60));
        assert!(store.ttl("key") > 0);
        assert_eq!(store.volatile_len(), 1);

        assert!(store.persist("key"));
        assert_eq!(store.ttl("key"), -1);
        assert!(!store.persist("key"));
        assert!(!store.persist("missing"));
    }

    #[test]
    fn test_non_positive_expire_deletes() {
        let mut store = Store::new();

        store.set(key("a"), Bytes::from("1"), None);
        store.set(key("b"), Bytes::from("2"), Some(Duration::from_secs(60)));

        assert!(store.expire("a", 0));
        assert!(store.pexpire("b", -1));
        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_expiry() {
        let mut store = Store::new();
        store.set(key("key"), Bytes::from("value"), Some(Duration::from_secs(1)));
        assert!(store.exists("key"));

        tokio::time::advance(Duration::from_millis(1001)).await;

        // No sweeper is running: the read itself removes the key.
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("key"), None);
        assert_eq!(store.len(), 0);
        assert_eq!(store.ttl("key"), -2);
        assert_eq!(store.stats().expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_is_not_updated() {
        let mut store = Store::new();
        store.set(key("key"), Bytes::from("value"), Some(Duration::from_millis(10)));
        tokio::time::advance(Duration::from_millis(20)).await;

        assert!(!store.expire("key", 100));
        assert!(!store.persist("key"));
        assert!(!store.delete("key"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let mut store = Store::new();

        for i in 0..10 {
            store.set(
                format!("key{}", i),
                Bytes::from("value"),
                Some(Duration::from_millis(50)),
            );
        }
        store.set(key("later"), Bytes::from("v"), Some(Duration::from_secs(60)));
        store.set(key("persistent"), Bytes::from("value"), None);

        tokio::time::advance(Duration::from_millis(100)).await;

        assert_eq!(store.purge_expired(), 10);
        assert_eq!(store.len(), 2);
        assert_eq!(store.purge_expired(), 0);
        assert!(store.next_expiry().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_sweep_with_lazy_cleanup() {
        let config = ExpiryConfig {
            sample_size: 20,
            lazy_threshold: 10,
            lazy_batch_limit: 100,
            ..Default::default()
        };
        let mut store = Store::with_config(config);

        for i in 0..200 {
            store.set(
                format!("key{}", i),
                Bytes::from("value"),
                Some(Duration::from_millis(10)),
            );
        }
        tokio::time::advance(Duration::from_millis(20)).await;

        // 20 sampled, which crosses the threshold and triggers a batch of 100.
        assert_eq!(store.sample_sweep(), 120);
        assert_eq!(store.len(), 80);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_skips_expired() {
        let mut store = Store::new();
        store.set(key("b"), Bytes::from("2"), None);
        store.set(key("a"), Bytes::from("1"), Some(Duration::from_secs(60)));
        store.set(key("gone"), Bytes::from("x"), Some(Duration::from_millis(5)));

        tokio::time::advance(Duration::from_millis(10)).await;

        let snapshot = store.snapshot();
        let keys: Vec<&str> = snapshot.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_dirty_counter() {
        let mut store = Store::new();

        store.set(key("a"), Bytes::from("1"), None);
        store.set(key("b"), Bytes::from("2"), None);
        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert!(store.expire("b", 100));
        assert!(store.persist("b"));
        assert!(!store.persist("b"));
        assert_eq!(store.get("b"), Some(Bytes::from("2")));
        assert_eq!(store.dirty_count(), 5);

        store.mark_saved(3);
        assert_eq!(store.dirty_count(), 2);
        store.mark_saved(10);
        assert_eq!(store.dirty_count(), 0);
    }

    #[test]
    fn test_replace_all() {
        let mut store = Store::new();
        store.set(key("old"), Bytes::from("x"), Some(Duration::from_secs(5)));

        let loaded = store.replace_all(vec![
            (key("a"), Bytes::from("1")),
            (key("b"), Bytes::from("2")),
        ]);

        assert_eq!(loaded, 2);
        assert_eq!(store.get("old"), None);
        assert_eq!(store.ttl("a"), -1);
        assert_eq!(store.dirty_count(), 0);
        assert_eq!(store.next_expiry(), None);
    }
}
