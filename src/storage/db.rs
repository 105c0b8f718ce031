//! Shared Store Handle
//!
//! `Db` wraps the single [`Store`] so connections, the expiry sweeper and the
//! snapshot manager can share it. Every call takes the store lock for the
//! duration of one operation and never across an `.await`.

use crate::storage::engine::{StorageStats, Store};
use crate::storage::expiry::ExpiryConfig;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A cheaply cloneable handle to the store.
#[derive(Debug, Clone)]
pub struct Db {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    store: Mutex<Store>,

    /// Signalled when a new earliest expiry deadline is scheduled, so the
    /// sweeper can re-arm its timer.
    expiry_changed: Notify,

    config: ExpiryConfig,
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

impl Db {
    /// Creates a handle to an empty store with default expiry tuning.
    pub fn new() -> Self {
        Self::with_config(ExpiryConfig::default())
    }

    /// Creates a handle to an empty store with the given expiry tuning.
    pub fn with_config(config: ExpiryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Mutex::new(Store::with_config(config.clone())),
                expiry_changed: Notify::new(),
                config,
            }),
        }
    }

    /// Expiry tuning this store was created with.
    pub fn config(&self) -> &ExpiryConfig {
        &self.shared.config
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.lock().get(key)
    }

    pub fn set(&self, key: String, value: Bytes, ttl: Option<Duration>) {
        let rearm = {
            let mut store = self.lock();
            let before = store.next_expiry();
            store.set(key, value, ttl);
            is_earlier(store.next_expiry(), before)
        };
        if rearm {
            self.shared.expiry_changed.notify_one();
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().delete(key)
    }

    pub fn delete_many<K: AsRef<str>>(&self, keys: &[K]) -> u64 {
        self.lock().delete_many(keys)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.lock().exists(key)
    }

    pub fn expire(&self, key: &str, seconds: i64) -> bool {
        self.pexpire(key, seconds.saturating_mul(1000))
    }

    pub fn pexpire(&self, key: &str, millis: i64) -> bool {
        let (updated, rearm) = {
            let mut store = self.lock();
            let before = store.next_expiry();
            let updated = store.pexpire(key, millis);
            (updated, is_earlier(store.next_expiry(), before))
        };
        if rearm {
            self.shared.expiry_changed.notify_one();
        }
        updated
    }

    pub fn ttl(&self, key: &str) -> i64 {
        self.lock().ttl(key)
    }

    pub fn pttl(&self, key: &str) -> i64 {
        self.lock().pttl(key)
    }

    pub fn persist(&self, key: &str) -> bool {
        self.lock().persist(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Keys that currently carry a TTL.
    pub fn volatile_len(&self) -> usize {
        self.lock().volatile_len()
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.lock().next_expiry()
    }

    pub fn dirty_count(&self) -> u64 {
        self.lock().dirty_count()
    }

    pub fn mark_saved(&self, saved: u64) {
        self.lock().mark_saved(saved);
    }

    /// Captures the live entries together with the dirty counter at that
    /// moment, in one critical section.
    pub fn snapshot(&self) -> (BTreeMap<String, Bytes>, u64) {
        let store = self.lock();
        (store.snapshot(), store.dirty_count())
    }

    pub fn replace_all<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, Bytes)>,
    {
        self.lock().replace_all(entries)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Runs active expiration and returns the number of keys removed along
    /// with the next deadline to wake up for.
    pub fn purge_expired(&self) -> (usize, Option<Instant>) {
        let mut store = self.lock();
        let removed = store.purge_expired();
        (removed, store.next_expiry())
    }

    pub fn sample_sweep(&self) -> usize {
        self.lock().sample_sweep()
    }

    pub fn stats(&self) -> StorageStats {
        self.lock().stats()
    }

    /// Completes once a new earliest deadline has been scheduled.
    pub(crate) async fn expiry_changed(&self) {
        self.shared.expiry_changed.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.shared
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_earlier(after: Option<Instant>, before: Option<Instant>) -> bool {
    match (after, before) {
        (Some(after), Some(before)) => after < before,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_share_store() {
        let db = Db::new();
        let other = db.clone();

        db.set("key".to_string(), Bytes::from("value"), None);
        assert_eq!(other.get("key"), Some(Bytes::from("value")));
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_snapshot_captures_dirty() {
        let db = Db::new();
        db.set("a".to_string(), Bytes::from("1"), None);
        db.set("b".to_string(), Bytes::from("2"), None);

        let (entries, dirty) = db.snapshot();
        db.set("c".to_string(), Bytes::from("3"), None);
        db.mark_saved(dirty);

        assert_eq!(entries.len(), 2);
        assert_eq!(db.dirty_count(), 1);
    }

    #[test]
    fn test_volatile_keys_and_next_expiry() {
        let db = Db::new();
        db.set("plain".to_string(), Bytes::from("v"), None);
        assert_eq!(db.volatile_len(), 0);
        assert!(db.next_expiry().is_none());

        db.set("soon".to_string(), Bytes::from("v"), Some(Duration::from_secs(5)));
        db.set("later".to_string(), Bytes::from("v"), Some(Duration::from_secs(50)));
        assert_eq!(db.volatile_len(), 2);

        let next = db.next_expiry().unwrap();
        assert!(next <= Instant::now() + Duration::from_secs(5));

        db.persist("soon");
        assert_eq!(db.volatile_len(), 1);
        assert!(db.next_expiry().unwrap() > Instant::now() + Duration::from_secs(5));
    }

    #[test]
    fn test_is_earlier() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert!(is_earlier(Some(now), None));
        assert!(is_earlier(Some(now), Some(later)));
        assert!(!is_earlier(Some(later), Some(now)));
        assert!(!is_earlier(Some(now), Some(now)));
        assert!(!is_earlier(None, Some(now)));
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let db = Db::new();
        let mut handles = vec![];

        for i in 0..10 {
            let db = db.clone();
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key_{}_{}", i, j);
                    db.set(key.clone(), Bytes::from("value"), None);
                    assert!(db.exists(&key));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(db.len(), 1000);
    }
}
