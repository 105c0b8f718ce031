//! TTL Manager
//!
//! Owns the expiry instant of every volatile key. The store never does
//! expiry arithmetic itself: it asks this manager whether a key is expired,
//! how long it has left, and which keys are due, then deletes those keys
//! through its own deletion path.
//!
//! Three views over the same records back the three expiration mechanisms:
//!
//! - a deadline-ordered queue for **active** expiration (one timer for the
//!   earliest deadline instead of one timer per key),
//! - a key → deadline map for **passive** checks on access,
//! - random **sampling** over a dense key list, plus a bounded **lazy batch**
//!   over the queue once enough keys have been observed expired.
//!
//! The key list is kept compact with swap-remove, so a sample costs one
//! random index per key drawn whatever the size of the volatile region.

use rand::seq::index;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Longest TTL honoured; larger values are clamped.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Keys picked by one lazy cleanup pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LazyBatch {
    /// Expired keys to delete
    pub expired: Vec<String>,
    /// True when no further expired key exists beyond this batch
    pub complete: bool,
}

#[derive(Debug, Clone, Copy)]
struct Record {
    at: Instant,
    /// Position of the key in `keys`
    slot: usize,
}

/// Expiry bookkeeping for the volatile region.
#[derive(Debug, Default)]
pub struct TtlManager {
    /// Deadline of every volatile key
    deadlines: HashMap<String, Record>,
    /// Every volatile key, in no particular order
    keys: Vec<String>,
    /// Same records ordered by deadline
    queue: BTreeSet<(Instant, String)>,
    /// Keys recently seen expired, drives the lazy batch cleanup
    possibly_expired: usize,
}

impl TtlManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) the expiry of `key` to `ttl` from now.
    pub fn schedule(&mut self, key: &str, ttl: Duration) {
        self.cancel(key);
        let at = Instant::now() + ttl.min(MAX_TTL);
        let slot = self.keys.len();
        self.keys.push(key.to_owned());
        self.deadlines.insert(key.to_owned(), Record { at, slot });
        self.queue.insert((at, key.to_owned()));
    }

    /// Removes the expiry of `key`. Returns whether one existed.
    pub fn cancel(&mut self, key: &str) -> bool {
        let Some(Record { at, slot }) = self.deadlines.remove(key) else {
            return false;
        };
        self.queue.remove(&(at, key.to_owned()));

        self.keys.swap_remove(slot);
        if let Some(moved) = self.keys.get(slot) {
            if let Some(record) = self.deadlines.get_mut(moved) {
                record.slot = slot;
            }
        }
        true
    }

    /// The instant `key` expires at.
    pub fn expires_at(&self, key: &str) -> Option<Instant> {
        self.deadlines.get(key).map(|record| record.at)
    }

    /// Time left before `key` expires, zero once it has.
    pub fn remaining(&self, key: &str) -> Option<Duration> {
        self.expires_at(key)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Passive check: has the deadline of `key` passed?
    pub fn is_expired(&self, key: &str) -> bool {
        self.is_expired_at(key, Instant::now())
    }

    /// Earliest deadline among all records.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.first().map(|(at, _)| *at)
    }

    /// Keys whose deadline is at or before `now`, earliest first.
    pub fn due(&self, now: Instant) -> Vec<String> {
        self.queue
            .iter()
            .take_while(|(at, _)| *at <= now)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Picks up to `sample_size` distinct random keys and returns the
    /// expired ones.
    pub fn sample_expired(&self, sample_size: usize) -> Vec<String> {
        let amount = sample_size.min(self.keys.len());
        if amount == 0 {
            return Vec::new();
        }

        let now = Instant::now();
        let mut rng = rand::rng();
        index::sample(&mut rng, self.keys.len(), amount)
            .into_iter()
            .map(|slot| &self.keys[slot])
            .filter(|key| self.is_expired_at(key, now))
            .cloned()
            .collect()
    }

    fn is_expired_at(&self, key: &str, now: Instant) -> bool {
        self.deadlines.get(key).is_some_and(|record| now >= record.at)
    }

    /// Records that `count` more keys were found expired.
    pub fn note_possibly_expired(&mut self, count: usize) {
        self.possibly_expired = self.possibly_expired.saturating_add(count);
    }

    /// Current value of the possibly-expired counter.
    pub fn possibly_expired(&self) -> usize {
        self.possibly_expired
    }

    /// Returns a bounded batch of expired keys once the counter reached
    /// `threshold`, or `None` when no cleanup is due.
    pub fn lazy_batch(&self, threshold: usize, limit: usize) -> Option<LazyBatch> {
        if self.possibly_expired < threshold {
            return None;
        }
        let now = Instant::now();
        let expired: Vec<String> = self
            .queue
            .iter()
            .take(limit)
            .take_while(|(at, _)| *at <= now)
            .map(|(_, key)| key.clone())
            .collect();
        // The queue is ordered, so a short batch means nothing expired is left.
        let complete = expired.len() < limit;
        Some(LazyBatch { expired, complete })
    }

    /// Accounts for a finished lazy batch that removed `removed` keys.
    pub fn settle(&mut self, removed: usize, complete: bool) {
        if complete {
            self.possibly_expired = 0;
        } else {
            self.possibly_expired = self.possibly_expired.saturating_sub(removed);
        }
    }

    /// Number of keys with an expiry.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.keys.clear();
        self.queue.clear();
        self.possibly_expired = 0;
    }
}
