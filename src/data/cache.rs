// Bounded key/value store with per-entry time-to-live.
//
// Reads, expiry purges and refreshes of a key already present only lock that
// key's shard. Admitting a new key also takes the admission lock, so capacity
// checks and evictions never race each other.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    // Write order, lowest is evicted first.
    seq: u64,
}

pub struct ExpiringCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    next_seq: AtomicU64,
    admission: Mutex<()>,
    capacity: usize,
    ttl: Duration,
}

impl<V: Clone> ExpiringCache<V> {
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
            admission: Mutex::new(()),
            capacity: capacity.get(),
            ttl,
        }
    }

    // A stale entry is purged and reported as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        self.purge_key(key, now);
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let live = match self.entries.get(key) {
            Some(entry) => now < entry.expires_at,
            None => return false,
        };
        if !live {
            self.purge_key(key, now);
        }
        live
    }

    // Inserts or overwrites `key`, resetting its expiry and recency.
    // Returns the key evicted to make room, if any.
    pub fn put(&self, key: impl Into<String>, value: V) -> Option<String> {
        let key = key.into();
        let entry = self.new_entry(value);

        if let Some(mut existing) = self.entries.get_mut(&key) {
            *existing = entry;
            return None;
        }

        self.admit(key, entry, false).1
    }

    // Stores `value` only when `key` has no live entry. Returns whether it was stored.
    pub fn put_if_absent(&self, key: impl Into<String>, value: V) -> bool {
        let entry = self.new_entry(value);
        self.admit(key.into(), entry, true).0
    }

    // Drops every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let live = now < entry.expires_at;
            if !live {
                purged += 1;
            }
            live
        });
        purged
    }

    // Includes entries that expired but were not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn new_entry(&self, value: V) -> CacheEntry<V> {
        CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn admit(&self, key: String, entry: CacheEntry<V>, keep_live: bool) -> (bool, Option<String>) {
        let _admission = self.admission.lock();
        let mut evicted = None;

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.purge_expired();
            while self.entries.len() >= self.capacity {
                let Some(oldest) = self.oldest_key() else {
                    break;
                };
                if self.entries.remove(&oldest).is_some() {
                    evicted = Some(oldest);
                }
            }
        }

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if keep_live && Instant::now() < occupied.get().expires_at {
                    return (false, evicted);
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        (true, evicted)
    }

    fn oldest_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|entry| entry.seq)
            .map(|entry| entry.key().clone())
    }

    fn purge_key(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| now >= entry.expires_at);
    }
}
