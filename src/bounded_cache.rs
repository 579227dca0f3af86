//! Bounded map with TTL and max-size eviction.
//!
//! Keeps the record of finished relays from growing without bound under long
//! runtimes. Each finished-intent entry is ~120 bytes, so the default
//! 100k entries stay around 12 MB.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

pub const DEFAULT_FINISHED_CACHE_SIZE: usize = 100_000;
pub const DEFAULT_FINISHED_CACHE_TTL_SECS: u64 = 86_400; // 24 hours

/// Bounded cache keyed by `K` with TTL and capacity limits.
///
/// - **Max capacity:** when full, the oldest entry is evicted on insert.
/// - **TTL:** expired entries are invisible to lookups and purged on insert.
pub struct BoundedCache<K, V> {
    map: HashMap<K, Entry<V>>,
    max_size: usize,
    ttl: Duration,
    next_seq: u64,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    // Insertion order; breaks ties between equal Instants.
    seq: u64,
}

impl<K: Eq + Hash + Copy, V> BoundedCache<K, V> {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            map: HashMap::new(),
            max_size: max_size.max(1),
            ttl: Duration::from_secs(ttl_secs),
            next_seq: 0,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map
            .get(key)
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| &e.value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.map
            .retain(|_, e| now.duration_since(e.inserted_at) < ttl);

        if !self.map.contains_key(&key) {
            while self.map.len() >= self.max_size {
                let oldest = self.map.iter().min_by_key(|(_, e)| e.seq).map(|(k, _)| *k);
                match oldest {
                    Some(k) => {
                        self.map.remove(&k);
                    }
                    None => break,
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.map.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                seq,
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.map.remove(key).map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
