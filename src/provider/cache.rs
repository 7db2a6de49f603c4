//! Small TTL cache used by the caching provider.
//!
//! Entries expire `ttl` after insertion. Expired entries are dropped by a
//! sweep that runs on access at most every `ttl / 2`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    last_sweep: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.sweep(&mut inner, now);
        inner
            .entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    fn insert_at(&self, key: K, value: V, now: Instant) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        self.sweep(&mut inner, now);
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    fn sweep(&self, inner: &mut Inner<K, V>, now: Instant) {
        if now.saturating_duration_since(inner.last_sweep) < self.ttl / 2 {
            return;
        }
        inner.entries.retain(|_, e| e.expires_at > now);
        inner.last_sweep = now;
    }
}
