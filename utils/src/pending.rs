//! TTL-keyed bookkeeping for fire-and-forget requests.
//!
//! Requests are never awaited. Sending one registers its key with a
//! time-to-live; the matching reply later consumes the entry, and a
//! periodic sweep drops whatever expired. Time is always passed in, so
//! callers drive it from an injected clock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

use apollon_types::Timestamp;

/// Identifies one registration of a key. Re-registering a key yields a new token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestToken(pub u64);

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry<V> {
    token: RequestToken,
    expires_at: Timestamp,
    value: V,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingRequestTracker<K: Eq + Hash, V = ()> {
    entries: HashMap<K, Entry<V>>,
    next_token: u64,
}

impl<K: Eq + Hash + Clone, V> PendingRequestTracker<K, V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_token: 0,
        }
    }

    /// Register (or replace) a pending request expiring `ttl_secs` after `now`.
    pub fn register(&mut self, key: K, value: V, ttl_secs: u64, now: Timestamp) -> RequestToken {
        self.register_until(key, value, now.plus(ttl_secs))
    }

    /// Register (or replace) a pending request with an absolute expiry.
    pub fn register_until(&mut self, key: K, value: V, expires_at: Timestamp) -> RequestToken {
        let token = RequestToken(self.next_token);
        self.next_token += 1;
        self.entries.insert(
            key,
            Entry {
                token,
                expires_at,
                value,
            },
        );
        token
    }

    /// Whether `key` is registered and has not expired yet.
    pub fn is_pending(&self, key: &K, now: Timestamp) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| now < e.expires_at)
    }

    /// Whether `key` is registered at all, expired or not.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn expires_at(&self, key: &K) -> Option<Timestamp> {
        self.entries.get(key).map(|e| e.expires_at)
    }

    pub fn token(&self, key: &K) -> Option<RequestToken> {
        self.entries.get(key).map(|e| e.token)
    }

    /// Value of a live (unexpired) request.
    pub fn get(&self, key: &K, now: Timestamp) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|e| now < e.expires_at)
            .map(|e| &e.value)
    }

    /// Value of a registered request, ignoring expiry.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|e| &e.value)
    }

    pub fn peek_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    /// Take a live request out of the tracker. Expired entries are not returned
    /// (they stay until the next sweep).
    pub fn consume(&mut self, key: &K, now: Timestamp) -> Option<V> {
        if self.is_pending(key, now) {
            self.entries.remove(key).map(|e| e.value)
        } else {
            None
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Drop every entry whose expiry is strictly before `now` and return them.
    pub fn sweep(&mut self, now: Timestamp) -> Vec<(K, V)> {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at < now)
            .map(|(k, _)| k.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|e| (k, e.value)))
            .collect()
    }

    /// Keep only entries for which `keep` returns true.
    pub fn retain<F: FnMut(&K, &V) -> bool>(&mut self, mut keep: F) {
        self.entries.retain(|k, e| keep(k, &e.value));
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V, Timestamp)> {
        self.entries.iter().map(|(k, e)| (k, &e.value, e.expires_at))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: Eq + Hash + Clone, V> Default for PendingRequestTracker<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
