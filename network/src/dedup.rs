//! Bounded memory of recently processed masternode message hashes.
//!
//! Hashes live in two generations. Once the current generation reaches half
//! the capacity it becomes the previous one and the old previous generation
//! is dropped, so at most `capacity` hashes are remembered and the newest
//! half is never evicted.

use std::collections::HashSet;

use apollon_types::MessageHash;

/// Default dedup capacity in hashes.
pub const DEFAULT_DEDUP_CAPACITY: usize = 65_536;

pub struct MessageDedup {
    generation_size: usize,
    current: HashSet<MessageHash>,
    previous: HashSet<MessageHash>,
}

impl MessageDedup {
    pub fn new(capacity: usize) -> Self {
        let generation_size = (capacity / 2).max(1);
        Self {
            generation_size,
            current: HashSet::with_capacity(generation_size),
            previous: HashSet::new(),
        }
    }

    /// `true` if the hash was already seen. A new hash is remembered.
    pub fn is_duplicate(&mut self, hash: &MessageHash) -> bool {
        if self.current.contains(hash) || self.previous.contains(hash) {
            return true;
        }
        if self.current.len() >= self.generation_size {
            self.previous = std::mem::take(&mut self.current);
        }
        self.current.insert(*hash);
        false
    }

    /// Forget a hash so the message can be processed again, e.g. after a
    /// rejection that was not the sender's fault.
    pub fn forget(&mut self, hash: &MessageHash) {
        if !self.current.remove(hash) {
            self.previous.remove(hash);
        }
    }

    pub fn len(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MessageDedup {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
