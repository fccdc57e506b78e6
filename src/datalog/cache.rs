//! Advisory read-side caches.
//!
//! Both caches are observers: they may answer "maybe", never "must", so
//! correctness never depends on their contents. The tail cache keeps whole
//! recent records to satisfy near-tail reads without disk access; the read
//! cache keeps recently read keys to tighten the search bracket.

use super::record::{Key, Record};

/// Number of key slots in the read cache.
pub(super) const READ_CACHE_CAPACITY: usize = 10;

/// Ring of the most recent whole records (one minute of history).
pub(super) struct TailCache {
    slots: Vec<Record>,
    pos: usize,
}

impl TailCache {
    pub fn new(capacity: usize) -> Self {
        TailCache {
            slots: vec![Record::default(); capacity.max(1)],
            pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Insert, overwriting the oldest slot.
    pub fn push(&mut self, rec: &Record) {
        self.slots[self.pos] = *rec;
        self.pos = (self.pos + 1) % self.slots.len();
    }

    /// Look for a cached record with the requested timestamp.
    pub fn find(&self, ts: u32) -> Option<Record> {
        self.slots.iter().find(|r| r.rev != 0 && r.ts == ts).copied()
    }
}

/// Ring of recently read keys.
pub(super) struct ReadCache {
    keys: Vec<Key>,
    pos: usize,
}

impl ReadCache {
    pub fn new(capacity: usize) -> Self {
        ReadCache {
            keys: vec![Key::default(); capacity.max(1)],
            pos: 0,
        }
    }

    /// Record a key that was just read from disk.
    pub fn push(&mut self, key: Key) {
        self.keys[self.pos] = key;
        self.pos = (self.pos + 1) % self.keys.len();
    }

    /// Park the write position on a hit slot so a repeatedly requested key
    /// overwrites itself instead of flooding the ring.
    pub fn note_hit(&mut self, idx: usize) {
        if idx < self.keys.len() {
            self.pos = idx;
        }
    }

    /// Occupied slots with their positions.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Key)> + '_ {
        self.keys
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, k)| k.rev != 0)
    }
}
