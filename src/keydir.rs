//! Keydir, the in-memory index
//!
//! Maps every live key to the location of its latest record on disk. The
//! Keydir performs no locking of its own; the engine serializes mutators
//! against readers.

use std::collections::HashMap;

/// Location and metadata of the latest live record for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeydirEntry {
    /// Segment file holding the record
    pub segment_id: u64,

    /// Byte offset of the record start within the segment
    pub offset: u64,

    /// Key length in bytes (kept for read-time verification)
    pub key_size: u32,

    /// Value length in bytes
    pub value_size: u32,

    /// Record timestamp (seconds since the Unix epoch)
    pub timestamp: i64,

    /// Record CRC (kept for read-time verification)
    pub crc: u32,
}

/// In-memory index from key bytes to record location
#[derive(Debug, Default)]
pub struct Keydir {
    entries: HashMap<Vec<u8>, KeydirEntry>,
}

impl Keydir {
    /// Create an empty Keydir
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert or replace the entry for a key
    pub fn insert(&mut self, key: Vec<u8>, entry: KeydirEntry) {
        self.entries.insert(key, entry);
    }

    /// Look up the entry for a key
    pub fn lookup(&self, key: &[u8]) -> Option<&KeydirEntry> {
        self.entries.get(key)
    }

    /// Check whether a key is present
    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove the entry for a key; returns true if it existed
    pub fn remove(&mut self, key: &[u8]) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no keys
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all live keys
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.entries.keys().cloned().collect()
    }

    /// Replace the entire index with another one (compaction swap)
    pub fn replace_all(&mut self, other: Keydir) {
        self.entries = other.entries;
    }
}
