//! Engine
//!
//! The core storage engine. Coordinates the record codec, the segment set,
//! and the Keydir to implement the public operations.
//!
//! ## Write path
//! Under the exclusive lock: encode the record, append it to the active
//! segment, and index the resulting location in the Keydir. A delete
//! appends a tombstone and removes the Keydir entry.
//!
//! ## Read path
//! Under the shared lock: look the key up in the Keydir, then perform one
//! seek plus one bounded read against the segment holding the latest
//! record, verify the checksum, and return the record.
//!
//! ## Recovery
//! On open, every segment is replayed in ascending id order so later
//! writes overwrite earlier ones and tombstones drop their keys.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use fs2::FileExt;
use parking_lot::RwLock;

use crate::compact;
use crate::config::Config;
use crate::error::{EmberError, Result};
use crate::keydir::{Keydir, KeydirEntry};
use crate::record::{self, Record, HEADER_SIZE};
use crate::segment::{ScanItem, SegmentScanner, SegmentSet};

/// Advisory lock file, held for the lifetime of the engine
const LOCK_FILE: &str = "emberkv.lock";

/// The main storage engine
#[derive(Debug)]
pub struct Engine {
    inner: RwLock<EngineInner>,
    config: Config,
    version: String,
}

#[derive(Debug)]
pub(crate) struct EngineInner {
    pub(crate) segments: SegmentSet,
    pub(crate) keydir: Keydir,
    lock_file: Option<File>,
    closed: bool,
}

impl Engine {
    /// Open or create an engine over the configured data directory.
    ///
    /// On startup:
    /// 1. Acquire the advisory directory lock
    /// 2. Clean up any interrupted compaction
    /// 3. Open the segment set
    /// 4. Replay all segments to rebuild the Keydir
    pub fn open(config: Config, version: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let lock_file = acquire_dir_lock(&config.data_dir)?;
        compact::recover_if_needed(&config.data_dir)?;

        let segments = SegmentSet::open(&config.data_dir, config.max_segment_size)?;

        let mut keydir = Keydir::new();
        let all = segments.all_segments()?;
        let segment_count = all.len();
        for (id, path) in all {
            replay_segment(&mut keydir, &path, id)?;
        }

        tracing::info!(
            dir = %config.data_dir.display(),
            segments = segment_count,
            keys = keydir.len(),
            "engine opened"
        );

        Ok(Self {
            inner: RwLock::new(EngineInner {
                segments,
                keydir,
                lock_file: Some(lock_file),
                closed: false,
            }),
            config,
            version: version.into(),
        })
    }

    /// Open with a path and default configuration (convenience)
    pub fn open_path(path: &Path, version: impl Into<String>) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config, version)
    }

    /// Store a key-value pair.
    ///
    /// Keys must be non-empty; empty values are reserved for deletion
    /// markers and are rejected.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EmberError::InvalidArgument("key must not be empty".into()));
        }
        if value.is_empty() {
            return Err(EmberError::InvalidArgument(
                "empty values are reserved for deletion markers".into(),
            ));
        }

        let mut inner = self.inner.write();
        inner.check_open()?;

        let (frame, header) = record::encode(key, value);

        // Capture the id before appending: the append itself may roll the
        // active segment, and the record lives in the pre-roll segment.
        let segment_id = inner.segments.active_id();
        let offset = inner.segments.append_active(&frame)?;

        inner.keydir.insert(
            key.to_vec(),
            KeydirEntry {
                segment_id,
                offset,
                key_size: header.key_size,
                value_size: header.value_size,
                timestamp: header.timestamp,
                crc: header.crc,
            },
        );
        Ok(())
    }

    /// Fetch the latest record for a key.
    pub fn get(&self, key: &[u8]) -> Result<Record> {
        let inner = self.inner.read();
        inner.check_open()?;

        let entry = *inner.keydir.lookup(key).ok_or(EmberError::KeyNotFound)?;

        let len = HEADER_SIZE + entry.key_size as usize + entry.value_size as usize;
        let data = inner.segments.read_at(entry.segment_id, entry.offset, len)?;

        let rec = record::verify(&data)?;
        if rec.header.key_size != entry.key_size || rec.header.value_size != entry.value_size {
            return Err(EmberError::Corrupt(format!(
                "record at segment {} offset {} does not match index: \
                 sizes ({}, {}) on disk vs ({}, {}) indexed",
                entry.segment_id,
                entry.offset,
                rec.header.key_size,
                rec.header.value_size,
                entry.key_size,
                entry.value_size
            )));
        }
        Ok(rec)
    }

    /// Delete a key.
    ///
    /// Appends a tombstone so a later recovery scan knows to drop the key,
    /// then removes the Keydir entry.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        inner.check_open()?;

        if !inner.keydir.contains(key) {
            return Err(EmberError::KeyNotFound);
        }

        let (frame, _) = record::encode(key, b"");
        inner.segments.append_active(&frame)?;
        inner.keydir.remove(key);
        Ok(())
    }

    /// Whether a key is present. Index-only; no I/O.
    pub fn has(&self, key: &[u8]) -> bool {
        self.inner.read().keydir.contains(key)
    }

    /// Number of live keys. Index-only; no I/O.
    pub fn len(&self) -> usize {
        self.inner.read().keydir.len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version string supplied at open
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Configuration this engine was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Close the engine: flush and release the active segment and the
    /// directory lock. Later operations fail with [`EmberError::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }

        inner.segments.close()?;
        if let Some(lock_file) = inner.lock_file.take() {
            let _ = FileExt::unlock(&lock_file);
        }
        inner.closed = true;

        tracing::info!(dir = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    /// Shared access to the engine state (compactor liveness checks)
    pub(crate) fn inner(&self) -> &RwLock<EngineInner> {
        &self.inner
    }
}

impl EngineInner {
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(EmberError::Closed);
        }
        Ok(())
    }
}

/// Replay one segment into the Keydir: later records overwrite earlier
/// ones, tombstones remove their keys.
pub(crate) fn replay_segment(keydir: &mut Keydir, path: &Path, segment_id: u64) -> Result<()> {
    let scanner = SegmentScanner::open(path, segment_id)?;
    for item in scanner {
        match item? {
            ScanItem::Live {
                segment_id,
                offset,
                header,
                key,
                ..
            } => {
                keydir.insert(
                    key,
                    KeydirEntry {
                        segment_id,
                        offset,
                        key_size: header.key_size,
                        value_size: header.value_size,
                        timestamp: header.timestamp,
                        crc: header.crc,
                    },
                );
            }
            ScanItem::Tombstone { key } => {
                keydir.remove(&key);
            }
        }
    }
    Ok(())
}

/// Take the advisory lock that enforces single-process access.
fn acquire_dir_lock(dir: &Path) -> Result<File> {
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(dir.join(LOCK_FILE))?;

    lock_file
        .try_lock_exclusive()
        .map_err(|_| EmberError::Locked)?;
    Ok(lock_file)
}
