//! Compaction (merge)
//!
//! Rewrites all closed segments into a smaller set containing only live
//! records (no stale versions, no tombstones), then atomically swaps them
//! in. Runs online: the engine keeps accepting writes into a frontier
//! segment the compactor never touches.
//!
//! ## Protocol
//! 1. **Prepare**: snapshot the segment set (candidates `0..=max_id`),
//!    roll the engine to the frontier `max_id + 1`, persist the merge
//!    state, create `merge_0.dat`.
//! 2. **Merge**: scan candidates in id order; copy exactly the records the
//!    engine's Keydir still points at, re-encoded, into merge segments
//!    that roll at four times the normal threshold; index them in a fresh
//!    compact Keydir.
//! 3. **Swap**: under the writer lock, delete the candidates, rename the
//!    merge files to `0.dat..`, fold every segment past `max_id` into the
//!    compact Keydir, hand that Keydir to the engine, and drop the cached
//!    read descriptors. Then delete the state file.
//!
//! The merge output can never exceed the candidates' live data, so the
//! renamed ids stay at or below `max_id` and never collide with the
//! frontier.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::{replay_segment, Engine};
use crate::error::Result;
use crate::keydir::{Keydir, KeydirEntry};
use crate::record::{self, Header};
use crate::segment::{segment_file_name, ScanItem, SegmentScanner};

/// Compaction state document, persisted while a merge is in flight
const MERGE_STATE_FILE: &str = "merge.json";

/// Name prefix of transient merge segments
const MERGE_FILE_PREFIX: &str = "merge_";

/// Merge segments roll at this multiple of the normal segment threshold,
/// keeping the post-merge file count low
const MERGE_SEGMENT_FACTOR: u64 = 4;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum MergeStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Serialize, Deserialize)]
struct MergeState {
    status: MergeStatus,
    #[serde(rename = "maxFileId")]
    max_file_id: u64,
}

/// An online merge over one open engine
pub struct Compactor<'a> {
    engine: &'a Engine,
    dir: PathBuf,
    merge_threshold: u64,
    candidates: Vec<(u64, PathBuf)>,
    max_id: u64,
    compact_keydir: Keydir,
    merge: Option<MergeWriter>,
}

/// The currently-open merge segment
struct MergeWriter {
    file: BufWriter<File>,
    id: u64,
    size: u64,
}

impl<'a> Compactor<'a> {
    /// Build a compactor over an open engine
    pub fn new(engine: &'a Engine) -> Self {
        let config = engine.config();
        Self {
            engine,
            dir: config.data_dir.clone(),
            merge_threshold: config.max_segment_size * MERGE_SEGMENT_FACTOR,
            candidates: Vec::new(),
            max_id: 0,
            compact_keydir: Keydir::new(),
            merge: None,
        }
    }

    /// Run the full compaction protocol.
    pub fn execute(mut self) -> Result<()> {
        self.prepare()?;

        let candidates = std::mem::take(&mut self.candidates);
        for (id, path) in &candidates {
            self.merge_segment(*id, path)?;
        }

        self.swap()?;

        match fs::remove_file(self.dir.join(MERGE_STATE_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            candidates = candidates.len(),
            live_keys = self.engine.len(),
            "compaction complete"
        );
        Ok(())
    }

    /// Snapshot candidates, roll the engine to the frontier, persist the
    /// in-progress state, and open the first merge segment.
    fn prepare(&mut self) -> Result<()> {
        {
            let mut inner = self.engine.inner().write();
            inner.check_open()?;
            self.candidates = inner.segments.all_segments()?;
            self.max_id = inner.segments.active_id();
            inner.segments.roll_to(self.max_id + 1)?;
        }

        tracing::debug!(
            max_id = self.max_id,
            frontier = self.max_id + 1,
            "compaction prepared"
        );

        write_state(&self.dir, MergeStatus::InProgress, self.max_id)?;

        // Leftovers from an earlier failed attempt would otherwise survive
        // the rename step or pollute the new output.
        remove_merge_files(&self.dir)?;
        self.merge = Some(MergeWriter::create(&self.dir, 0)?);
        Ok(())
    }

    /// Copy every still-live record of one candidate segment into the
    /// merge output. Stale records and tombstones are dropped.
    fn merge_segment(&mut self, segment_id: u64, path: &Path) -> Result<()> {
        let scanner = SegmentScanner::open(path, segment_id)?.with_values();

        for item in scanner {
            let (offset, key, value) = match item? {
                ScanItem::Live {
                    offset, key, value, ..
                } => (offset, key, value),
                ScanItem::Tombstone { .. } => continue,
            };

            // Live means the engine's index still points at exactly this
            // record. Anything else has been superseded.
            let live = {
                let inner = self.engine.inner().read();
                inner
                    .keydir
                    .lookup(&key)
                    .map(|e| e.segment_id == segment_id && e.offset == offset)
                    .unwrap_or(false)
            };
            if !live {
                continue;
            }

            let value = value.unwrap_or_default();
            let (merge_id, merge_offset, header) = self.append_merge(&key, &value)?;
            self.compact_keydir.insert(
                key,
                KeydirEntry {
                    segment_id: merge_id,
                    offset: merge_offset,
                    key_size: header.key_size,
                    value_size: header.value_size,
                    timestamp: header.timestamp,
                    crc: header.crc,
                },
            );
        }
        Ok(())
    }

    /// Re-encode and append one record to the current merge segment,
    /// rolling it afterwards if it reached the merge threshold.
    fn append_merge(&mut self, key: &[u8], value: &[u8]) -> Result<(u64, u64, Header)> {
        let writer = self.merge.as_mut().expect("merge segment open after prepare");

        let (frame, header) = record::encode(key, value);
        let offset = writer.size;
        writer.file.write_all(&frame)?;
        writer.file.flush()?;
        writer.size += frame.len() as u64;

        let merge_id = writer.id;
        if writer.size >= self.merge_threshold {
            let next = writer.id + 1;
            self.merge = Some(MergeWriter::create(&self.dir, next)?);
        }

        Ok((merge_id, offset, header))
    }

    /// Atomically replace the candidate segments with the merge output and
    /// the engine's Keydir with the compact Keydir.
    fn swap(&mut self) -> Result<()> {
        // Merge descriptors must be closed before the files are renamed.
        let last_merge_id = match self.merge.take() {
            Some(mut writer) => {
                writer.file.flush()?;
                writer.id
            }
            None => return Ok(()),
        };

        let mut inner = self.engine.inner().write();

        // Cached read descriptors may reference candidate files; drop them
        // before the files go away.
        inner.segments.invalidate_readers();

        for id in 0..=self.max_id {
            inner.segments.remove(id)?;
        }
        for id in 0..=last_merge_id {
            inner
                .segments
                .rename(&merge_file_name(id), &segment_file_name(id))?;
        }

        // Writes that landed on the frontier during the merge are not in
        // the compact Keydir yet; fold them in before the pointer swap.
        for (id, path) in inner.segments.all_segments()? {
            if id > self.max_id {
                replay_segment(&mut self.compact_keydir, &path, id)?;
            }
        }

        let keydir = std::mem::take(&mut self.compact_keydir);
        inner.keydir.replace_all(keydir);
        Ok(())
    }
}

impl MergeWriter {
    fn create(dir: &Path, id: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(merge_file_name(id)))?;
        Ok(Self {
            file: BufWriter::new(file),
            id,
            size: 0,
        })
    }
}

/// Clean up after an interrupted compaction.
///
/// Run before the engine opens its segment set. An `in_progress` (or
/// unreadable) state file means the swap never happened: the original
/// segments are still intact, so the merge leftovers are discarded and the
/// normal recovery scan takes over. A `completed` state file means only the
/// state-file cleanup was lost.
pub fn recover_if_needed(dir: &Path) -> Result<()> {
    let state_path = dir.join(MERGE_STATE_FILE);
    let data = match fs::read(&state_path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<MergeState>(&data) {
        Ok(state) if state.status == MergeStatus::Completed => {
            fs::remove_file(&state_path)?;
            Ok(())
        }
        _ => {
            tracing::warn!(
                dir = %dir.display(),
                "discarding interrupted compaction"
            );
            cleanup_merge_files(dir, &state_path)
        }
    }
}

fn cleanup_merge_files(dir: &Path, state_path: &Path) -> Result<()> {
    remove_merge_files(dir)?;
    fs::remove_file(state_path)?;
    Ok(())
}

fn remove_merge_files(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(MERGE_FILE_PREFIX) && name.ends_with(".dat") {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn write_state(dir: &Path, status: MergeStatus, max_file_id: u64) -> Result<()> {
    let state = MergeState {
        status,
        max_file_id,
    };
    let data = serde_json::to_vec(&state)
        .map_err(|e| crate::error::EmberError::Config(format!("merge state: {e}")))?;
    fs::write(dir.join(MERGE_STATE_FILE), data)?;
    Ok(())
}

fn merge_file_name(id: u64) -> String {
    format!("{MERGE_FILE_PREFIX}{id}.dat")
}
