//! Segment Set
//!
//! Owns the on-disk directory: a sorted sequence of segment files
//! `0.dat, 1.dat, …, N.dat`, of which exactly one (the highest id) is the
//! active (append-only) segment.
//!
//! ## Responsibilities
//! - Create, open, and enumerate segment files
//! - Append to the active segment and roll it at the size threshold
//! - Serve exact-length reads at `(segment, offset)` through a reader cache
//! - Rename/remove primitives for the compaction swap
//!
//! Rolling happens after the triggering append completes, so the triggering
//! record always lives in the older segment.

mod scan;

pub use scan::{ScanItem, SegmentScanner};

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{EmberError, Result};

/// Segment file extension
const SEGMENT_EXT: &str = ".dat";

/// The set of segment files in one data directory
#[derive(Debug)]
pub struct SegmentSet {
    /// Data directory
    dir: PathBuf,

    /// Active segment, open for append
    active: BufWriter<File>,

    /// Id of the active segment
    active_id: u64,

    /// Current size of the active segment in bytes
    active_size: u64,

    /// Threshold at or above which the active segment is rolled
    max_segment_size: u64,

    /// Cached read descriptors, one per segment id.
    /// Interior mutability so reads only need `&self`.
    readers: Mutex<HashMap<u64, BufReader<File>>>,
}

impl SegmentSet {
    /// Open the segment set in `dir`, creating the directory and `0.dat`
    /// if needed. The highest-id segment becomes the active segment.
    pub fn open(dir: &Path, max_segment_size: u64) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut ids: Vec<u64> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Anything that isn't `<digits>.dat` is ignored, never deleted
            if let Ok(id) = Self::parse_id(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }

        let active_id = ids.into_iter().max().unwrap_or(0);
        let path = segment_path(dir, active_id);
        let file = open_for_append(&path)?;
        let active_size = file.metadata()?.len();

        Ok(Self {
            dir: dir.to_path_buf(),
            active: BufWriter::new(file),
            active_id,
            active_size,
            max_segment_size,
            readers: Mutex::new(HashMap::new()),
        })
    }

    /// Id of the active segment
    pub fn active_id(&self) -> u64 {
        self.active_id
    }

    /// Current size of the active segment in bytes
    pub fn active_size(&self) -> u64 {
        self.active_size
    }

    /// Every segment file, sorted by ascending id
    pub fn all_segments(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut segments: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Ok(id) = Self::parse_id(&entry.file_name().to_string_lossy()) {
                segments.push((id, entry.path()));
            }
        }
        segments.sort_by_key(|(id, _)| *id);
        Ok(segments)
    }

    /// Append a record frame to the active segment.
    ///
    /// Returns the record's start offset (the pre-write end of file). After
    /// a successful append, rolls the active segment once it has reached
    /// the size threshold.
    pub fn append_active(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.active_size;

        self.active.write_all(bytes)?;
        self.active.flush()?;
        self.active_size += bytes.len() as u64;

        if self.active_size >= self.max_segment_size {
            self.roll_to(self.active_id + 1)?;
        }

        Ok(offset)
    }

    /// Close the current active segment and make `<id>.dat` active.
    pub fn roll_to(&mut self, id: u64) -> Result<()> {
        self.active.flush()?;

        let path = segment_path(&self.dir, id);
        let file = open_for_append(&path)?;
        let size = file.metadata()?.len();

        tracing::debug!(from = self.active_id, to = id, "rolling active segment");
        self.active = BufWriter::new(file);
        self.active_id = id;
        self.active_size = size;
        Ok(())
    }

    /// Read exactly `len` bytes at `offset` within the named segment.
    ///
    /// A read that runs past end of file means the index referenced bytes
    /// that are not there, which is corruption, not a torn write.
    pub fn read_at(&self, segment_id: u64, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut readers = self.readers.lock();

        let reader = match readers.entry(segment_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let file = File::open(segment_path(&self.dir, segment_id))?;
                entry.insert(BufReader::new(file))
            }
        };

        reader.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                EmberError::Corrupt(format!(
                    "segment {} truncated: {} bytes at offset {} not available",
                    segment_id, len, offset
                ))
            } else {
                EmberError::Io(e)
            }
        })?;
        Ok(buf)
    }

    /// Parse a segment id from a file name of the form `<digits>.dat`.
    pub fn parse_id(name: &str) -> Result<u64> {
        let stem = name
            .strip_suffix(SEGMENT_EXT)
            .ok_or_else(|| EmberError::InvalidArgument(format!("not a segment file: {name}")))?;
        stem.parse::<u64>()
            .map_err(|_| EmberError::InvalidArgument(format!("invalid segment id: {name}")))
    }

    /// Rename a file within the data directory (compaction swap primitive)
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.dir.join(from), self.dir.join(to))?;
        Ok(())
    }

    /// Remove the segment file with the given id; missing files are fine
    pub fn remove(&self, id: u64) -> Result<()> {
        match fs::remove_file(segment_path(&self.dir, id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop every cached read descriptor.
    ///
    /// Required after the compaction swap: segment ids point at different
    /// files once the merge files are renamed into place.
    pub fn invalidate_readers(&self) {
        self.readers.lock().clear();
    }

    /// Flush the active segment and release all descriptors
    pub fn close(&mut self) -> Result<()> {
        self.active.flush()?;
        self.readers.lock().clear();
        Ok(())
    }
}

/// File name for a segment id
pub fn segment_file_name(id: u64) -> String {
    format!("{id}{SEGMENT_EXT}")
}

fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(segment_file_name(id))
}

fn open_for_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_accepts_plain_numeric_names() {
        assert_eq!(SegmentSet::parse_id("0.dat").unwrap(), 0);
        assert_eq!(SegmentSet::parse_id("42.dat").unwrap(), 42);
    }

    #[test]
    fn parse_id_rejects_other_shapes() {
        for name in ["merge_0.dat", "x.dat", "1.hint", "1.dat.bak", ".dat", "1"] {
            assert!(
                SegmentSet::parse_id(name).is_err(),
                "expected {name:?} to be rejected"
            );
        }
    }

    #[test]
    fn segment_file_names_are_decimal() {
        assert_eq!(segment_file_name(0), "0.dat");
        assert_eq!(segment_file_name(1234), "1234.dat");
    }
}
