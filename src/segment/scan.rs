//! Segment scanner
//!
//! A pull-based iterator over the record frames of one segment file. The
//! recovery scan and the compactor both consume it as straight-line code.
//!
//! A record cut short at end of file (header, key, or value) ends the
//! iteration cleanly: the last write did not complete, which is normal
//! torn-write recovery, not corruption.

use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::Result;
use crate::record::{self, Header, HEADER_SIZE};

/// One scanned frame
#[derive(Debug)]
pub enum ScanItem {
    /// A live record. `value` is populated only when the scanner was
    /// configured to read values; the recovery scan skips them.
    Live {
        segment_id: u64,
        offset: u64,
        header: Header,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    },

    /// A deletion marker (zero-length value)
    Tombstone { key: Vec<u8> },
}

/// Iterator over the frames of a single segment file
pub struct SegmentScanner {
    reader: BufReader<File>,
    segment_id: u64,
    offset: u64,
    read_values: bool,
    done: bool,
}

impl SegmentScanner {
    /// Open a scanner over the segment at `path`. Values are skipped; call
    /// [`with_values`](Self::with_values) when the caller needs them.
    pub fn open(path: &Path, segment_id: u64) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            segment_id,
            offset: 0,
            read_values: false,
            done: false,
        })
    }

    /// Read value bytes into each live item instead of skipping them
    pub fn with_values(mut self) -> Self {
        self.read_values = true;
        self
    }

    /// Read exactly `buf.len()` bytes. `Ok(false)` means the file ended
    /// mid-record (torn trailing write).
    fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Skip `len` value bytes. `Ok(false)` on a torn trailing write.
    fn skip_or_eof(&mut self, len: u64) -> Result<bool> {
        let copied = io::copy(&mut (&mut self.reader).take(len), &mut io::sink())?;
        Ok(copied == len)
    }

    fn next_item(&mut self) -> Result<Option<ScanItem>> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        if !self.read_exact_or_eof(&mut header_bytes)? {
            return Ok(None);
        }
        let header = record::decode_header(&header_bytes)?;

        let mut key = vec![0u8; header.key_size as usize];
        if !self.read_exact_or_eof(&mut key)? {
            return Ok(None);
        }

        let item = if header.is_tombstone() {
            ScanItem::Tombstone { key }
        } else {
            let value = if self.read_values {
                let mut value = vec![0u8; header.value_size as usize];
                if !self.read_exact_or_eof(&mut value)? {
                    return Ok(None);
                }
                Some(value)
            } else {
                if !self.skip_or_eof(header.value_size as u64)? {
                    return Ok(None);
                }
                None
            };

            ScanItem::Live {
                segment_id: self.segment_id,
                offset: self.offset,
                header,
                key,
                value,
            }
        };

        self.offset += header.record_size();
        Ok(Some(item))
    }
}

impl Iterator for SegmentScanner {
    type Item = Result<ScanItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_item() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
