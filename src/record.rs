//! Record codec
//!
//! Encodes and decodes the on-disk record frame. Every write, live value
//! and tombstone alike, is one frame appended to a segment file.
//!
//! ## Frame Format
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────────┬──────────┬──────────┐
//! │ CRC (4) │ KSz (4) │ VSz (4) │ Timestamp(8) │   Key    │  Value   │
//! └─────────┴─────────┴─────────┴──────────────┴──────────┴──────────┘
//! ```
//!
//! All integers are little-endian. The CRC is CRC-32/IEEE over every byte
//! after it (sizes, timestamp, key, value). CRC comes first so a reader can
//! short-circuit verification; the sizes come next so a scanner can compute
//! the frame length before consuming the payload. A record with a
//! zero-length value is a tombstone.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{EmberError, Result};

/// Fixed header size: CRC (4) + key size (4) + value size (4) + timestamp (8)
pub const HEADER_SIZE: usize = 20;

/// Decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// CRC-32/IEEE over everything after the CRC field
    pub crc: u32,

    /// Key length in bytes
    pub key_size: u32,

    /// Value length in bytes (zero marks a tombstone)
    pub value_size: u32,

    /// Seconds since the Unix epoch, captured at encode time
    pub timestamp: i64,
}

impl Header {
    /// Total framed size of the record this header describes
    pub fn record_size(&self) -> u64 {
        HEADER_SIZE as u64 + self.key_size as u64 + self.value_size as u64
    }

    /// Whether this header describes a tombstone
    pub fn is_tombstone(&self) -> bool {
        self.value_size == 0
    }
}

/// A fully decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: Header,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Encode a key-value pair into a record frame.
///
/// The timestamp is read once from the wall clock. Returns the frame bytes
/// together with the header describing them, so callers can index the
/// record without decoding it back.
pub fn encode(key: &[u8], value: &[u8]) -> (Vec<u8>, Header) {
    let timestamp = unix_timestamp();

    let mut frame = Vec::with_capacity(HEADER_SIZE + key.len() + value.len());
    frame.extend_from_slice(&[0u8; 4]); // CRC placeholder
    frame.extend_from_slice(&(key.len() as u32).to_le_bytes());
    frame.extend_from_slice(&(value.len() as u32).to_le_bytes());
    frame.extend_from_slice(&timestamp.to_le_bytes());
    frame.extend_from_slice(key);
    frame.extend_from_slice(value);

    let crc = checksum(&frame[4..]);
    frame[0..4].copy_from_slice(&crc.to_le_bytes());

    let header = Header {
        crc,
        key_size: key.len() as u32,
        value_size: value.len() as u32,
        timestamp,
    };
    (frame, header)
}

/// Decode the 20-byte header at the start of `data`.
pub fn decode_header(data: &[u8]) -> Result<Header> {
    if data.len() < HEADER_SIZE {
        return Err(EmberError::Corrupt(format!(
            "short header: expected {} bytes, got {}",
            HEADER_SIZE,
            data.len()
        )));
    }

    Ok(Header {
        crc: u32::from_le_bytes(data[0..4].try_into().unwrap()),
        key_size: u32::from_le_bytes(data[4..8].try_into().unwrap()),
        value_size: u32::from_le_bytes(data[8..12].try_into().unwrap()),
        timestamp: i64::from_le_bytes(data[12..20].try_into().unwrap()),
    })
}

/// Decode a full record frame.
///
/// Fails with a short-buffer error if `data` holds fewer bytes than the
/// header claims. Does not verify the CRC; use [`verify`] for that.
pub fn decode(data: &[u8]) -> Result<Record> {
    let header = decode_header(data)?;

    let key_end = HEADER_SIZE + header.key_size as usize;
    let value_end = key_end + header.value_size as usize;
    if data.len() < value_end {
        return Err(EmberError::Corrupt(format!(
            "short record: expected {} bytes, got {}",
            value_end,
            data.len()
        )));
    }

    Ok(Record {
        header,
        key: data[HEADER_SIZE..key_end].to_vec(),
        value: data[key_end..value_end].to_vec(),
    })
}

/// Decode a record frame and verify its checksum.
///
/// Recomputes CRC-32 over the body bytes and compares with the stored CRC.
pub fn verify(data: &[u8]) -> Result<Record> {
    let record = decode(data)?;

    let body_len = record.header.record_size() as usize;
    let computed = checksum(&data[4..body_len]);
    if computed != record.header.crc {
        return Err(EmberError::Corrupt(format!(
            "CRC mismatch: stored {:#010x}, computed {:#010x}",
            record.header.crc, computed
        )));
    }

    Ok(record)
}

/// CRC-32/IEEE over a byte slice
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_verify_round_trips() {
        let (frame, header) = encode(b"ab", b"xyz");

        assert_eq!(frame.len(), HEADER_SIZE + 5);
        assert_eq!(header.key_size, 2);
        assert_eq!(header.value_size, 3);

        let record = verify(&frame).unwrap();
        assert_eq!(record.key, b"ab");
        assert_eq!(record.value, b"xyz");
        assert_eq!(record.header, header);
    }

    #[test]
    fn header_layout_is_little_endian() {
        // key "ab", value "xyz": sizes 2 and 3, then the timestamp
        let (frame, header) = encode(b"ab", b"xyz");

        assert_eq!(&frame[4..8], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&frame[8..12], &[0x03, 0x00, 0x00, 0x00]);
        assert_eq!(&frame[12..20], &header.timestamp.to_le_bytes());
        assert_eq!(&frame[20..22], b"ab");
        assert_eq!(&frame[22..25], b"xyz");
    }

    #[test]
    fn tombstone_has_zero_value_size() {
        let (frame, header) = encode(b"key", b"");
        assert!(header.is_tombstone());
        assert_eq!(frame.len(), HEADER_SIZE + 3);

        let record = verify(&frame).unwrap();
        assert!(record.value.is_empty());
    }

    #[test]
    fn decode_header_rejects_short_input() {
        let err = decode_header(&[0u8; 19]).unwrap_err();
        assert!(matches!(err, EmberError::Corrupt(_)));
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let (frame, _) = encode(b"key", b"value");
        let err = decode(&frame[..frame.len() - 1]).unwrap_err();
        assert!(matches!(err, EmberError::Corrupt(_)));
    }

    #[test]
    fn verify_rejects_flipped_bit() {
        let (mut frame, _) = encode(b"key", b"value");
        let last = frame.len() - 1;
        frame[last] ^= 0x01;

        let err = verify(&frame).unwrap_err();
        assert!(matches!(err, EmberError::Corrupt(_)));
    }
}
