//! Log entry encoding and decoding
//!
//! Defines the structure of individual log entries and their wire format.

use bytes::{BufMut, Bytes, BytesMut};
use crc32fast::Hasher;

use crate::error::{LotusError, Result};

/// Size of the leading checksum field
pub const CRC_SIZE: usize = 4;

/// Maximum encoded header size
/// crc32 (4) + type (1) + key size (5) + value size (5) + expired at (10) = 25
pub const MAX_HEADER_SIZE: usize = 25;

/// Longest varint encoding of a 64-bit value
const MAX_VARINT_LEN64: usize = 10;

/// Kind of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EntryType {
    /// A live value
    #[default]
    Normal = 0,

    /// A tombstone
    Delete = 1,

    /// List metadata record
    ListMeta = 2,
}

impl EntryType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(EntryType::Normal),
            1 => Some(EntryType::Delete),
            2 => Some(EntryType::ListMeta),
            _ => None,
        }
    }
}

/// A single entry appended to a log file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,

    /// Unix timestamp in seconds, 0 means the entry never expires
    pub expired_at: i64,

    pub entry_type: EntryType,
}

impl LogEntry {
    /// A normal entry without expiry
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expired_at: 0,
            entry_type: EntryType::Normal,
        }
    }

    /// A normal entry expiring at `expired_at` (unix seconds)
    pub fn with_expiry(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, expired_at: i64) -> Self {
        Self {
            expired_at,
            ..Self::new(key, value)
        }
    }

    /// A delete marker for `key`
    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            expired_at: 0,
            entry_type: EntryType::Delete,
        }
    }

    /// Encode into a framed buffer; see [`encode_entry`]
    pub fn encode(&self) -> (Bytes, usize) {
        encode_entry(Some(self))
    }

    /// True if the entry carries an expiry at or before `now`
    pub fn is_expired(&self, now: i64) -> bool {
        self.expired_at != 0 && self.expired_at <= now
    }
}

/// Decoded entry header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub crc32: u32,
    pub entry_type: EntryType,
    pub key_size: u32,
    pub value_size: u32,
    pub expired_at: i64,
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode an entry, returning the buffer and its length.
///
/// `None` encodes to an empty buffer of size 0.
pub fn encode_entry(entry: Option<&LogEntry>) -> (Bytes, usize) {
    let Some(entry) = entry else {
        return (Bytes::new(), 0);
    };

    let mut header = [0u8; MAX_HEADER_SIZE];
    header[CRC_SIZE] = entry.entry_type as u8;
    let mut index = CRC_SIZE + 1;
    index += put_varint(&mut header[index..], entry.key.len() as i64);
    index += put_varint(&mut header[index..], entry.value.len() as i64);
    index += put_varint(&mut header[index..], entry.expired_at);

    let size = index + entry.key.len() + entry.value.len();
    let mut buf = BytesMut::with_capacity(size);
    buf.put_slice(&header[..index]);
    buf.put_slice(&entry.key);
    buf.put_slice(&entry.value);

    let crc = crc32fast::hash(&buf[CRC_SIZE..]);
    buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

    (buf.freeze(), size)
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode an entry header, returning it with the number of header bytes.
///
/// Returns `None` when the buffer is too short (`len <= 4`) or the header
/// is malformed. Deciding whether that means corruption is left to the
/// caller.
pub fn decode_header(buf: &[u8]) -> Option<(EntryHeader, usize)> {
    if buf.len() <= CRC_SIZE {
        return None;
    }

    let crc32 = u32::from_le_bytes(buf[..CRC_SIZE].try_into().ok()?);
    let entry_type = EntryType::from_u8(buf[CRC_SIZE])?;

    let mut index = CRC_SIZE + 1;
    let (key_size, n) = read_varint(&buf[index..])?;
    index += n;
    let (value_size, n) = read_varint(&buf[index..])?;
    index += n;
    let (expired_at, n) = read_varint(&buf[index..])?;
    index += n;

    let header = EntryHeader {
        crc32,
        entry_type,
        key_size: u32::try_from(key_size).ok()?,
        value_size: u32::try_from(value_size).ok()?,
        expired_at,
    };
    Some((header, index))
}

/// Decode a whole entry from the start of `buf`.
///
/// - `Ok(Some((entry, size)))`: a valid entry of `size` bytes
/// - `Ok(None)`: not enough bytes for a complete entry
/// - `Err(InvalidCrc)`: the checksum does not match
pub fn decode_entry(buf: &[u8]) -> Result<Option<(LogEntry, usize)>> {
    let Some((header, header_size)) = decode_header(buf) else {
        return Ok(None);
    };

    let key_end = header_size + header.key_size as usize;
    let size = key_end + header.value_size as usize;
    if buf.len() < size {
        return Ok(None);
    }

    let key = &buf[header_size..key_end];
    let value = &buf[key_end..size];
    let actual = entry_crc(&buf[CRC_SIZE..header_size], key, value);
    if actual != header.crc32 {
        return Err(LotusError::InvalidCrc {
            expected: header.crc32,
            actual,
        });
    }

    let entry = LogEntry {
        key: key.to_vec(),
        value: value.to_vec(),
        expired_at: header.expired_at,
        entry_type: header.entry_type,
    };
    Ok(Some((entry, size)))
}

/// CRC over the header bytes after the checksum, then key, then value
pub(crate) fn entry_crc(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(header_tail);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

// =============================================================================
// Varints (zig-zag signed LEB128)
// =============================================================================

/// Write `value` as a signed varint into `buf`, returning the bytes used.
///
/// Panics if `buf` is shorter than the encoding (at most 10 bytes).
pub fn put_varint(buf: &mut [u8], value: i64) -> usize {
    let mut ux = ((value << 1) ^ (value >> 63)) as u64;
    let mut i = 0;
    while ux >= 0x80 {
        buf[i] = (ux as u8) | 0x80;
        ux >>= 7;
        i += 1;
    }
    buf[i] = ux as u8;
    i + 1
}

/// Read a signed varint from the start of `buf`.
///
/// Returns `None` if the buffer ends mid-varint or the value overflows 64 bits.
pub fn read_varint(buf: &[u8]) -> Option<(i64, usize)> {
    let (ux, n) = read_uvarint(buf)?;
    let x = (ux >> 1) as i64;
    let x = if ux & 1 != 0 { !x } else { x };
    Some((x, n))
}

fn read_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut x: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN64 {
            return None;
        }
        if b < 0x80 {
            if i == MAX_VARINT_LEN64 - 1 && b > 1 {
                return None;
            }
            return Some((x | (u64::from(b) << shift), i + 1));
        }
        x |= u64::from(b & 0x7f) << shift;
        shift += 7;
    }
    None
}
