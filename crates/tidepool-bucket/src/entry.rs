//! Bucket entry types and the canonical binary encoding.
//!
//! A bucket holds a sorted sequence of key/value records. Each entry is
//! either a [`BucketEntry::Put`] carrying the current value for a key, or a
//! [`BucketEntry::Del`] tombstone marking the key as deleted.
//!
//! # Key Ordering
//!
//! Entries in a bucket are sorted bytewise by key. When two entries share a
//! key, `Put` sorts before `Del` so ordering is total and deterministic; the
//! applicator's seen-key tracking makes the first occurrence win.
//!
//! # Canonical Encoding
//!
//! The content hash of a bucket is computed over the concatenation of its
//! entries in this frame format:
//!
//! ```text
//! Put: 0x00 | u32be key_len | key | u32be value_len | value
//! Del: 0x01 | u32be key_len | key
//! ```

use std::cmp::Ordering;
use std::fmt;

use crate::{BucketError, Result};

/// Frame tag for a `Put` entry.
const TAG_PUT: u8 = 0x00;
/// Frame tag for a `Del` tombstone.
const TAG_DEL: u8 = 0x01;

/// A record key: an opaque byte string, ordered bytewise.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(pub Vec<u8>);

impl RecordKey {
    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for RecordKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for RecordKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "RecordKey({:?})", s),
            Err(_) => write!(f, "RecordKey(0x{})", hex::encode(&self.0)),
        }
    }
}

/// A key/value state record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    /// The record key.
    pub key: RecordKey,
    /// The record value.
    pub value: Vec<u8>,
}

impl StateRecord {
    /// Create a record from raw key and value bytes.
    pub fn new(key: impl Into<RecordKey>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An entry stored in a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketEntry {
    /// A live record (the current state of this key).
    Put(StateRecord),
    /// A tombstone marking that this key has been deleted.
    Del(RecordKey),
}

impl BucketEntry {
    /// Get the key of this entry.
    pub fn key(&self) -> &RecordKey {
        match self {
            BucketEntry::Put(record) => &record.key,
            BucketEntry::Del(key) => key,
        }
    }

    /// Check if this entry is a live record.
    pub fn is_put(&self) -> bool {
        matches!(self, BucketEntry::Put(_))
    }

    /// Check if this entry is a tombstone.
    pub fn is_del(&self) -> bool {
        matches!(self, BucketEntry::Del(_))
    }

    /// Append the canonical encoding of this entry to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            BucketEntry::Put(record) => {
                buf.push(TAG_PUT);
                encode_bytes(buf, record.key.as_bytes());
                encode_bytes(buf, &record.value);
            }
            BucketEntry::Del(key) => {
                buf.push(TAG_DEL);
                encode_bytes(buf, key.as_bytes());
            }
        }
    }

    /// Decode one entry from `bytes` starting at `offset`.
    ///
    /// Returns the entry and the offset one past its last byte.
    pub fn decode_from(bytes: &[u8], offset: usize) -> Result<(Self, usize)> {
        let tag = *bytes
            .get(offset)
            .ok_or_else(|| BucketError::Codec("truncated entry tag".to_string()))?;
        let (key, offset) = decode_bytes(bytes, offset + 1)?;
        match tag {
            TAG_PUT => {
                let (value, offset) = decode_bytes(bytes, offset)?;
                Ok((
                    BucketEntry::Put(StateRecord {
                        key: RecordKey(key),
                        value,
                    }),
                    offset,
                ))
            }
            TAG_DEL => Ok((BucketEntry::Del(RecordKey(key)), offset)),
            other => Err(BucketError::Codec(format!(
                "unknown entry tag 0x{:02x}",
                other
            ))),
        }
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn decode_bytes(bytes: &[u8], offset: usize) -> Result<(Vec<u8>, usize)> {
    let len_end = offset + 4;
    let len_bytes = bytes
        .get(offset..len_end)
        .ok_or_else(|| BucketError::Codec("truncated length prefix".to_string()))?;
    let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    let data_end = len_end + len;
    let data = bytes
        .get(len_end..data_end)
        .ok_or_else(|| BucketError::Codec("truncated entry body".to_string()))?;
    Ok((data.to_vec(), data_end))
}

/// Compare two keys bytewise.
pub fn compare_keys(a: &RecordKey, b: &RecordKey) -> Ordering {
    a.0.cmp(&b.0)
}

/// Compare two entries: by key, then `Put` before `Del`.
pub fn compare_entries(a: &BucketEntry, b: &BucketEntry) -> Ordering {
    compare_keys(a.key(), b.key()).then_with(|| match (a, b) {
        (BucketEntry::Put(_), BucketEntry::Del(_)) => Ordering::Less,
        (BucketEntry::Del(_), BucketEntry::Put(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_key_access() {
        let put = BucketEntry::Put(StateRecord::new(b"alpha".as_slice(), b"1".as_slice()));
        let del = BucketEntry::Del(RecordKey::from(b"beta".as_slice()));

        assert_eq!(put.key().as_bytes(), b"alpha");
        assert_eq!(del.key().as_bytes(), b"beta");
        assert!(put.is_put());
        assert!(del.is_del());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let entries = vec![
            BucketEntry::Put(StateRecord::new(b"alpha".as_slice(), b"value-1".as_slice())),
            BucketEntry::Del(RecordKey::from(b"beta".as_slice())),
            BucketEntry::Put(StateRecord::new(b"".as_slice(), b"".as_slice())),
        ];

        let mut buf = Vec::new();
        for entry in &entries {
            entry.encode_into(&mut buf);
        }

        let mut decoded = Vec::new();
        let mut offset = 0;
        while offset < buf.len() {
            let (entry, next) = BucketEntry::decode_from(&buf, offset).unwrap();
            decoded.push(entry);
            offset = next;
        }
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let mut buf = Vec::new();
        BucketEntry::Put(StateRecord::new(b"alpha".as_slice(), b"v".as_slice()))
            .encode_into(&mut buf);

        for end in 1..buf.len() {
            assert!(BucketEntry::decode_from(&buf[..end], 0).is_err());
        }
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let buf = vec![0x7f, 0, 0, 0, 0];
        assert!(BucketEntry::decode_from(&buf, 0).is_err());
    }

    #[test]
    fn test_entry_ordering() {
        let put_a = BucketEntry::Put(StateRecord::new(b"a".as_slice(), b"1".as_slice()));
        let del_a = BucketEntry::Del(RecordKey::from(b"a".as_slice()));
        let put_b = BucketEntry::Put(StateRecord::new(b"b".as_slice(), b"2".as_slice()));

        assert_eq!(compare_entries(&put_a, &put_b), Ordering::Less);
        assert_eq!(compare_entries(&put_a, &del_a), Ordering::Less);
        assert_eq!(compare_entries(&del_a, &put_a), Ordering::Greater);
        assert_eq!(compare_entries(&put_b, &put_b), Ordering::Equal);
    }
}
