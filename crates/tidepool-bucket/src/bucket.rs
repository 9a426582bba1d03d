//! Individual bucket implementation.
//!
//! A bucket is an immutable container of sorted key/value records,
//! identified by the SHA-256 hash of its canonical encoding. The empty
//! bucket is special: it carries the all-zero hash, which the rest of the
//! system treats as the "nothing to apply" sentinel.

use std::sync::Arc;

use tidepool_common::Hash256;

use crate::entry::{compare_entries, compare_keys, BucketEntry, RecordKey};
use crate::Result;

/// An immutable bucket of sorted records.
///
/// Buckets are:
/// - Immutable once created
/// - Identified by their content hash
/// - Sorted by key for efficient lookup and replay
/// - Cheap to clone (entries are `Arc`-shared)
#[derive(Clone)]
pub struct Bucket {
    /// The hash of this bucket's canonical encoding.
    hash: Hash256,
    /// The entries in this bucket, sorted by key.
    entries: Arc<Vec<BucketEntry>>,
}

impl Bucket {
    /// Create an empty bucket.
    ///
    /// The empty bucket's hash is [`Hash256::ZERO`], the sentinel used by
    /// state descriptors to denote "no bucket here".
    pub fn empty() -> Self {
        Self {
            hash: Hash256::ZERO,
            entries: Arc::new(Vec::new()),
        }
    }

    /// Create a bucket from a list of entries.
    ///
    /// The entries will be sorted by key. An empty entry list yields the
    /// empty bucket (zero hash), not the hash of an empty byte string.
    pub fn from_entries(mut entries: Vec<BucketEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Ok(Self::empty());
        }

        entries.sort_by(compare_entries);

        let encoded = encode_entries(&entries);
        let hash = Hash256::hash(&encoded);

        Ok(Self {
            hash,
            entries: Arc::new(entries),
        })
    }

    /// Create a bucket from its canonical encoding.
    ///
    /// The hash is computed over the raw bytes; entries are assumed to be
    /// stored in sorted order (the encoder writes them that way).
    pub fn from_encoded_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::empty());
        }

        let mut entries = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let (entry, next) = BucketEntry::decode_from(bytes, offset)?;
            entries.push(entry);
            offset = next;
        }

        Ok(Self {
            hash: Hash256::hash(bytes),
            entries: Arc::new(entries),
        })
    }

    /// Serialize the bucket to its canonical encoding.
    pub fn to_encoded_bytes(&self) -> Vec<u8> {
        encode_entries(&self.entries)
    }

    /// Get the content hash of this bucket.
    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the bucket has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the entries as a slice.
    pub fn entries(&self) -> &[BucketEntry] {
        &self.entries
    }

    /// Iterate over the entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = &BucketEntry> {
        self.entries.iter()
    }

    /// Look up the entry for a key via binary search.
    ///
    /// Returns the tombstone itself if the key was deleted in this bucket,
    /// so callers can distinguish "deleted here" from "not present".
    pub fn find(&self, key: &RecordKey) -> Option<&BucketEntry> {
        let idx = self
            .entries
            .binary_search_by(|entry| compare_keys(entry.key(), key))
            .ok()?;
        Some(&self.entries[idx])
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("hash", &self.hash)
            .field("entries", &self.entries.len())
            .finish()
    }
}

fn encode_entries(entries: &[BucketEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    for entry in entries {
        entry.encode_into(&mut buf);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::StateRecord;

    fn put(key: &[u8], value: &[u8]) -> BucketEntry {
        BucketEntry::Put(StateRecord::new(key, value))
    }

    fn del(key: &[u8]) -> BucketEntry {
        BucketEntry::Del(RecordKey::from(key))
    }

    #[test]
    fn test_empty_bucket_has_zero_hash() {
        let bucket = Bucket::empty();
        assert!(bucket.hash().is_zero());
        assert!(bucket.is_empty());

        // from_entries with no entries is the same bucket
        let bucket = Bucket::from_entries(Vec::new()).unwrap();
        assert!(bucket.hash().is_zero());
    }

    #[test]
    fn test_from_entries_sorts() {
        let bucket =
            Bucket::from_entries(vec![put(b"c", b"3"), put(b"a", b"1"), put(b"b", b"2")]).unwrap();

        let keys: Vec<&[u8]> = bucket.iter().map(|e| e.key().as_bytes()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b", b"c"]);
    }

    #[test]
    fn test_hash_is_content_addressed() {
        let a = Bucket::from_entries(vec![put(b"a", b"1"), put(b"b", b"2")]).unwrap();
        // Same entries, different insertion order
        let b = Bucket::from_entries(vec![put(b"b", b"2"), put(b"a", b"1")]).unwrap();
        assert_eq!(a.hash(), b.hash());

        let c = Bucket::from_entries(vec![put(b"a", b"other")]).unwrap();
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_encoded_roundtrip_preserves_hash() {
        let bucket =
            Bucket::from_entries(vec![put(b"a", b"1"), del(b"b"), put(b"c", b"3")]).unwrap();

        let bytes = bucket.to_encoded_bytes();
        let loaded = Bucket::from_encoded_bytes(&bytes).unwrap();

        assert_eq!(loaded.hash(), bucket.hash());
        assert_eq!(loaded.entries(), bucket.entries());
    }

    #[test]
    fn test_find() {
        let bucket =
            Bucket::from_entries(vec![put(b"a", b"1"), del(b"b"), put(b"c", b"3")]).unwrap();

        assert!(bucket.find(&RecordKey::from(b"a".as_slice())).unwrap().is_put());
        assert!(bucket.find(&RecordKey::from(b"b".as_slice())).unwrap().is_del());
        assert!(bucket.find(&RecordKey::from(b"zzz".as_slice())).is_none());
    }
}
