//! Leveled bucket structures for tidepool.
//!
//! This crate implements the node's leveled state representation and the
//! machinery around it:
//!
//! - [`Bucket`]: an immutable, content-addressed container of sorted
//!   key/value records. The empty bucket carries the all-zero hash, used
//!   throughout the system as the "nothing here" sentinel.
//! - [`BucketList`]: a fixed sequence of levels, each holding a `curr`
//!   (newer, smaller) and `snap` (older, larger) bucket. Level 0 is the
//!   newest.
//! - [`BucketStore`]: bucket files on disk, named by content hash,
//!   gzip-compressed, with an in-memory cache and hash verification.
//! - [`BucketApplicator`]: an incremental cursor that writes a bucket's
//!   records into the live database one bounded chunk at a time, so
//!   catch-up can be interleaved with other work.
//!
//! # Example
//!
//! ```ignore
//! use tidepool_bucket::{Bucket, BucketEntry, BucketStore, StateRecord};
//!
//! let store = BucketStore::new("/var/lib/tidepool/buckets".into())?;
//!
//! let bucket = Bucket::from_entries(vec![
//!     BucketEntry::Put(StateRecord::new(b"key".as_slice(), b"value".as_slice())),
//! ])?;
//! let bucket = store.put(bucket)?;
//!
//! // Later, load it back by hash
//! let loaded = store.get_by_hash(&bucket.hash())?;
//! ```

mod applicator;
mod bucket;
mod bucket_list;
mod entry;
mod error;
mod store;

// ============================================================================
// Core bucket types
// ============================================================================

pub use bucket::Bucket;
pub use bucket_list::{BucketLevel, BucketList, BUCKET_LIST_DEPTH};

// ============================================================================
// Entry types and comparison
// ============================================================================

pub use entry::{compare_entries, compare_keys, BucketEntry, RecordKey, StateRecord};

// ============================================================================
// Error handling
// ============================================================================

pub use error::BucketError;

// ============================================================================
// Bucket storage
// ============================================================================

pub use store::BucketStore;

// ============================================================================
// Bucket applicator (catch-up)
// ============================================================================

pub use applicator::{ApplyCounters, BucketApplicator, DEFAULT_CHUNK_SIZE};

/// Result type for bucket operations.
pub type Result<T> = std::result::Result<T, BucketError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_integration_store_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = BucketStore::new(dir.path().to_path_buf()).unwrap();

        let bucket = Bucket::from_entries(vec![
            BucketEntry::Put(StateRecord::new(b"a".as_slice(), b"1".as_slice())),
            BucketEntry::Put(StateRecord::new(b"b".as_slice(), b"2".as_slice())),
        ])
        .unwrap();
        let bucket = store.put(bucket).unwrap();

        let mut list = BucketList::with_depth(3);
        list.level_mut(2).set_snap(Arc::clone(&bucket));

        let found = list.get(&RecordKey::from(b"a".as_slice())).unwrap();
        assert_eq!(found.value, b"1");

        // The store can hand the same bucket back by hash
        store.clear_cache();
        let loaded = store.get_by_hash(&bucket.hash()).unwrap();
        assert_eq!(loaded.hash(), list.level(2).snap_hash());
    }

    #[test]
    fn test_integration_applicator_against_db() {
        let db = tidepool_db::Database::open_in_memory().unwrap();
        let entries: Vec<BucketEntry> = (0..50u8)
            .map(|i| BucketEntry::Put(StateRecord::new(vec![i], vec![i, i])))
            .collect();
        let bucket = Arc::new(Bucket::from_entries(entries).unwrap());

        let mut applicator = BucketApplicator::with_chunk_size(db.clone(), bucket, 7);
        let mut counters = ApplyCounters::new();
        applicator.apply_all(&mut counters).unwrap();

        let count = db
            .with_connection(|conn| tidepool_db::queries::StateQueries::count_state_entries(conn))
            .unwrap();
        assert_eq!(count, 50);
        assert_eq!(counters.records_upserted, 50);
    }
}
