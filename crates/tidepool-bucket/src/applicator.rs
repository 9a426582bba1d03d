//! BucketApplicator - apply bucket records to the database during catch-up.
//!
//! During catch-up, records from bucket files need to be written into the
//! live state database. The `BucketApplicator` handles this incrementally,
//! one bounded chunk per [`advance`](BucketApplicator::advance) call, so a
//! cooperative scheduler can interleave other work between chunks.
//!
//! # Deduplication
//!
//! The applicator tracks which keys it has already written so a key that
//! appears more than once in the bucket is only applied once; the first
//! occurrence wins.
//!
//! # Chunked Processing
//!
//! Each `advance` call applies up to `chunk_size` records inside a single
//! database transaction, keeping every step bounded and atomic.

use std::collections::HashSet;
use std::sync::Arc;

use tidepool_db::{queries::StateQueries, Database};

use crate::bucket::Bucket;
use crate::entry::{BucketEntry, RecordKey};
use crate::Result;

/// Default number of records to apply in each chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

// ============================================================================
// Apply Counters
// ============================================================================

/// Counters for tracking bucket application progress.
#[derive(Debug, Clone, Default)]
pub struct ApplyCounters {
    /// Records upserted into the database.
    pub records_upserted: u64,
    /// Tombstones applied as deletes.
    pub records_deleted: u64,
    /// Total entries processed (including skipped).
    pub entries_processed: u64,
    /// Entries skipped because their key was already seen.
    pub entries_skipped: u64,
    /// Chunks applied.
    pub chunks_applied: u64,
}

impl ApplyCounters {
    /// Creates new empty counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns total records written (upserts + deletes).
    pub fn total_applied(&self) -> u64 {
        self.records_upserted + self.records_deleted
    }

    /// Merges counters from another instance.
    pub fn merge(&mut self, other: &ApplyCounters) {
        self.records_upserted += other.records_upserted;
        self.records_deleted += other.records_deleted;
        self.entries_processed += other.entries_processed;
        self.entries_skipped += other.entries_skipped;
        self.chunks_applied += other.chunks_applied;
    }

    /// Resets all counters to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Bucket Applicator
// ============================================================================

/// Applies a bucket's records to the database in bounded chunks.
pub struct BucketApplicator {
    /// The database being written into.
    db: Database,
    /// The bucket being applied.
    bucket: Arc<Bucket>,
    /// Keys that have been applied (for deduplication).
    seen_keys: HashSet<RecordKey>,
    /// Current offset in the bucket (entry index).
    current_offset: usize,
    /// Number of records to apply per chunk.
    chunk_size: usize,
}

impl BucketApplicator {
    /// Creates a new applicator with the default chunk size.
    pub fn new(db: Database, bucket: Arc<Bucket>) -> Self {
        Self::with_chunk_size(db, bucket, DEFAULT_CHUNK_SIZE)
    }

    /// Creates a new applicator with a custom chunk size.
    ///
    /// A `chunk_size` of zero is treated as one.
    pub fn with_chunk_size(db: Database, bucket: Arc<Bucket>, chunk_size: usize) -> Self {
        Self {
            db,
            bucket,
            seen_keys: HashSet::new(),
            current_offset: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Returns true if there are entries left to apply.
    pub fn has_pending(&self) -> bool {
        self.current_offset < self.bucket.len()
    }

    /// Returns the number of entries remaining.
    pub fn remaining(&self) -> usize {
        self.bucket.len().saturating_sub(self.current_offset)
    }

    /// Returns the current progress (0.0 to 1.0).
    pub fn progress(&self) -> f64 {
        if self.bucket.is_empty() {
            return 1.0;
        }
        self.current_offset as f64 / self.bucket.len() as f64
    }

    /// Returns the bucket being applied.
    pub fn bucket(&self) -> &Arc<Bucket> {
        &self.bucket
    }

    /// Applies the next chunk of records inside one database transaction.
    ///
    /// Returns the number of records written (excluding deduplicated
    /// skips). Calling `advance` with nothing pending is a no-op returning
    /// zero.
    pub fn advance(&mut self, counters: &mut ApplyCounters) -> Result<usize> {
        if !self.has_pending() {
            return Ok(0);
        }

        let end = std::cmp::min(self.current_offset + self.chunk_size, self.bucket.len());
        let entries = &self.bucket.entries()[self.current_offset..end];

        let mut fresh: HashSet<&RecordKey> = HashSet::new();
        let mut to_apply: Vec<&BucketEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            counters.entries_processed += 1;
            if self.seen_keys.contains(entry.key()) || !fresh.insert(entry.key()) {
                counters.entries_skipped += 1;
                continue;
            }
            to_apply.push(entry);
        }

        let mut upserted = 0u64;
        let mut deleted = 0u64;
        self.db.transaction(|tx| {
            for entry in &to_apply {
                match entry {
                    BucketEntry::Put(record) => {
                        tx.upsert_state_entry(record.key.as_bytes(), &record.value)?;
                        upserted += 1;
                    }
                    BucketEntry::Del(key) => {
                        tx.delete_state_entry(key.as_bytes())?;
                        deleted += 1;
                    }
                }
            }
            Ok(())
        })?;

        // Keys only count as seen once their chunk has committed, so a
        // caller retrying a failed advance re-applies the same records.
        self.seen_keys.extend(fresh.into_iter().cloned());

        counters.records_upserted += upserted;
        counters.records_deleted += deleted;
        counters.chunks_applied += 1;
        self.current_offset = end;

        Ok(to_apply.len())
    }

    /// Applies all remaining records, chunk by chunk.
    pub fn apply_all(&mut self, counters: &mut ApplyCounters) -> Result<usize> {
        let mut total = 0;
        while self.has_pending() {
            total += self.advance(counters)?;
        }
        Ok(total)
    }

    /// Resets the applicator to start from the beginning.
    pub fn reset(&mut self) {
        self.seen_keys.clear();
        self.current_offset = 0;
    }

    /// Returns the number of unique keys applied so far.
    pub fn unique_keys_seen(&self) -> usize {
        self.seen_keys.len()
    }
}

impl std::fmt::Debug for BucketApplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketApplicator")
            .field("bucket", &self.bucket.hash())
            .field("current_offset", &self.current_offset)
            .field("total_entries", &self.bucket.len())
            .field("progress", &format!("{:.1}%", self.progress() * 100.0))
            .finish()
    }
}
