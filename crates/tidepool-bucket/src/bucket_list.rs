//! The leveled bucket list.
//!
//! The bucket list is the node's leveled state representation: a fixed
//! ordered sequence of levels, each holding two buckets:
//!
//! - `curr`: the newer, smaller bucket
//! - `snap`: the older, larger snapshot bucket
//!
//! Lower levels hold newer data. Level 0 is the shallowest/newest; the
//! deepest level holds the oldest, most stable records.
//!
//! # Hash Computation
//!
//! Each level hashes to `SHA256(curr_hash || snap_hash)`, and the list
//! hashes to the SHA-256 of all level hashes concatenated in order, giving
//! a cheap integrity fingerprint for the whole structure.
//!
//! # Entry Lookup
//!
//! Lookups search from level 0 downward, checking `curr` then `snap` at
//! each level. The first match wins (newer entries shadow older ones);
//! a tombstone match returns "absent".
//!
//! # State Adoption
//!
//! [`BucketList::adopt`] atomically replaces every level's slots from a
//! descriptor's hash pairs and records the adopted state sequence. It is
//! the single finalize call catch-up makes once every level has been
//! replayed.

use sha2::{Digest, Sha256};
use std::sync::Arc;

use tidepool_common::Hash256;

use crate::bucket::Bucket;
use crate::entry::{BucketEntry, RecordKey, StateRecord};
use crate::{BucketError, Result};

/// Number of levels in a default bucket list.
pub const BUCKET_LIST_DEPTH: usize = 9;

/// A single level in the bucket list, containing `curr` and `snap` buckets.
#[derive(Clone, Debug)]
pub struct BucketLevel {
    curr: Arc<Bucket>,
    snap: Arc<Bucket>,
    level: usize,
}

impl BucketLevel {
    /// Create a new empty level.
    pub fn new(level: usize) -> Self {
        Self {
            curr: Arc::new(Bucket::empty()),
            snap: Arc::new(Bucket::empty()),
            level,
        }
    }

    /// Get the current bucket.
    pub fn curr(&self) -> &Arc<Bucket> {
        &self.curr
    }

    /// Get the snapshot bucket.
    pub fn snap(&self) -> &Arc<Bucket> {
        &self.snap
    }

    /// Get the current bucket's hash.
    pub fn curr_hash(&self) -> Hash256 {
        self.curr.hash()
    }

    /// Get the snapshot bucket's hash.
    pub fn snap_hash(&self) -> Hash256 {
        self.snap.hash()
    }

    /// Replace the current bucket.
    pub fn set_curr(&mut self, bucket: Arc<Bucket>) {
        self.curr = bucket;
    }

    /// Replace the snapshot bucket.
    pub fn set_snap(&mut self, bucket: Arc<Bucket>) {
        self.snap = bucket;
    }

    /// Get the level number.
    pub fn level_number(&self) -> usize {
        self.level
    }

    /// Get the hash of this level: SHA256(curr_hash || snap_hash).
    pub fn hash(&self) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(self.curr.hash().as_bytes());
        hasher.update(self.snap.hash().as_bytes());
        let result = hasher.finalize();

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Hash256::from_bytes(bytes)
    }
}

/// The complete leveled bucket list.
#[derive(Clone, Debug)]
pub struct BucketList {
    /// The levels, index 0 = newest/shallowest.
    levels: Vec<BucketLevel>,
    /// The state sequence this list was last adopted at.
    sequence: u64,
}

impl BucketList {
    /// Create a bucket list with the default depth, all levels empty.
    pub fn new() -> Self {
        Self::with_depth(BUCKET_LIST_DEPTH)
    }

    /// Create a bucket list with an explicit depth.
    pub fn with_depth(depth: usize) -> Self {
        Self {
            levels: (0..depth).map(BucketLevel::new).collect(),
            sequence: 0,
        }
    }

    /// Number of levels.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// The state sequence this list was last adopted at.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Get a level by index.
    ///
    /// # Panics
    ///
    /// Panics if `level` is out of range.
    pub fn level(&self, level: usize) -> &BucketLevel {
        &self.levels[level]
    }

    /// Get a mutable level by index.
    ///
    /// # Panics
    ///
    /// Panics if `level` is out of range.
    pub fn level_mut(&mut self, level: usize) -> &mut BucketLevel {
        &mut self.levels[level]
    }

    /// The (curr, snap) hash pair of every level, shallowest first.
    pub fn level_hash_pairs(&self) -> Vec<(Hash256, Hash256)> {
        self.levels
            .iter()
            .map(|level| (level.curr_hash(), level.snap_hash()))
            .collect()
    }

    /// Get the hash of the whole list: SHA-256 over all level hashes.
    pub fn hash(&self) -> Hash256 {
        let mut hasher = Sha256::new();
        for level in &self.levels {
            hasher.update(level.hash().as_bytes());
        }
        let result = hasher.finalize();

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Hash256::from_bytes(bytes)
    }

    /// Look up a record by key, newest level first.
    ///
    /// Checks `curr` before `snap` at each level. A tombstone shadows any
    /// older record, yielding `None`.
    pub fn get(&self, key: &RecordKey) -> Option<StateRecord> {
        for level in &self.levels {
            for bucket in [&level.curr, &level.snap] {
                match bucket.find(key) {
                    Some(BucketEntry::Put(record)) => return Some(record.clone()),
                    Some(BucketEntry::Del(_)) => return None,
                    None => {}
                }
            }
        }
        None
    }

    /// Adopt a full state: install every level's (curr, snap) buckets from
    /// the given hash pairs and record the adopted sequence.
    ///
    /// `resolve` maps each hash to a bucket instance; by the time adoption
    /// runs, every referenced bucket must be locally materializable.
    pub fn adopt<F>(
        &mut self,
        pairs: &[(Hash256, Hash256)],
        sequence: u64,
        mut resolve: F,
    ) -> Result<()>
    where
        F: FnMut(&Hash256) -> Result<Arc<Bucket>>,
    {
        if pairs.len() != self.levels.len() {
            return Err(BucketError::Codec(format!(
                "adopting {} levels into a {}-level bucket list",
                pairs.len(),
                self.levels.len()
            )));
        }

        for (level, (curr_hash, snap_hash)) in self.levels.iter_mut().zip(pairs) {
            level.set_curr(resolve(curr_hash)?);
            level.set_snap(resolve(snap_hash)?);
        }
        self.sequence = sequence;
        Ok(())
    }
}

impl Default for BucketList {
    fn default() -> Self {
        Self::new()
    }
}
