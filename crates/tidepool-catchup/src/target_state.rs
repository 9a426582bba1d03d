//! Target state descriptor parsing and handling.
//!
//! The target state descriptor is the JSON document a trusted history
//! source publishes to describe the bucket list a node should converge to:
//! a state sequence plus, for every level, the expected `curr` and `snap`
//! bucket hashes (hex-encoded, with the all-zero hash meaning "the empty
//! bucket").

use serde::{Deserialize, Serialize};
use tidepool_common::Hash256;

use crate::error::CatchupError;

/// The target state descriptor for a catch-up operation.
///
/// Immutable for the lifetime of the operation; it is both the comparison
/// baseline for per-level replay decisions and the state that is adopted
/// wholesale once every level has been replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStateDescriptor {
    /// Format version (currently 1).
    pub version: u32,

    /// Identifier of the publishing server, if any.
    #[serde(default)]
    pub server: Option<String>,

    /// The state sequence this descriptor represents.
    pub sequence: u64,

    /// Expected bucket hashes per level, index 0 = newest level.
    pub levels: Vec<TargetLevel>,
}

/// Expected bucket hashes for a single level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetLevel {
    /// Current bucket hash (hex-encoded).
    pub curr: String,

    /// Snapshot bucket hash (hex-encoded).
    pub snap: String,
}

impl TargetLevel {
    /// A level expecting two empty buckets.
    pub fn cleared() -> Self {
        Self {
            curr: Hash256::ZERO.to_hex(),
            snap: Hash256::ZERO.to_hex(),
        }
    }
}

impl TargetStateDescriptor {
    /// Parse a descriptor from JSON.
    pub fn from_json(json: &str) -> Result<Self, CatchupError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the descriptor to JSON.
    pub fn to_json(&self) -> Result<String, CatchupError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Number of levels described.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Get a level by index.
    pub fn level(&self, level: usize) -> Option<&TargetLevel> {
        self.levels.get(level)
    }

    /// Decode the (curr, snap) hashes for a level.
    pub fn level_hashes(&self, level: usize) -> Result<(Hash256, Hash256), CatchupError> {
        let target = self
            .levels
            .get(level)
            .ok_or(CatchupError::LevelCountMismatch {
                expected: level + 1,
                actual: self.levels.len(),
            })?;
        let curr = Hash256::from_hex(&target.curr)
            .map_err(|_| CatchupError::InvalidHash(target.curr.clone()))?;
        let snap = Hash256::from_hex(&target.snap)
            .map_err(|_| CatchupError::InvalidHash(target.snap.clone()))?;
        Ok((curr, snap))
    }

    /// Decode every level's (curr, snap) hash pair, shallowest first.
    pub fn hash_pairs(&self) -> Result<Vec<(Hash256, Hash256)>, CatchupError> {
        (0..self.levels.len())
            .map(|level| self.level_hashes(level))
            .collect()
    }

    /// All distinct non-zero bucket hashes referenced by this descriptor.
    ///
    /// These are the buckets a node must be able to materialize (from its
    /// store or a provided batch) before catch-up can complete.
    pub fn unique_bucket_hashes(&self) -> Result<Vec<Hash256>, CatchupError> {
        let mut hashes = Vec::new();
        for (curr, snap) in self.hash_pairs()? {
            for hash in [curr, snap] {
                if !hash.is_zero() {
                    hashes.push(hash);
                }
            }
        }
        hashes.sort();
        hashes.dedup();
        Ok(hashes)
    }
}
