//! The bucket catch-up state machine.
//!
//! [`ApplyBucketsTask`] walks the bucket list from its deepest level up to
//! level 0, deciding per level whether each slot (`snap`, then `curr`)
//! must be replayed into the database, and driving the replay one bounded
//! chunk per [`step`](ApplyBucketsTask::step) so a cooperative scheduler
//! can interleave other work.
//!
//! # Replay decision and cascade
//!
//! On entering a level the stored slot hashes are compared against the
//! target descriptor. A mismatch flags the slot for replay and sets the
//! cascade flag; once set, the flag forces every remaining slot (on this
//! level and every shallower one) to be replayed regardless of hash
//! match, because a shallower level's contents cannot be trusted once a
//! deeper level was rewritten. The flag is shared between the snap and
//! curr decisions, so a snap-only mismatch also replays the same level's
//! curr.
//!
//! # Commit model
//!
//! Each level's slot replacements are final as soon as that level's replay
//! completes; there is no global rollback. When level 0 completes, the
//! whole target descriptor is adopted in a single call and the adopted
//! snapshot is persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use tidepool_bucket::{
    ApplyCounters, Bucket, BucketApplicator, BucketList, BucketStore, DEFAULT_CHUNK_SIZE,
};
use tidepool_common::Hash256;
use tidepool_db::{queries::BucketListQueries, Database};

use crate::error::CatchupError;
use crate::metrics::ApplyMetrics;
use crate::target_state::TargetStateDescriptor;
use crate::Result;

/// Outcome of a single [`ApplyBucketsTask::step`] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A bounded chunk was applied; more work remains on the current level.
    Continue,
    /// The current level committed; the walker moved one level up.
    LevelDone,
    /// Level 0 committed and the target state was adopted.
    AllDone,
}

/// Replay state of one slot (snap or curr) of the level being processed.
enum SlotState {
    /// The stored hash already matches the target; nothing to replay.
    NotNeeded,
    /// Replay in progress: the resolved bucket and its cursor.
    Pending {
        bucket: Arc<Bucket>,
        cursor: BucketApplicator,
    },
    /// The replayed bucket has been installed into the level.
    Committed,
}

impl SlotState {
    fn remaining(&self) -> usize {
        match self {
            SlotState::Pending { cursor, .. } => cursor.remaining(),
            _ => 0,
        }
    }
}

/// Point-in-time progress of a catch-up task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyProgress {
    /// The level currently being processed.
    pub level: usize,
    /// Whether the cascade flag is set.
    pub cascading: bool,
    /// Records left to apply in the snap slot (0 if not replaying).
    pub snap_remaining: usize,
    /// Records left to apply in the curr slot (0 if not replaying).
    pub curr_remaining: usize,
}

/// The leveled bucket catch-up state machine.
///
/// Constructed with a provided bucket batch (buckets an earlier pipeline
/// stage already materialized), the immutable target descriptor, and
/// handles to the shared bucket list, bucket store, and database. Driven
/// by repeated [`step`](Self::step) calls from any scheduler, or
/// synchronously via [`run_to_completion`](Self::run_to_completion).
pub struct ApplyBucketsTask {
    batch: HashMap<Hash256, Arc<Bucket>>,
    target: TargetStateDescriptor,
    list: Arc<Mutex<BucketList>>,
    store: Arc<BucketStore>,
    db: Database,
    metrics: Arc<ApplyMetrics>,
    chunk_size: usize,
    /// Shared sentinel returned for every zero-hash resolution.
    empty_bucket: Arc<Bucket>,
    /// Depth of the bucket list, captured at construction.
    depth: usize,

    // Per-run working state, rebuilt by reset().
    level: usize,
    applying: bool,
    entered: bool,
    snap: SlotState,
    curr: SlotState,
    counters: ApplyCounters,
}

impl ApplyBucketsTask {
    /// Create a task with the default chunk size.
    pub fn new(
        batch: HashMap<Hash256, Arc<Bucket>>,
        target: TargetStateDescriptor,
        list: Arc<Mutex<BucketList>>,
        store: Arc<BucketStore>,
        db: Database,
        metrics: Arc<ApplyMetrics>,
    ) -> Self {
        Self::with_chunk_size(batch, target, list, store, db, metrics, DEFAULT_CHUNK_SIZE)
    }

    /// Create a task applying at most `chunk_size` records per step.
    pub fn with_chunk_size(
        batch: HashMap<Hash256, Arc<Bucket>>,
        target: TargetStateDescriptor,
        list: Arc<Mutex<BucketList>>,
        store: Arc<BucketStore>,
        db: Database,
        metrics: Arc<ApplyMetrics>,
        chunk_size: usize,
    ) -> Self {
        let depth = list.lock().unwrap().depth();
        let mut task = Self {
            batch,
            target,
            list,
            store,
            db,
            metrics,
            chunk_size,
            empty_bucket: Arc::new(Bucket::empty()),
            depth,
            level: 0,
            applying: false,
            entered: false,
            snap: SlotState::NotNeeded,
            curr: SlotState::NotNeeded,
            counters: ApplyCounters::new(),
        };
        task.reset();
        task
    }

    /// The target descriptor this task is converging to.
    pub fn target(&self) -> &TargetStateDescriptor {
        &self.target
    }

    /// The replay metrics this task records into.
    pub fn metrics(&self) -> &Arc<ApplyMetrics> {
        &self.metrics
    }

    /// Aggregate record-application counters for the current run.
    pub fn counters(&self) -> &ApplyCounters {
        &self.counters
    }

    /// Current progress.
    pub fn progress(&self) -> ApplyProgress {
        ApplyProgress {
            level: self.level,
            cascading: self.applying,
            snap_remaining: self.snap.remaining(),
            curr_remaining: self.curr.remaining(),
        }
    }

    /// Discard all transient state and restart from the deepest level.
    ///
    /// Safe to call between any two steps. Level replacements already
    /// committed are not undone; a fresh run re-compares hashes and skips
    /// levels that now match the target.
    pub fn reset(&mut self) {
        self.level = self.depth.saturating_sub(1);
        self.applying = false;
        self.entered = false;
        self.snap = SlotState::NotNeeded;
        self.curr = SlotState::NotNeeded;
        self.counters.reset();
    }

    /// Perform one bounded unit of work.
    ///
    /// Exactly one of the following happens per call: the current level's
    /// replay decision runs and the first chunk (if any) is applied; one
    /// chunk of the snap or curr cursor is applied; or the level commits.
    /// The snap cursor is always drained before the curr cursor advances.
    pub fn step(&mut self) -> Result<StepResult> {
        if !self.entered {
            self.begin_level()?;
            self.entered = true;
        }

        if let SlotState::Pending { cursor, .. } = &mut self.snap {
            if cursor.has_pending() {
                cursor.advance(&mut self.counters)?;
                return Ok(StepResult::Continue);
            }
        }
        if let SlotState::Pending { cursor, .. } = &mut self.curr {
            if cursor.has_pending() {
                cursor.advance(&mut self.counters)?;
                return Ok(StepResult::Continue);
            }
        }

        self.commit_level()
    }

    /// Drive the task to completion synchronously.
    pub fn run_to_completion(&mut self) -> Result<()> {
        loop {
            if self.step()? == StepResult::AllDone {
                return Ok(());
            }
        }
    }

    /// Decide which of the current level's slots need replay.
    fn begin_level(&mut self) -> Result<()> {
        if self.target.depth() != self.depth {
            return Err(CatchupError::LevelCountMismatch {
                expected: self.depth,
                actual: self.target.depth(),
            });
        }

        let (want_curr, want_snap) = self.target.level_hashes(self.level)?;
        let (have_curr, have_snap) = {
            let list = self.list.lock().unwrap();
            let level = list.level(self.level);
            (level.curr_hash(), level.snap_hash())
        };

        if self.applying || want_snap != have_snap {
            let bucket = self.resolve_bucket(&want_snap);
            debug!(level = self.level, hash = %want_snap, "starting snap replay");
            self.snap = SlotState::Pending {
                cursor: BucketApplicator::with_chunk_size(
                    self.db.clone(),
                    Arc::clone(&bucket),
                    self.chunk_size,
                ),
                bucket,
            };
            self.applying = true;
            self.metrics.record_start();
        }
        if self.applying || want_curr != have_curr {
            let bucket = self.resolve_bucket(&want_curr);
            debug!(level = self.level, hash = %want_curr, "starting curr replay");
            self.curr = SlotState::Pending {
                cursor: BucketApplicator::with_chunk_size(
                    self.db.clone(),
                    Arc::clone(&bucket),
                    self.chunk_size,
                ),
                bucket,
            };
            self.applying = true;
            self.metrics.record_start();
        }

        Ok(())
    }

    /// Map a hash to a bucket: sentinel, provided batch, or store.
    ///
    /// Resolution must always succeed; a hash that is neither the zero
    /// sentinel, in the batch, nor in the store is a data-integrity
    /// violation, not a recoverable error.
    fn resolve_bucket(&self, hash: &Hash256) -> Arc<Bucket> {
        if hash.is_zero() {
            return Arc::clone(&self.empty_bucket);
        }
        if let Some(bucket) = self.batch.get(hash) {
            return Arc::clone(bucket);
        }
        match self.store.get_by_hash(hash) {
            Ok(bucket) => bucket,
            Err(err) => panic!(
                "bucket {} is not resolvable from the provided batch or the store: {}",
                hash, err
            ),
        }
    }

    /// Install replayed slots into the level, then advance or finalize.
    fn commit_level(&mut self) -> Result<StepResult> {
        {
            let mut list = self.list.lock().unwrap();
            let level = list.level_mut(self.level);
            if let Some(bucket) = commit_slot(&mut self.snap) {
                level.set_snap(bucket);
                self.metrics.record_success();
            }
            if let Some(bucket) = commit_slot(&mut self.curr) {
                level.set_curr(bucket);
                self.metrics.record_success();
            }
        }

        if self.level == 0 {
            return self.finalize();
        }

        self.level -= 1;
        self.entered = false;
        self.snap = SlotState::NotNeeded;
        self.curr = SlotState::NotNeeded;
        debug!(level = self.level, "level committed, starting next level");
        Ok(StepResult::LevelDone)
    }

    /// Adopt the full target state and persist the adopted snapshot.
    fn finalize(&mut self) -> Result<StepResult> {
        let pairs = self.target.hash_pairs()?;
        {
            let mut list = self.list.lock().unwrap();
            list.adopt(&pairs, self.target.sequence, |hash| {
                Ok(self.resolve_bucket(hash))
            })?;
        }
        self.db
            .with_connection(|conn| conn.store_bucket_list(self.target.sequence, &pairs))?;

        info!(
            sequence = self.target.sequence,
            records = self.counters.total_applied(),
            "bucket catch-up complete, target state adopted"
        );
        Ok(StepResult::AllDone)
    }
}

fn commit_slot(slot: &mut SlotState) -> Option<Arc<Bucket>> {
    match std::mem::replace(slot, SlotState::NotNeeded) {
        SlotState::Pending { bucket, .. } => {
            *slot = SlotState::Committed;
            Some(bucket)
        }
        other => {
            *slot = other;
            None
        }
    }
}

impl std::fmt::Debug for ApplyBucketsTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyBucketsTask")
            .field("level", &self.level)
            .field("applying", &self.applying)
            .field("sequence", &self.target.sequence)
            .field("snap_remaining", &self.snap.remaining())
            .field("curr_remaining", &self.curr.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target_state::TargetLevel;
    use tidepool_bucket::{BucketEntry, StateRecord};

    fn make_bucket(tag: u8, count: u8) -> Bucket {
        let entries = (0..count)
            .map(|i| BucketEntry::Put(StateRecord::new(vec![tag, i], vec![i])))
            .collect();
        Bucket::from_entries(entries).unwrap()
    }

    struct Fixture {
        list: Arc<Mutex<BucketList>>,
        store: Arc<BucketStore>,
        db: Database,
        metrics: Arc<ApplyMetrics>,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(depth: usize) -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                list: Arc::new(Mutex::new(BucketList::with_depth(depth))),
                store: Arc::new(BucketStore::new(dir.path().to_path_buf()).unwrap()),
                db: Database::open_in_memory().unwrap(),
                metrics: Arc::new(ApplyMetrics::new()),
                _dir: dir,
            }
        }

        fn target(&self, sequence: u64, levels: Vec<TargetLevel>) -> TargetStateDescriptor {
            TargetStateDescriptor {
                version: 1,
                server: None,
                sequence,
                levels,
            }
        }

        fn task(
            &self,
            batch: HashMap<Hash256, Arc<Bucket>>,
            target: TargetStateDescriptor,
        ) -> ApplyBucketsTask {
            ApplyBucketsTask::with_chunk_size(
                batch,
                target,
                Arc::clone(&self.list),
                Arc::clone(&self.store),
                self.db.clone(),
                Arc::clone(&self.metrics),
                4,
            )
        }
    }

    #[test]
    fn test_noop_when_everything_matches() {
        let fx = Fixture::new(3);
        let target = fx.target(5, vec![TargetLevel::cleared(); 3]);
        let mut task = fx.task(HashMap::new(), target);

        // One commit step per level, no cursor work
        assert_eq!(task.step().unwrap(), StepResult::LevelDone);
        assert_eq!(task.step().unwrap(), StepResult::LevelDone);
        assert_eq!(task.step().unwrap(), StepResult::AllDone);

        let snapshot = fx.metrics.snapshot();
        assert_eq!(snapshot.replay_start, 0);
        assert_eq!(snapshot.replay_success, 0);

        // Adoption still happened
        assert_eq!(fx.list.lock().unwrap().sequence(), 5);
    }

    #[test]
    fn test_single_level_replay_from_batch() {
        let fx = Fixture::new(1);
        let bucket = Arc::new(make_bucket(1, 10));
        let target = fx.target(
            9,
            vec![TargetLevel {
                curr: bucket.hash().to_hex(),
                snap: Hash256::ZERO.to_hex(),
            }],
        );

        let mut batch = HashMap::new();
        batch.insert(bucket.hash(), Arc::clone(&bucket));
        let mut task = fx.task(batch, target);

        task.run_to_completion().unwrap();

        // Only curr mismatched; the snap decision ran first and matched,
        // so a curr-only mismatch replays a single slot.
        let snapshot = fx.metrics.snapshot();
        assert_eq!(snapshot.replay_start, 1);
        assert_eq!(snapshot.replay_success, 1);

        let list = fx.list.lock().unwrap();
        assert_eq!(list.level(0).curr_hash(), bucket.hash());
        assert!(Arc::ptr_eq(list.level(0).curr(), &bucket));
        assert_eq!(list.sequence(), 9);
    }

    #[test]
    fn test_snap_mismatch_forces_curr_replay_same_level() {
        let fx = Fixture::new(1);
        let snap_bucket = Arc::new(make_bucket(1, 4));
        // curr target matches the stored (empty) curr exactly
        let target = fx.target(
            2,
            vec![TargetLevel {
                curr: Hash256::ZERO.to_hex(),
                snap: snap_bucket.hash().to_hex(),
            }],
        );

        let mut batch = HashMap::new();
        batch.insert(snap_bucket.hash(), Arc::clone(&snap_bucket));
        let mut task = fx.task(batch, target);
        task.run_to_completion().unwrap();

        // Both slots were replayed: the snap mismatch set the shared flag
        // before the curr decision ran.
        let snapshot = fx.metrics.snapshot();
        assert_eq!(snapshot.replay_start, 2);
        assert_eq!(snapshot.replay_success, 2);
    }

    #[test]
    fn test_zero_hash_resolves_to_shared_empty_bucket() {
        let fx = Fixture::new(1);
        let target = fx.target(1, vec![TargetLevel::cleared()]);
        let task = fx.task(HashMap::new(), target);

        let a = task.resolve_bucket(&Hash256::ZERO);
        let b = task.resolve_bucket(&Hash256::ZERO);
        assert!(a.is_empty());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_batch_is_consulted_before_store() {
        let fx = Fixture::new(1);
        // The bucket exists only in the batch; a store lookup would panic.
        let bucket = Arc::new(make_bucket(7, 3));
        let mut batch = HashMap::new();
        batch.insert(bucket.hash(), Arc::clone(&bucket));

        let target = fx.target(1, vec![TargetLevel::cleared()]);
        let task = fx.task(batch, target);

        let resolved = task.resolve_bucket(&bucket.hash());
        assert!(Arc::ptr_eq(&resolved, &bucket));
    }

    #[test]
    #[should_panic(expected = "not resolvable")]
    fn test_unresolvable_hash_panics() {
        let fx = Fixture::new(1);
        let target = fx.target(1, vec![TargetLevel::cleared()]);
        let task = fx.task(HashMap::new(), target);

        task.resolve_bucket(&Hash256::hash(b"never-stored"));
    }

    #[test]
    fn test_level_count_mismatch_is_an_error() {
        let fx = Fixture::new(2);
        let target = fx.target(1, vec![TargetLevel::cleared()]);
        let mut task = fx.task(HashMap::new(), target);

        assert!(matches!(
            task.step(),
            Err(CatchupError::LevelCountMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        let fx = Fixture::new(1);
        let target = fx.target(
            1,
            vec![TargetLevel {
                curr: "xyz".to_string(),
                snap: Hash256::ZERO.to_hex(),
            }],
        );
        let mut task = fx.task(HashMap::new(), target);

        assert!(matches!(task.step(), Err(CatchupError::InvalidHash(_))));
    }

    #[test]
    fn test_reset_restores_initial_walker_state() {
        let fx = Fixture::new(3);
        let bucket = Arc::new(make_bucket(1, 20));
        let mut levels = vec![TargetLevel::cleared(); 3];
        levels[2].curr = bucket.hash().to_hex();

        let mut batch = HashMap::new();
        batch.insert(bucket.hash(), Arc::clone(&bucket));
        let mut task = fx.task(batch, fx.target(3, levels));

        // Take a few steps into the deepest level's replay, then reset.
        assert_eq!(task.step().unwrap(), StepResult::Continue);
        assert_eq!(task.step().unwrap(), StepResult::Continue);
        task.reset();

        let progress = task.progress();
        assert_eq!(progress.level, 2);
        assert!(!progress.cascading);
        assert_eq!(progress.snap_remaining, 0);
        assert_eq!(progress.curr_remaining, 0);

        // The fresh run completes normally.
        task.run_to_completion().unwrap();
        assert_eq!(fx.list.lock().unwrap().level(2).curr_hash(), bucket.hash());
    }
}
