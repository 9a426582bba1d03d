//! Work scheduler for tidepool.
//!
//! Long-running maintenance jobs (catch-up, garbage collection, …) are
//! modeled as [`Work`] items registered with a [`WorkScheduler`]. The
//! scheduler runs items whose dependencies have succeeded, bounded by a
//! concurrency limit, and owns the retry/backoff policy: a work item that
//! returns [`WorkOutcome::Retry`] is re-queued after a delay until its
//! retry budget is exhausted, at which point it fails and its dependents
//! are blocked.
//!
//! Work items are expected to be cooperative: yield regularly, and check
//! [`WorkContext::is_cancelled`] between bounded units of work.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type WorkId = u64;

/// Result of a work execution.
#[derive(Debug, Clone)]
pub enum WorkOutcome {
    /// Work completed successfully.
    Success,
    /// Work was cancelled.
    Cancelled,
    /// Retry the work after the given delay (zero means the scheduler's
    /// configured default delay).
    Retry { delay: Duration },
    /// Work failed permanently.
    Failed(String),
}

/// Current state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    Pending,
    Running,
    Success,
    Failed,
    Blocked,
    Cancelled,
}

/// Execution context provided to a work item.
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub id: WorkId,
    /// 1-based attempt number; greater than one on a retry.
    pub attempt: u32,
    cancel_token: CancellationToken,
}

impl WorkContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

#[async_trait]
pub trait Work: Send {
    fn name(&self) -> &str;
    async fn run(&mut self, ctx: WorkContext) -> WorkOutcome;
}

struct WorkEntry {
    name: String,
    deps: Vec<WorkId>,
    retries_left: u32,
    attempts: u32,
    last_error: Option<String>,
    cancel_token: CancellationToken,
    work: Option<Box<dyn Work + Send>>,
}

/// Configuration for a [`WorkScheduler`].
#[derive(Debug, Clone)]
pub struct WorkSchedulerConfig {
    pub max_concurrency: usize,
    pub retry_delay: Duration,
}

impl Default for WorkSchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Aggregate counts over all registered work items.
#[derive(Debug, Clone, Default)]
pub struct WorkSchedulerMetrics {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,
    pub attempts: u64,
}

struct WorkCompletion {
    id: WorkId,
    outcome: WorkOutcome,
    work: Box<dyn Work + Send>,
    cancelled: bool,
}

/// Scheduler for async work items with dependencies.
pub struct WorkScheduler {
    config: WorkSchedulerConfig,
    next_id: WorkId,
    entries: HashMap<WorkId, WorkEntry>,
    states: HashMap<WorkId, WorkState>,
    dependents: HashMap<WorkId, Vec<WorkId>>,
}

impl WorkScheduler {
    pub fn new(config: WorkSchedulerConfig) -> Self {
        Self {
            config,
            next_id: 1,
            entries: HashMap::new(),
            states: HashMap::new(),
            dependents: HashMap::new(),
        }
    }

    /// Add a work item. It becomes runnable once every id in `deps` has
    /// succeeded. `retries` is the number of re-runs allowed after the
    /// first attempt.
    pub fn add_work(
        &mut self,
        work: Box<dyn Work + Send>,
        deps: Vec<WorkId>,
        retries: u32,
    ) -> WorkId {
        let id = self.next_id;
        self.next_id += 1;

        let name = work.name().to_string();
        self.entries.insert(
            id,
            WorkEntry {
                name: name.clone(),
                deps: deps.clone(),
                retries_left: retries,
                attempts: 0,
                last_error: None,
                cancel_token: CancellationToken::new(),
                work: Some(work),
            },
        );
        self.states.insert(id, WorkState::Pending);

        for dep in deps {
            self.dependents.entry(dep).or_default().push(id);
        }

        debug!(work_id = id, name = %name, "registered work item");
        id
    }

    /// Current state of a work item.
    pub fn state(&self, id: WorkId) -> Option<WorkState> {
        self.states.get(&id).copied()
    }

    /// The error message of a failed work item, if any.
    pub fn last_error(&self, id: WorkId) -> Option<&str> {
        self.entries.get(&id)?.last_error.as_deref()
    }

    /// Number of attempts a work item has made so far.
    pub fn attempts(&self, id: WorkId) -> u32 {
        self.entries.get(&id).map(|e| e.attempts).unwrap_or(0)
    }

    /// Cancel a pending or running work item. Returns false if the item is
    /// already finished.
    pub fn cancel(&mut self, id: WorkId) -> bool {
        match self.states.get(&id) {
            Some(WorkState::Pending) | Some(WorkState::Running) => {}
            _ => return false,
        }
        let Some(entry) = self.entries.get(&id) else {
            return false;
        };
        entry.cancel_token.cancel();
        self.finish(id, WorkState::Cancelled);
        true
    }

    /// Cancel every unfinished work item.
    pub fn cancel_all(&mut self) {
        let ids: Vec<WorkId> = self.entries.keys().copied().collect();
        for id in ids {
            let _ = self.cancel(id);
        }
    }

    /// Aggregate metrics over all work items.
    pub fn metrics(&self) -> WorkSchedulerMetrics {
        let mut metrics = WorkSchedulerMetrics {
            total: self.entries.len(),
            ..Default::default()
        };
        for (id, entry) in &self.entries {
            match self.states.get(id).copied().unwrap_or(WorkState::Pending) {
                WorkState::Pending => metrics.pending += 1,
                WorkState::Running => metrics.running += 1,
                WorkState::Success => metrics.success += 1,
                WorkState::Failed => metrics.failed += 1,
                WorkState::Blocked => metrics.blocked += 1,
                WorkState::Cancelled => metrics.cancelled += 1,
            }
            metrics.attempts += entry.attempts as u64;
        }
        metrics
    }

    /// Run until every work item has finished or is blocked.
    pub async fn run_until_done(&mut self) {
        self.run_until_done_with_cancel(CancellationToken::new()).await;
    }

    /// Like [`run_until_done`](Self::run_until_done), cancelling all
    /// outstanding work when `cancel` fires.
    pub async fn run_until_done_with_cancel(&mut self, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::channel::<WorkCompletion>(128);
        let mut running: HashSet<WorkId> = HashSet::new();
        let mut queue: VecDeque<WorkId> = self.pending_ids();

        loop {
            if cancel.is_cancelled() {
                self.cancel_all();
            }

            // Fill the concurrency budget from the ready queue.
            while running.len() < self.config.max_concurrency {
                let Some(id) = queue.pop_front() else { break };
                if running.contains(&id) || !self.deps_satisfied(id) {
                    continue;
                }
                if !matches!(self.states.get(&id), Some(WorkState::Pending)) {
                    continue;
                }

                let Some(entry) = self.entries.get_mut(&id) else {
                    continue;
                };
                let Some(mut work) = entry.work.take() else {
                    continue;
                };
                entry.attempts += 1;

                let ctx = WorkContext {
                    id,
                    attempt: entry.attempts,
                    cancel_token: entry.cancel_token.clone(),
                };
                let completion_tx = tx.clone();
                let token = entry.cancel_token.clone();

                self.states.insert(id, WorkState::Running);
                running.insert(id);

                tokio::spawn(async move {
                    let outcome = work.run(ctx).await;
                    let _ = completion_tx
                        .send(WorkCompletion {
                            id,
                            outcome,
                            work,
                            cancelled: token.is_cancelled(),
                        })
                        .await;
                });
            }

            if running.is_empty() && queue.is_empty() {
                break;
            }

            let completion = tokio::select! {
                _ = cancel.cancelled(), if !cancel.is_cancelled() => continue,
                completion = rx.recv() => completion,
            };
            let Some(completion) = completion else { break };
            running.remove(&completion.id);

            let id = completion.id;
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.work = Some(completion.work);
            }

            let was_cancelled = completion.cancelled
                || matches!(self.states.get(&id), Some(WorkState::Cancelled))
                || matches!(completion.outcome, WorkOutcome::Cancelled);

            if was_cancelled {
                self.finish(id, WorkState::Cancelled);
                continue;
            }

            match completion.outcome {
                WorkOutcome::Success => {
                    self.finish(id, WorkState::Success);
                    // Dependents may have become runnable.
                    for ready in self.pending_ids() {
                        if !queue.contains(&ready) {
                            queue.push_back(ready);
                        }
                    }
                }
                WorkOutcome::Retry { delay } => {
                    let Some(entry) = self.entries.get_mut(&id) else {
                        continue;
                    };
                    if entry.retries_left == 0 {
                        warn!(work_id = id, name = %entry.name, "retries exhausted");
                        self.finish(id, WorkState::Failed);
                        continue;
                    }
                    entry.retries_left -= 1;
                    self.states.insert(id, WorkState::Pending);

                    let delay = if delay.is_zero() {
                        self.config.retry_delay
                    } else {
                        delay
                    };
                    debug!(work_id = id, ?delay, "retrying work");
                    tokio::time::sleep(delay).await;
                    queue.push_back(id);
                }
                WorkOutcome::Failed(err) => {
                    warn!(work_id = id, error = %err, "work failed");
                    if let Some(entry) = self.entries.get_mut(&id) {
                        entry.last_error = Some(err);
                    }
                    self.finish(id, WorkState::Failed);
                }
                WorkOutcome::Cancelled => unreachable!("handled above"),
            }
        }

        info!("work scheduler finished");
    }

    fn pending_ids(&self) -> VecDeque<WorkId> {
        let mut ids: Vec<WorkId> = self
            .entries
            .keys()
            .filter(|id| matches!(self.states.get(id), Some(WorkState::Pending)))
            .copied()
            .collect();
        ids.sort_unstable();
        ids.into()
    }

    fn deps_satisfied(&self, id: WorkId) -> bool {
        let Some(entry) = self.entries.get(&id) else {
            return false;
        };
        entry
            .deps
            .iter()
            .all(|dep| matches!(self.states.get(dep), Some(WorkState::Success)))
    }

    /// Record a terminal state and block dependents for non-success ends.
    fn finish(&mut self, id: WorkId, state: WorkState) {
        self.states.insert(id, state);
        if matches!(state, WorkState::Success) {
            return;
        }
        if let Some(children) = self.dependents.get(&id).cloned() {
            for child in children {
                if matches!(self.states.get(&child), Some(WorkState::Pending)) {
                    self.states.insert(child, WorkState::Blocked);
                }
            }
        }
    }
}

/// Helper for creating sequential work dependencies.
#[derive(Default)]
pub struct WorkSequence {
    last: Option<WorkId>,
    ids: Vec<WorkId>,
}

impl WorkSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `work` depending on the previously pushed item, if any.
    pub fn push(
        &mut self,
        scheduler: &mut WorkScheduler,
        work: Box<dyn Work + Send>,
        retries: u32,
    ) -> WorkId {
        let deps = self.last.into_iter().collect();
        let id = scheduler.add_work(work, deps, retries);
        self.last = Some(id);
        self.ids.push(id);
        id
    }

    pub fn ids(&self) -> &[WorkId] {
        &self.ids
    }
}
