//! Scheduler integration for bucket catch-up.
//!
//! [`ApplyBucketsWork`] wraps an [`ApplyBucketsTask`] as a
//! [`tidepool_work::Work`] item. Each run drives the task step by step,
//! yielding to the runtime between steps so other work on the scheduler
//! interleaves with replay, and checking for cancellation at every step
//! boundary.
//!
//! Retry policy lives entirely in the scheduler: a step failure is
//! recorded as a `replay_failure` observation and surfaced as
//! [`WorkOutcome::Retry`]; on the next attempt the task is reset and
//! re-derives its replay decisions from the (partially updated) bucket
//! list.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use tidepool_work::{Work, WorkContext, WorkOutcome};

use crate::apply::{ApplyBucketsTask, StepResult};

/// Work item that applies buckets until the target state is adopted.
pub struct ApplyBucketsWork {
    task: ApplyBucketsTask,
}

impl ApplyBucketsWork {
    pub fn new(task: ApplyBucketsTask) -> Self {
        Self { task }
    }

    /// The wrapped task.
    pub fn task(&self) -> &ApplyBucketsTask {
        &self.task
    }
}

#[async_trait]
impl Work for ApplyBucketsWork {
    fn name(&self) -> &str {
        "apply-buckets"
    }

    async fn run(&mut self, ctx: WorkContext) -> WorkOutcome {
        if ctx.attempt > 1 {
            self.task.reset();
        }

        loop {
            if ctx.is_cancelled() {
                return WorkOutcome::Cancelled;
            }
            match self.task.step() {
                Ok(StepResult::Continue) | Ok(StepResult::LevelDone) => {
                    tokio::task::yield_now().await;
                }
                Ok(StepResult::AllDone) => return WorkOutcome::Success,
                Err(err) => {
                    self.task.metrics().record_failure();
                    warn!(error = %err, "bucket replay step failed");
                    // Zero delay defers to the scheduler's configured
                    // retry delay; the retry/abort decision is the
                    // scheduler's alone.
                    return WorkOutcome::Retry {
                        delay: Duration::ZERO,
                    };
                }
            }
        }
    }
}
