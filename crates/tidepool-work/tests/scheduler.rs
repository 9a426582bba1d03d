use std::sync::{Arc, Mutex};
use std::time::Duration;

use tidepool_work::{
    Work, WorkContext, WorkOutcome, WorkScheduler, WorkSchedulerConfig, WorkSequence, WorkState,
};

struct LogWork {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Work for LogWork {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, _ctx: WorkContext) -> WorkOutcome {
        self.log.lock().unwrap().push(self.name.clone());
        WorkOutcome::Success
    }
}

struct RetryWork {
    name: String,
    succeed_on_attempt: u32,
}

#[async_trait::async_trait]
impl Work for RetryWork {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, ctx: WorkContext) -> WorkOutcome {
        if ctx.attempt < self.succeed_on_attempt {
            WorkOutcome::Retry {
                delay: Duration::from_millis(5),
            }
        } else {
            WorkOutcome::Success
        }
    }
}

struct CancellableWork {
    name: String,
}

#[async_trait::async_trait]
impl Work for CancellableWork {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, ctx: WorkContext) -> WorkOutcome {
        for _ in 0..50u32 {
            if ctx.is_cancelled() {
                return WorkOutcome::Cancelled;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        WorkOutcome::Success
    }
}

fn test_config() -> WorkSchedulerConfig {
    WorkSchedulerConfig {
        max_concurrency: 2,
        retry_delay: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_dependency_ordering() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut scheduler = WorkScheduler::new(test_config());

    let a = scheduler.add_work(
        Box::new(LogWork {
            name: "a".to_string(),
            log: Arc::clone(&log),
        }),
        vec![],
        0,
    );
    let _b = scheduler.add_work(
        Box::new(LogWork {
            name: "b".to_string(),
            log: Arc::clone(&log),
        }),
        vec![a],
        0,
    );

    scheduler.run_until_done().await;

    let log = log.lock().unwrap();
    assert_eq!(log.as_slice(), ["a", "b"]);
}

#[tokio::test]
async fn test_retry_then_success() {
    let mut scheduler = WorkScheduler::new(test_config());

    let id = scheduler.add_work(
        Box::new(RetryWork {
            name: "retry".to_string(),
            succeed_on_attempt: 2,
        }),
        vec![],
        1,
    );

    scheduler.run_until_done().await;

    assert_eq!(scheduler.state(id), Some(WorkState::Success));
    assert_eq!(scheduler.attempts(id), 2);
}

#[tokio::test]
async fn test_retries_exhausted_fails_and_blocks_dependents() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut scheduler = WorkScheduler::new(test_config());

    let flaky = scheduler.add_work(
        Box::new(RetryWork {
            name: "flaky".to_string(),
            succeed_on_attempt: 10,
        }),
        vec![],
        2,
    );
    let dependent = scheduler.add_work(
        Box::new(LogWork {
            name: "dependent".to_string(),
            log: Arc::clone(&log),
        }),
        vec![flaky],
        0,
    );

    scheduler.run_until_done().await;

    assert_eq!(scheduler.state(flaky), Some(WorkState::Failed));
    assert_eq!(scheduler.state(dependent), Some(WorkState::Blocked));
    assert_eq!(scheduler.attempts(flaky), 3); // first run + 2 retries
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_work_sequence_ordering() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut scheduler = WorkScheduler::new(test_config());
    let mut sequence = WorkSequence::new();

    for i in 0..3 {
        let work = Box::new(LogWork {
            name: format!("step-{}", i),
            log: Arc::clone(&log),
        });
        sequence.push(&mut scheduler, work, 0);
    }

    scheduler.run_until_done().await;

    assert_eq!(sequence.ids().len(), 3);
    assert_eq!(
        log.lock().unwrap().as_slice(),
        ["step-0", "step-1", "step-2"]
    );
}

#[tokio::test]
async fn test_cancel_work() {
    let mut scheduler = WorkScheduler::new(test_config());

    let id = scheduler.add_work(
        Box::new(CancellableWork {
            name: "cancel".to_string(),
        }),
        vec![],
        0,
    );

    let cancel = tokio_util::sync::CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel_clone.cancel();
    });

    scheduler.run_until_done_with_cancel(cancel).await;

    assert_eq!(scheduler.state(id), Some(WorkState::Cancelled));
}

#[tokio::test]
async fn test_metrics() {
    let mut scheduler = WorkScheduler::new(test_config());

    scheduler.add_work(
        Box::new(LogWork {
            name: "metrics".to_string(),
            log: Arc::new(Mutex::new(Vec::new())),
        }),
        vec![],
        0,
    );

    scheduler.run_until_done().await;

    let metrics = scheduler.metrics();
    assert_eq!(metrics.total, 1);
    assert_eq!(metrics.success, 1);
    assert_eq!(metrics.failed, 0);
    assert_eq!(metrics.attempts, 1);
}
