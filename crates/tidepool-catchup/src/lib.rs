//! Leveled bucket catch-up for tidepool.
//!
//! This crate brings a node's bucket list into agreement with a
//! [`TargetStateDescriptor`] published by a trusted history source. The
//! contents of every mismatched bucket are replayed into the live
//! database level by level, deepest first, with a cascade rule: once any
//! level needs replay, every shallower level is replayed unconditionally.
//!
//! The work is resumable and cooperatively scheduled: the
//! [`ApplyBucketsTask`] state machine performs one bounded unit per
//! [`step`](ApplyBucketsTask::step), and [`ApplyBucketsWork`] adapts it to
//! the [`tidepool_work`] scheduler.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::{Arc, Mutex};
//! use tidepool_catchup::{ApplyBucketsTask, ApplyMetrics, TargetStateDescriptor};
//!
//! let target = TargetStateDescriptor::from_json(&descriptor_json)?;
//! let metrics = Arc::new(ApplyMetrics::new());
//! let mut task = ApplyBucketsTask::new(
//!     provided_buckets,
//!     target,
//!     Arc::clone(&bucket_list),
//!     Arc::clone(&store),
//!     db,
//!     metrics,
//! );
//! task.run_to_completion()?;
//! ```

mod apply;
mod error;
mod metrics;
mod target_state;
mod work;

pub use apply::{ApplyBucketsTask, ApplyProgress, StepResult};
pub use error::CatchupError;
pub use metrics::{ApplyMetrics, ApplyMetricsSnapshot};
pub use target_state::{TargetLevel, TargetStateDescriptor};
pub use work::ApplyBucketsWork;

/// Result type for catch-up operations.
pub type Result<T> = std::result::Result<T, CatchupError>;
