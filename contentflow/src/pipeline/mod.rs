//! Pipeline execution.
//!
//! This module provides:
//! - Retry budgets and the bounded-retry stage executor
//! - The sequential, rate-limited batch runner
//! - Resume planning from a persisted task record
//! - The controller that drives a task through its stages

mod batch;
mod controller;
mod executor;
mod plan;
mod retry;


pub use batch::{
    BatchConfig, BatchItemReport, BatchObserver, BatchOutcome, BatchRunner, ItemOutcome,
    ProgressBand,
};
pub use controller::PipelineController;
pub use executor::StageExecutor;
pub use plan::{after_analyze, after_rewrite, capped_image_count, resume_point, ResumePoint};
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState};
