//! Progress reporting to consumers.
//!
//! The pipeline controller never talks to consumers directly: it writes the
//! task record, and a [`ProgressPoller`] reads the record on an interval and
//! republishes what it sees through a [`ProgressObserver`]. Observers are the
//! seam where another transport (e.g. [`WatchProgressObserver`]) plugs in.

mod poller;
mod watch;

pub use poller::{PollConfig, PollHandle, PollOutcome, PollTimeoutPolicy, ProgressPoller};
pub use watch::{WatchProgressObserver, WatchedProgress};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{PipelineStage, TaskId, TaskRecord, TaskStatus};
use crate::errors::PollTimeout;

/// What a consumer is told on each observed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// The task.
    pub task_id: TaskId,
    /// Status at read time.
    pub status: TaskStatus,
    /// Progress 0..=100.
    pub progress: u8,
    /// Latest message.
    pub progress_message: String,
    /// Current stage.
    pub current_stage: Option<PipelineStage>,
}

impl From<&TaskRecord> for ProgressUpdate {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.id,
            status: record.status,
            progress: record.progress,
            progress_message: record.progress_message.clone(),
            current_stage: record.current_stage,
        }
    }
}

/// Receives progress for one task.
///
/// Exactly one of `on_terminal` or `on_timeout` ends a poll, unless the
/// consumer stopped polling first.
#[async_trait]
pub trait ProgressObserver: Send + Sync {
    /// Progress, message or stage changed.
    async fn on_update(&self, update: &ProgressUpdate);

    /// The task reached COMPLETED or FAILED.
    async fn on_terminal(&self, record: &TaskRecord);

    /// The poll budget ran out before a terminal status was seen.
    async fn on_timeout(&self, timeout: &PollTimeout);
}

/// Logs every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProgressObserver;

#[async_trait]
impl ProgressObserver for LoggingProgressObserver {
    async fn on_update(&self, update: &ProgressUpdate) {
        info!(
            task_id = %update.task_id,
            progress = update.progress,
            stage = ?update.current_stage,
            "{}",
            update.progress_message
        );
    }

    async fn on_terminal(&self, record: &TaskRecord) {
        match record.status {
            TaskStatus::Failed => warn!(
                task_id = %record.id,
                error = record.error.as_deref().unwrap_or_default(),
                "Task failed"
            ),
            _ => info!(task_id = %record.id, status = %record.status, "Task finished"),
        }
    }

    async fn on_timeout(&self, timeout: &PollTimeout) {
        warn!(task_id = %timeout.task_id, polls = timeout.polls, "{timeout}");
    }
}
