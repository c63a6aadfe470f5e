//! Task lifecycle events.
//!
//! The pipeline controller emits one event per stage boundary, per absorbed
//! item failure and per terminal transition. Payloads are JSON objects that
//! always carry `taskId`.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde_json::{json, Value};

use crate::core::{PipelineStage, TaskId, TaskResult};
use crate::errors::BatchItemFailure;
use crate::observability::StageSpan;

/// Event names.
pub mod names {
    /// A stage began.
    pub const STAGE_STARTED: &str = "task.stage_started";
    /// A stage finished (batch stages finish even with failed items).
    pub const STAGE_COMPLETED: &str = "task.stage_completed";
    /// One batch item failed and was skipped.
    pub const ITEM_FAILED: &str = "task.item_failed";
    /// The task reached COMPLETED.
    pub const COMPLETED: &str = "task.completed";
    /// The task reached FAILED.
    pub const FAILED: &str = "task.failed";
}

/// Payload for [`names::STAGE_STARTED`].
#[must_use]
pub fn stage_started(task_id: TaskId, stage: PipelineStage, resumed: bool) -> Value {
    json!({ "taskId": task_id, "stage": stage, "resumed": resumed })
}

/// Payload for [`names::STAGE_COMPLETED`].
#[must_use]
pub fn stage_completed(span: &StageSpan, next: PipelineStage) -> Value {
    json!({
        "taskId": span.task_id,
        "stage": span.stage,
        "durationMs": span.duration_ms,
        "next": next,
    })
}

/// Payload for [`names::ITEM_FAILED`].
#[must_use]
pub fn item_failed(task_id: TaskId, stage: PipelineStage, failure: &BatchItemFailure) -> Value {
    json!({
        "taskId": task_id,
        "stage": stage,
        "index": failure.index,
        "attempts": failure.cause.attempts,
        "error": failure.cause.last_error.to_string(),
    })
}

/// Payload for [`names::COMPLETED`].
#[must_use]
pub fn completed(task_id: TaskId, result: &TaskResult) -> Value {
    json!({
        "taskId": task_id,
        "successCount": result.success_count,
        "failedIndices": result.failed_indices,
    })
}

/// Payload for [`names::FAILED`].
#[must_use]
pub fn failed(task_id: TaskId, stage: Option<PipelineStage>, error: &str) -> Value {
    json!({ "taskId": task_id, "stage": stage, "error": error })
}
