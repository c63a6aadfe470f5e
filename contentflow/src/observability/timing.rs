//! Stage timing.

use serde::Serialize;
use std::time::Instant;

use crate::core::{PipelineStage, TaskId};

/// Measures how long one stage of one task took.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    task_id: TaskId,
    stage: PipelineStage,
}

impl SpanTimer {
    /// Starts timing a stage.
    #[must_use]
    pub fn start(task_id: TaskId, stage: PipelineStage) -> Self {
        Self {
            start: Instant::now(),
            task_id,
            stage,
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the stage being timed.
    #[must_use]
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Stops the timer and returns the span attributes.
    #[must_use]
    pub fn finish(self) -> StageSpan {
        StageSpan {
            task_id: self.task_id,
            stage: self.stage,
            duration_ms: self.elapsed_ms(),
        }
    }
}

/// A finished stage span, attached to stage events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpan {
    /// The task.
    pub task_id: TaskId,
    /// The stage.
    pub stage: PipelineStage,
    /// Wall-clock duration.
    pub duration_ms: f64,
}
