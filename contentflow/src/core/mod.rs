//! Core domain model types for contentflow.
//!
//! This module contains the task data model:
//! - Task status, task type and pipeline stage enums
//! - Generation requests
//! - The task record, partial results, updates and results

mod request;
mod status;
mod task;

pub use request::{ContentBrief, GenerationRequest, OriginalContent};
pub use status::{PipelineStage, TaskStatus, TaskType};
pub use task::{ItemFailure, PartialResults, TaskId, TaskRecord, TaskResult, TaskUpdate};
