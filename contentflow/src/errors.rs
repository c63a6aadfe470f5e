//! Error types for the contentflow pipeline.
//!
//! The taxonomy follows the way failures travel through the pipeline:
//! a [`ProviderError`] is one failed external call, [`RetriesExhausted`] is
//! what the stage executor reports once its budget is spent, a
//! [`BatchItemFailure`] is an absorbed per-item failure, a [`PipelineFailure`]
//! fails the whole task, and a [`PollTimeout`] is purely client-observed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{PipelineStage, TaskId, TaskStatus, TaskType};

/// The main error type for contentflow operations.
#[derive(Debug, Error)]
pub enum ContentflowError {
    /// A task store operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A stage failed and the task was marked FAILED.
    #[error("{0}")]
    Pipeline(#[from] PipelineFailure),

    /// A provider call failed after its retry budget.
    #[error("{0}")]
    RetriesExhausted(#[from] RetriesExhausted),

    /// The client gave up polling.
    #[error("{0}")]
    PollTimeout(#[from] PollTimeout),

    /// A resume token did not match the stored task.
    #[error("{0}")]
    ResumeRejected(#[from] ResumeRejected),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A controller run for this task is already in progress in this process.
    #[error("Task {0} is already running")]
    AlreadyRunning(TaskId),

    /// The requested operation does not apply to the task in its current state.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Crate-wide result alias.
pub type Result<T, E = ContentflowError> = std::result::Result<T, E>;

/// A single external provider call failed.
///
/// The stage executor does not distinguish between causes: every variant is
/// retried and, once the budget is spent, reported the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderError {
    /// The provider could not be reached or returned a server error.
    #[error("Provider unavailable: {message}")]
    Unavailable {
        /// Transport or status detail.
        message: String,
    },

    /// The provider answered without usable content.
    #[error("Provider returned an empty response")]
    EmptyResponse,

    /// The provider could not fetch the referenced image.
    #[error("Image unreachable: {url}")]
    UnreachableImage {
        /// The image URL.
        url: String,
    },

    /// The call exceeded its request timeout.
    #[error("Provider call timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The response body could not be decoded.
    #[error("Invalid provider response: {message}")]
    InvalidResponse {
        /// Decoding detail.
        message: String,
    },
}

impl ProviderError {
    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates an unreachable image error.
    #[must_use]
    pub fn unreachable_image(url: impl Into<String>) -> Self {
        Self::UnreachableImage { url: url.into() }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

/// The stage executor's typed failure once every attempt has failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed after {attempts} attempt(s): {last_error}")]
pub struct RetriesExhausted {
    /// Name of the operation (e.g. "rewrite", "generate[2]").
    pub operation: String,
    /// Number of attempts made.
    pub attempts: usize,
    /// The error of the final attempt.
    #[source]
    pub last_error: ProviderError,
}

/// A recorded-and-skipped failure of one item inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Item {index} failed: {cause}")]
pub struct BatchItemFailure {
    /// Index of the item in the capped batch.
    pub index: usize,
    /// Why it failed.
    #[source]
    pub cause: RetriesExhausted,
}

/// A stage-level unrecoverable error that failed the whole task.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{stage} stage failed: {message}")]
pub struct PipelineFailure {
    /// Task that failed.
    pub task_id: TaskId,
    /// Stage that failed.
    pub stage: PipelineStage,
    /// Error message stored on the task.
    pub message: String,
}

/// The client exhausted its poll budget without seeing a terminal status.
///
/// This says nothing about the task's server-side outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Timed out waiting for task {task_id} after {polls} polls, please retry")]
pub struct PollTimeout {
    /// Task being polled.
    pub task_id: TaskId,
    /// Number of polls performed.
    pub polls: u32,
}

/// Errors raised by task stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No task with this id.
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// The context already has a PENDING or PROCESSING task.
    #[error("Context '{context}' already has an active task: {task_id}")]
    ActiveTaskExists {
        /// The context label.
        context: String,
        /// The active task.
        task_id: TaskId,
    },

    /// The record changed since the writer last read it.
    #[error("Version conflict on task {task_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The task.
        task_id: TaskId,
        /// Version the writer expected.
        expected: u64,
        /// Version in the store.
        actual: u64,
    },

    /// The task is already terminal with a different outcome.
    #[error("Task {task_id} is already {status}")]
    AlreadyTerminal {
        /// The task.
        task_id: TaskId,
        /// Its terminal status.
        status: TaskStatus,
    },

    /// Storage I/O failed.
    #[error("Storage error: {0}")]
    Io(String),

    /// A record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Reasons a resume token is not honoured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResumeRejected {
    /// The token's task id is not a valid id.
    #[error("Malformed task id in resume token: '{0}'")]
    MalformedId(String),

    /// The store has no such task.
    #[error("Resume token refers to unknown task {0}")]
    UnknownTask(TaskId),

    /// The stored task has a different type.
    #[error("Resume token type {claimed} does not match task type {actual}")]
    TypeMismatch {
        /// Type in the token.
        claimed: TaskType,
        /// Type in the store.
        actual: TaskType,
    },

    /// The stored task belongs to another context.
    #[error("Resume token context '{claimed}' does not match task context '{actual}'")]
    ContextMismatch {
        /// Context in the token.
        claimed: String,
        /// Context in the store.
        actual: String,
    },
}

/// Errors raised while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {message}")]
    Io {
        /// The path.
        path: String,
        /// The I/O error.
        message: String,
    },

    /// The file is not valid TOML for the config schema.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),
}
