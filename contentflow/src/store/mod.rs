//! Task record storage.
//!
//! This module provides:
//! - The [`TaskStore`] trait, the single shared mutable resource of the pipeline
//! - An in-memory store and a durable JSON-file store
//! - Resume tokens and the durable slot that holds them

mod file;
mod memory;
mod resume;
mod table;

pub use file::FileTaskStore;
pub use memory::InMemoryTaskStore;
pub use resume::{
    validate_resume_token, FileResumeSlot, InMemoryResumeSlot, ResumeSlot, ResumeToken,
};
#[cfg(test)]
pub(crate) use resume::MockResumeSlot;

use async_trait::async_trait;

use crate::core::{GenerationRequest, TaskId, TaskRecord, TaskResult, TaskUpdate};
use crate::errors::StoreError;

/// Trait for task record storage backends.
///
/// At most one task per context label is active at a time. Every mutation
/// bumps the record's `version`; `update` is guarded by the version the writer
/// last saw so two controllers cannot interleave writes on one task.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Allocates a PENDING task for a context.
    ///
    /// Fails with [`StoreError::ActiveTaskExists`] if the context already has
    /// an active task. A terminal task previously held by the context is
    /// superseded and dropped.
    async fn create(
        &self,
        context_label: &str,
        request: GenerationRequest,
    ) -> Result<TaskRecord, StoreError>;

    /// Merges a partial update into an active task.
    ///
    /// No-op (returns the unchanged record) if the task is terminal. Fails
    /// with [`StoreError::VersionConflict`] if `expected_version` is stale.
    async fn update(
        &self,
        id: TaskId,
        expected_version: u64,
        update: TaskUpdate,
    ) -> Result<TaskRecord, StoreError>;

    /// Marks a task COMPLETED. Idempotent.
    async fn complete(&self, id: TaskId, result: TaskResult) -> Result<TaskRecord, StoreError>;

    /// Marks a task FAILED. Idempotent.
    async fn fail(&self, id: TaskId, error: &str) -> Result<TaskRecord, StoreError>;

    /// Reads a snapshot of a task.
    async fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError>;

    /// Returns the task currently held by a context, active or terminal.
    async fn current_for_context(
        &self,
        context_label: &str,
    ) -> Result<Option<TaskRecord>, StoreError>;
}
