//! In-memory task store.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::table::TaskTable;
use super::TaskStore;
use crate::core::{GenerationRequest, TaskId, TaskRecord, TaskResult, TaskUpdate};
use crate::errors::StoreError;

/// A process-local task store.
///
/// Survives UI teardown within the process but not a restart; use
/// [`super::FileTaskStore`] when records must outlive the process.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    table: Mutex<TaskTable>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Returns true if no tasks are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(
        &self,
        context_label: &str,
        request: GenerationRequest,
    ) -> Result<TaskRecord, StoreError> {
        self.table.lock().create(context_label, request)
    }

    async fn update(
        &self,
        id: TaskId,
        expected_version: u64,
        update: TaskUpdate,
    ) -> Result<TaskRecord, StoreError> {
        self.table
            .lock()
            .update(id, expected_version, &update)
            .map(|(record, _)| record)
    }

    async fn complete(&self, id: TaskId, result: TaskResult) -> Result<TaskRecord, StoreError> {
        self.table.lock().complete(id, result).map(|(record, _)| record)
    }

    async fn fail(&self, id: TaskId, error: &str) -> Result<TaskRecord, StoreError> {
        self.table.lock().fail(id, error).map(|(record, _)| record)
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        self.table.lock().get(id)
    }

    async fn current_for_context(
        &self,
        context_label: &str,
    ) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.table.lock().current_for_context(context_label))
    }
}
