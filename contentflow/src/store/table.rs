//! Lock-free bookkeeping shared by the store implementations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::{GenerationRequest, TaskId, TaskRecord, TaskResult, TaskUpdate};
use crate::errors::StoreError;

/// Tasks by id plus the task each context currently holds.
///
/// Callers wrap this in whatever lock suits them. Mutating methods return the
/// new snapshot and whether anything changed, so durable stores can skip
/// rewriting unchanged state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct TaskTable {
    tasks: HashMap<TaskId, TaskRecord>,
    contexts: HashMap<String, TaskId>,
}

impl TaskTable {
    pub(crate) fn create(
        &mut self,
        context_label: &str,
        request: GenerationRequest,
    ) -> Result<TaskRecord, StoreError> {
        if let Some(existing_id) = self.contexts.get(context_label).copied() {
            match self.tasks.get(&existing_id) {
                Some(existing) if existing.status.is_active() => {
                    return Err(StoreError::ActiveTaskExists {
                        context: context_label.to_string(),
                        task_id: existing_id,
                    });
                }
                _ => {
                    self.tasks.remove(&existing_id);
                    tracing::debug!(
                        context = context_label,
                        superseded = %existing_id,
                        "Superseding terminal task"
                    );
                }
            }
        }

        let record = TaskRecord::new(context_label, request);
        self.contexts.insert(context_label.to_string(), record.id);
        self.tasks.insert(record.id, record.clone());
        Ok(record)
    }

    pub(crate) fn update(
        &mut self,
        id: TaskId,
        expected_version: u64,
        update: &TaskUpdate,
    ) -> Result<(TaskRecord, bool), StoreError> {
        let record = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if record.is_terminal() {
            return Ok((record.clone(), false));
        }
        if record.version != expected_version {
            return Err(StoreError::VersionConflict {
                task_id: id,
                expected: expected_version,
                actual: record.version,
            });
        }
        let changed = record.apply_update(update);
        Ok((record.clone(), changed))
    }

    pub(crate) fn complete(
        &mut self,
        id: TaskId,
        result: TaskResult,
    ) -> Result<(TaskRecord, bool), StoreError> {
        let record = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let changed = record.mark_completed(result)?;
        Ok((record.clone(), changed))
    }

    pub(crate) fn fail(&mut self, id: TaskId, error: &str) -> Result<(TaskRecord, bool), StoreError> {
        let record = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let changed = record.mark_failed(error)?;
        Ok((record.clone(), changed))
    }

    pub(crate) fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        self.tasks.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    pub(crate) fn current_for_context(&self, context_label: &str) -> Option<TaskRecord> {
        self.contexts
            .get(context_label)
            .and_then(|id| self.tasks.get(id))
            .cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }
}
