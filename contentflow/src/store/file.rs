//! Durable task store backed by a single JSON file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::table::TaskTable;
use super::TaskStore;
use crate::core::{GenerationRequest, TaskId, TaskRecord, TaskResult, TaskUpdate};
use crate::errors::StoreError;

/// A task store that writes every mutation through to disk.
///
/// The whole table is rewritten on each change (temp file + rename), which
/// keeps a reload consistent with the last acknowledged write. Records are
/// small and there is one writer per task, so the full rewrite is acceptable.
#[derive(Debug)]
pub struct FileTaskStore {
    path: PathBuf,
    table: Mutex<TaskTable>,
}

impl FileTaskStore {
    /// Opens the store at `path`, loading existing records if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => TaskTable::default(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), tasks = table.len(), "Opened task store");

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, table: &TaskTable) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(table)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|err| {
            error!(path = %self.path.display(), error = %err, "Failed to persist task store");
            StoreError::from(err)
        })
    }

    /// Applies `mutate` to a copy of the table and swaps it in once the copy
    /// is on disk. A failed write leaves the in-memory table untouched.
    async fn commit<T: Send>(
        &self,
        mutate: impl FnOnce(&mut TaskTable) -> Result<(T, bool), StoreError> + Send,
    ) -> Result<T, StoreError> {
        let mut table = self.table.lock().await;
        let mut staged = table.clone();
        let (value, changed) = mutate(&mut staged)?;
        if changed {
            self.persist(&staged).await?;
            *table = staged;
        }
        Ok(value)
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn create(
        &self,
        context_label: &str,
        request: GenerationRequest,
    ) -> Result<TaskRecord, StoreError> {
        self.commit(|table| Ok((table.create(context_label, request)?, true)))
            .await
    }

    async fn update(
        &self,
        id: TaskId,
        expected_version: u64,
        update: TaskUpdate,
    ) -> Result<TaskRecord, StoreError> {
        self.commit(|table| table.update(id, expected_version, &update))
            .await
    }

    async fn complete(&self, id: TaskId, result: TaskResult) -> Result<TaskRecord, StoreError> {
        self.commit(|table| table.complete(id, result)).await
    }

    async fn fail(&self, id: TaskId, error: &str) -> Result<TaskRecord, StoreError> {
        self.commit(|table| table.fail(id, error)).await
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord, StoreError> {
        self.table.lock().await.get(id)
    }

    async fn current_for_context(
        &self,
        context_label: &str,
    ) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.table.lock().await.current_for_context(context_label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OriginalContent, PipelineStage, TaskStatus};
    use pretty_assertions::assert_eq;

    fn request() -> GenerationRequest {
        GenerationRequest::MediaRewrite(OriginalContent {
            text: "text".to_string(),
            image_urls: vec!["https://img/0.png".to_string()],
            style: "formal".to_string(),
            platform: None,
        })
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        let record = {
            let store = FileTaskStore::open(&path).await.unwrap();
            let record = store.create("ctx", request()).await.unwrap();
            store
                .update(
                    record.id,
                    record.version,
                    TaskUpdate::new()
                        .stage(PipelineStage::Generate)
                        .prompt(0, Some("a prompt".to_string())),
                )
                .await
                .unwrap()
        };

        let reopened = FileTaskStore::open(&path).await.unwrap();
        let loaded = reopened.get(record.id).await.unwrap();

        assert_eq!(loaded, record);
        assert_eq!(loaded.status, TaskStatus::Processing);
        assert_eq!(loaded.partial_results.prompt_at(0), Some("a prompt"));

        // The context index is durable too.
        let err = reopened.create("ctx", request()).await.unwrap_err();
        assert!(matches!(err, StoreError::ActiveTaskExists { .. }));
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path().join("nested/tasks.json"))
            .await
            .unwrap();

        assert!(store.current_for_context("ctx").await.unwrap().is_none());
        store.create("ctx", request()).await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_open_corrupt_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let err = FileTaskStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_failed_persist_leaves_table_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let store = FileTaskStore::open(&path).await.unwrap();
        let record = store.create("ctx", request()).await.unwrap();

        // A directory where the temp file should go makes the write fail.
        let blocker = path.with_extension("tmp");
        tokio::fs::create_dir(&blocker).await.unwrap();

        let update = || {
            TaskUpdate::new()
                .stage(PipelineStage::Generate)
                .progress(40, "Analyzed image 1 of 1")
        };
        let err = store
            .update(record.id, record.version, update())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.fail(record.id, "boom").await.is_err());

        let current = store.get(record.id).await.unwrap();
        assert_eq!(current, record);

        tokio::fs::remove_dir(&blocker).await.unwrap();
        let updated = store
            .update(record.id, record.version, update())
            .await
            .unwrap();
        assert_eq!(updated.version, record.version + 1);
        assert_eq!(updated.progress, 40);

        let reopened = FileTaskStore::open(&path).await.unwrap();
        assert_eq!(reopened.get(record.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_terminal_state_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        let store = FileTaskStore::open(&path).await.unwrap();
        let record = store.create("ctx", request()).await.unwrap();
        store.fail(record.id, "rewrite failed").await.unwrap();
        drop(store);

        let reopened = FileTaskStore::open(&path).await.unwrap();
        let loaded = reopened.get(record.id).await.unwrap();
        assert_eq!(loaded.status, TaskStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("rewrite failed"));
    }
}
