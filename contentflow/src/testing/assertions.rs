//! Assertions over task records and observed progress.

use crate::core::{TaskRecord, TaskStatus};
use crate::progress::ProgressUpdate;

/// Asserts the record is COMPLETED at 100% and returns its result's images.
///
/// # Panics
///
/// Panics if the record is not completed.
pub fn assert_completed(record: &TaskRecord) -> Vec<Option<String>> {
    assert_eq!(record.status, TaskStatus::Completed, "task {} not completed", record.id);
    assert_eq!(record.progress, 100);
    assert!(record.error.is_none());
    record
        .result
        .as_ref()
        .map(|result| result.generated_images.clone())
        .unwrap_or_else(|| panic!("completed task {} has no result", record.id))
}

/// Asserts the record is FAILED with an error message.
///
/// # Panics
///
/// Panics if the record is not failed.
pub fn assert_failed(record: &TaskRecord) -> String {
    assert_eq!(record.status, TaskStatus::Failed, "task {} not failed", record.id);
    assert!(record.result.is_none());
    record
        .error
        .clone()
        .unwrap_or_else(|| panic!("failed task {} has no error", record.id))
}

/// Asserts progress never decreases across observed updates.
///
/// # Panics
///
/// Panics on the first decrease.
pub fn assert_progress_monotonic(updates: &[ProgressUpdate]) {
    for pair in updates.windows(2) {
        assert!(
            pair[1].progress >= pair[0].progress,
            "progress decreased from {} to {}",
            pair[0].progress,
            pair[1].progress
        );
    }
}
