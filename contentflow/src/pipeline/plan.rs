//! Stage transitions and the resume policy.
//!
//! Checkpoints are per stage: a resumed controller re-runs the stage it was
//! in from scratch, except for `generate`, whose per-item results are stored
//! as they arrive and reused.

use crate::core::{PipelineStage, TaskRecord, TaskStatus};

/// Where a controller picks a task up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// Run the pipeline starting at this stage.
    Start(PipelineStage),
    /// The task is COMPLETED; hand back the stored result.
    AlreadyCompleted,
    /// The task is FAILED; a resume cannot continue it.
    AlreadyFailed,
}

/// Decides where a controller (re-)initialized on `record` continues.
#[must_use]
pub fn resume_point(record: &TaskRecord, cap: usize) -> ResumePoint {
    match record.status {
        TaskStatus::Completed => return ResumePoint::AlreadyCompleted,
        TaskStatus::Failed => return ResumePoint::AlreadyFailed,
        TaskStatus::Pending | TaskStatus::Processing => {}
    }

    let partial = &record.partial_results;
    let stage = match record.current_stage {
        None | Some(PipelineStage::Rewrite) => {
            if partial.rewritten_text.is_some() {
                after_rewrite(record, cap)
            } else {
                PipelineStage::Rewrite
            }
        }
        Some(PipelineStage::Analyze) => {
            if prompts_recorded(record, cap) {
                after_analyze(record)
            } else {
                PipelineStage::Analyze
            }
        }
        Some(PipelineStage::Generate) => after_analyze(record),
        Some(PipelineStage::Complete) => PipelineStage::Complete,
    };

    // A stage past rewrite is only reachable with its rewritten text.
    if stage != PipelineStage::Rewrite && partial.rewritten_text.is_none() {
        return ResumePoint::Start(PipelineStage::Rewrite);
    }
    ResumePoint::Start(stage)
}

/// Stage following a successful rewrite.
///
/// Goes to `analyze` only for task types that include it and only when the
/// request carries images.
#[must_use]
pub fn after_rewrite(record: &TaskRecord, cap: usize) -> PipelineStage {
    let has_images = cap > 0 && !record.request.source_images().is_empty();
    if record.task_type.includes(PipelineStage::Analyze) && has_images {
        PipelineStage::Analyze
    } else {
        PipelineStage::Complete
    }
}

/// Stage following an analyze batch: `generate` if any prompt is usable.
#[must_use]
pub fn after_analyze(record: &TaskRecord) -> PipelineStage {
    if record.partial_results.has_usable_prompt() {
        PipelineStage::Generate
    } else {
        PipelineStage::Complete
    }
}

/// Number of source images the batch stages process.
#[must_use]
pub fn capped_image_count(record: &TaskRecord, cap: usize) -> usize {
    record.request.source_images().len().min(cap)
}

fn prompts_recorded(record: &TaskRecord, cap: usize) -> bool {
    let expected = capped_image_count(record, cap);
    expected > 0 && record.partial_results.image_prompts.len() >= expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ContentBrief, GenerationRequest, OriginalContent, TaskResult, TaskUpdate};

    fn media(images: usize) -> TaskRecord {
        TaskRecord::new(
            "ctx",
            GenerationRequest::MediaRewrite(OriginalContent {
                text: "t".to_string(),
                image_urls: (0..images).map(|i| format!("https://img/{i}.png")).collect(),
                style: "s".to_string(),
                platform: None,
            }),
        )
    }

    fn brief() -> TaskRecord {
        TaskRecord::new(
            "ctx",
            GenerationRequest::ContentCreation(ContentBrief {
                subject: "s".to_string(),
                target_length: None,
                style: "s".to_string(),
                platform: None,
            }),
        )
    }

    #[test]
    fn test_fresh_task_starts_at_rewrite() {
        assert_eq!(resume_point(&media(3), 10), ResumePoint::Start(PipelineStage::Rewrite));
    }

    #[test]
    fn test_rewrite_without_text_reruns_rewrite() {
        let mut record = media(3);
        record.apply_update(&TaskUpdate::new().stage(PipelineStage::Rewrite).progress(5, "x"));
        assert_eq!(resume_point(&record, 10), ResumePoint::Start(PipelineStage::Rewrite));
    }

    #[test]
    fn test_after_rewrite_routing() {
        assert_eq!(after_rewrite(&media(2), 10), PipelineStage::Analyze);
        assert_eq!(after_rewrite(&media(0), 10), PipelineStage::Complete);
        assert_eq!(after_rewrite(&brief(), 10), PipelineStage::Complete);
    }

    #[test]
    fn test_incomplete_analyze_reruns_analyze() {
        let mut record = media(3);
        record.apply_update(
            &TaskUpdate::new()
                .stage(PipelineStage::Analyze)
                .rewritten_text("t2")
                .prompt(0, Some("p0".to_string())),
        );
        assert_eq!(resume_point(&record, 10), ResumePoint::Start(PipelineStage::Analyze));
    }

    #[test]
    fn test_generate_with_prompts_resumes_generate() {
        let mut record = media(3);
        record.apply_update(
            &TaskUpdate::new()
                .stage(PipelineStage::Generate)
                .rewritten_text("t2")
                .prompt(0, Some("p0".to_string()))
                .prompt(1, None)
                .prompt(2, Some("p2".to_string())),
        );
        assert_eq!(resume_point(&record, 10), ResumePoint::Start(PipelineStage::Generate));
    }

    #[test]
    fn test_generate_without_prompts_completes() {
        let mut record = media(2);
        record.apply_update(
            &TaskUpdate::new()
                .stage(PipelineStage::Generate)
                .rewritten_text("t2")
                .prompt(0, None)
                .prompt(1, None),
        );
        assert_eq!(resume_point(&record, 10), ResumePoint::Start(PipelineStage::Complete));
    }

    #[test]
    fn test_terminal_short_circuits() {
        let mut done = media(0);
        let result = TaskResult::assemble(&done, 10);
        done.mark_completed(result).unwrap();
        assert_eq!(resume_point(&done, 10), ResumePoint::AlreadyCompleted);

        let mut failed = media(0);
        failed.mark_failed("boom").unwrap();
        assert_eq!(resume_point(&failed, 10), ResumePoint::AlreadyFailed);
    }

    #[test]
    fn test_missing_text_forces_rewrite() {
        let mut record = media(1);
        record.apply_update(&TaskUpdate::new().stage(PipelineStage::Generate).prompt(0, Some("p".to_string())));
        assert_eq!(resume_point(&record, 10), ResumePoint::Start(PipelineStage::Rewrite));
    }
}
