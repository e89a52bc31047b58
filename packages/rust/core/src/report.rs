//! Run and per-chapter outcome reporting.

use std::time::Duration;

use serde::Serialize;

use mangaroo_shared::CollectionName;

/// How a single chapter ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterOutcome {
    Succeeded,
    Partial,
    Failed,
}

/// Counters for one chapter.
#[derive(Debug, Clone, Serialize)]
pub struct ChapterReport {
    pub number: u32,
    pub images_found: usize,
    pub images_staged: usize,
    /// Always 0 when no archive is configured.
    pub images_archived: usize,
    /// Reason the chapter failed before any image could be attempted.
    pub error: Option<String>,
    pub outcome: ChapterOutcome,
}

impl ChapterReport {
    pub(crate) fn failed(number: u32, images_found: usize, error: impl ToString) -> Self {
        Self {
            number,
            images_found,
            images_staged: 0,
            images_archived: 0,
            error: Some(error.to_string()),
            outcome: ChapterOutcome::Failed,
        }
    }

    /// Build a report for a chapter whose images were attempted.
    ///
    /// `archived` is `None` when no archive backend is configured, in which
    /// case completeness is judged on staged files instead. A chapter that
    /// found images but completed none of them is `Failed`.
    pub(crate) fn attempted(
        number: u32,
        images_found: usize,
        images_staged: usize,
        archived: Option<usize>,
    ) -> Self {
        let completed = archived.unwrap_or(images_staged);
        let outcome = if images_found == 0 || completed == images_found {
            ChapterOutcome::Succeeded
        } else if completed == 0 {
            ChapterOutcome::Failed
        } else {
            ChapterOutcome::Partial
        };

        Self {
            number,
            images_found,
            images_staged,
            images_archived: archived.unwrap_or(0),
            error: None,
            outcome,
        }
    }
}

/// Overall classification of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestOutcome {
    /// Every chapter succeeded.
    Complete,
    /// At least one chapter failed or was partial.
    Partial,
    /// Stopped by the cancellation signal.
    Cancelled,
}

/// Summary returned by a harvest that was not aborted.
#[derive(Debug, Clone)]
pub struct HarvestResult {
    pub work_id: String,
    pub title: String,
    pub status: String,
    /// Collection the work was (or would have been) archived under.
    pub collection: CollectionName,
    pub chapter_count: u32,
    /// One entry per attempted chapter, ascending.
    pub chapters: Vec<ChapterReport>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl HarvestResult {
    fn count(&self, outcome: ChapterOutcome) -> usize {
        self.chapters.iter().filter(|c| c.outcome == outcome).count()
    }

    pub fn chapters_succeeded(&self) -> usize {
        self.count(ChapterOutcome::Succeeded)
    }

    pub fn chapters_partial(&self) -> usize {
        self.count(ChapterOutcome::Partial)
    }

    pub fn chapters_failed(&self) -> usize {
        self.count(ChapterOutcome::Failed)
    }

    pub fn images_archived(&self) -> usize {
        self.chapters.iter().map(|c| c.images_archived).sum()
    }

    pub fn outcome(&self) -> HarvestOutcome {
        if self.cancelled {
            HarvestOutcome::Cancelled
        } else if self.chapters_succeeded() == self.chapters.len() {
            HarvestOutcome::Complete
        } else {
            HarvestOutcome::Partial
        }
    }
}
