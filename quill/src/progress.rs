//! Per-(user, chapter) read markers and the trigger that keeps read counters in step with them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};

use crate::errors::{EngagementError, EngagementResult};
use crate::keys::{progress_id, receipt_id};
use crate::store::{ChangeEvent, CommitOutcome, Store, StoreExt, WritePlan};
use crate::triggers::ChangeHandler;
use crate::types::{ChapterProgress, ProgressStatus, TriggerReceipt, collections, counters};

/// Receipt namespace of [`ReadCountTrigger`].
pub const READ_COUNT_TRIGGER: &str = "read_counts";

/// Tracks the `unset → partial ⇄ true` read state of chapters.
#[derive(Clone)]
pub struct ReadProgressTracker {
    store: Arc<dyn Store>,
}

impl ReadProgressTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record that the user opened the chapter. Creates a `partial` marker the first time and
    /// does nothing afterwards; returns whether a marker was created.
    pub async fn ensure_opened(&self, user_id: &str, book_id: &str, chapter_id: &str) -> EngagementResult<bool> {
        require("userId", user_id)?;
        require("bookId", book_id)?;
        require("chapterId", chapter_id)?;

        let progress = ChapterProgress {
            id: progress_id(user_id, chapter_id),
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            chapter_id: chapter_id.to_string(),
            status: ProgressStatus::Partial,
            updated_at: Utc::now(),
        };
        let plan = WritePlan::new()
            .require_absent(collections::PROGRESS, progress.id.clone())
            .create(&progress)?;
        let created = self.store.commit(plan).await?.was_applied();
        if created {
            debug!("{user_id} opened chapter {chapter_id} for the first time");
        }
        Ok(created)
    }

    /// Flip `true ⇄ partial`. Without a marker this is a no-op returning `None`.
    pub async fn toggle_read(&self, user_id: &str, chapter_id: &str) -> EngagementResult<Option<ProgressStatus>> {
        let id = progress_id(user_id, chapter_id);
        let Some(mut progress) = self.store.fetch::<ChapterProgress>(&id).await? else {
            debug!("toggle_read ignored: {user_id} never opened {chapter_id}");
            return Ok(None);
        };
        progress.status = progress.status.toggled();
        progress.updated_at = Utc::now();

        let plan = WritePlan::new()
            .require_exists(collections::PROGRESS, id)
            .put(&progress)?;
        match self.store.commit(plan).await? {
            CommitOutcome::Applied(_) => Ok(Some(progress.status)),
            CommitOutcome::Skipped => Ok(None),
        }
    }

    pub async fn status(&self, user_id: &str, chapter_id: &str) -> EngagementResult<ProgressStatus> {
        Ok(self
            .store
            .fetch::<ChapterProgress>(&progress_id(user_id, chapter_id))
            .await?
            .map(|progress| progress.status)
            .unwrap_or_default())
    }
}

fn require(field: &'static str, value: &str) -> EngagementResult<()> {
    if value.is_empty() {
        return Err(EngagementError::invalid(field, "must not be empty"));
    }
    Ok(())
}

/// Signed change in "read" markers implied by one write of a progress record.
pub fn read_delta(before: Option<ProgressStatus>, after: Option<ProgressStatus>) -> i64 {
    let was_read = before.is_some_and(ProgressStatus::is_read);
    let is_read = after.is_some_and(ProgressStatus::is_read);
    match (was_read, is_read) {
        (false, true) => 1,
        (true, false) => -1,
        _ => 0,
    }
}

/// On-write trigger for `user_chapter_progress`: applies the read delta to the chapter's
/// `readCount` and the book's `totalReads` in one plan, together with a receipt for the event so
/// a redelivered event changes nothing.
pub struct ReadCountTrigger {
    store: Arc<dyn Store>,
}

impl ReadCountTrigger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

fn decode_progress(state: Option<&serde_json::Value>) -> EngagementResult<Option<ChapterProgress>> {
    state
        .map(|value| serde_json::from_value::<ChapterProgress>(value.clone()))
        .transpose()
        .map_err(|err| EngagementError::invalid("progress", err.to_string()))
}

#[async_trait]
impl ChangeHandler for ReadCountTrigger {
    fn name(&self) -> &'static str {
        READ_COUNT_TRIGGER
    }

    fn collection(&self) -> &'static str {
        collections::PROGRESS
    }

    async fn handle(&self, event: &ChangeEvent) -> EngagementResult<()> {
        let before = decode_progress(event.before.as_ref())?;
        let after = decode_progress(event.after.as_ref())?;
        let delta = read_delta(
            before.as_ref().map(|progress| progress.status),
            after.as_ref().map(|progress| progress.status),
        );
        if delta == 0 {
            return Ok(());
        }
        let Some(target) = after.or(before) else {
            return Ok(());
        };

        let receipt = TriggerReceipt {
            id: receipt_id(READ_COUNT_TRIGGER, &event.event_id),
            trigger: READ_COUNT_TRIGGER.to_string(),
            event_id: event.event_id.clone(),
            created_at: Utc::now(),
        };
        let plan = WritePlan::new()
            .require_absent(collections::TRIGGER_RECEIPTS, receipt.id.clone())
            .create(&receipt)?
            .increment(collections::CHAPTERS, target.chapter_id.clone(), counters::CHAPTER_READS, delta)
            .increment(collections::BOOKS, target.book_id.clone(), counters::BOOK_READS, delta);

        match self.store.commit(plan).await? {
            CommitOutcome::Applied(_) => info!(
                "read counts of chapter {} / book {} moved by {delta}",
                target.chapter_id, target.book_id
            ),
            CommitOutcome::Skipped => debug!("event {} already applied to read counts", event.event_id),
        }
        Ok(())
    }
}
