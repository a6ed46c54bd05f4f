use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use crate::errors::EngagementResult;
use crate::follows::follower_ids;
use crate::id::generate_document_id;
use crate::store::{Store, StoreExt};
use crate::types::{Notification, NotificationPayload, NotificationType};

/// Lead-in for `chapter` announcements; the chapter title follows.
pub const CHAPTER_TEXT: &str = " published a new chapter: ";
/// Lead-in for `book` announcements; the book title follows.
pub const BOOK_TEXT: &str = " published a new book: ";

/// Creates notification records. Delivery is a separate concern handled by the push relay, so a
/// record is written regardless of the recipient's preferences.
#[derive(Clone)]
pub struct NotificationFanout {
    store: Arc<dyn Store>,
}

impl NotificationFanout {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a notification for `recipient_id`. Returns `None` without writing when the
    /// recipient is empty or is the sender.
    pub async fn notify(
        &self,
        recipient_id: &str,
        sender_id: &str,
        kind: NotificationType,
        payload: NotificationPayload,
    ) -> EngagementResult<Option<Notification>> {
        if recipient_id.is_empty() || recipient_id == sender_id {
            debug!("skipping {kind} notification from {sender_id} to {recipient_id:?}");
            return Ok(None);
        }

        let notification = Notification {
            id: generate_document_id(),
            recipient_id: recipient_id.to_string(),
            sender_id: sender_id.to_string(),
            kind,
            text: payload.text,
            chapter_id: payload.chapter_id,
            book_id: payload.book_id,
            comment_id: payload.comment_id,
            read: false,
            created_at: Utc::now(),
        };
        self.store.insert(&notification).await?;
        debug!("recorded {kind} notification {} for {recipient_id}", notification.id);
        Ok(Some(notification))
    }

    /// [`notify`](Self::notify) for side effects of an already-successful action: failures are
    /// logged, never returned.
    pub async fn notify_or_log(
        &self,
        recipient_id: &str,
        sender_id: &str,
        kind: NotificationType,
        payload: NotificationPayload,
    ) -> Option<Notification> {
        match self.notify(recipient_id, sender_id, kind, payload).await {
            Ok(notification) => notification,
            Err(err) => {
                warn!("failed to record {kind} notification for {recipient_id}: {err}");
                None
            }
        }
    }

    /// Notify every follower of `author_id`. A failure for one follower does not stop the rest;
    /// returns the number of notifications recorded.
    pub async fn notify_followers(
        &self,
        author_id: &str,
        kind: NotificationType,
        payload: NotificationPayload,
    ) -> EngagementResult<usize> {
        let followers = follower_ids(self.store.as_ref(), author_id).await?;
        let mut recorded = 0;
        for follower in &followers {
            if self
                .notify_or_log(follower, author_id, kind, payload.clone())
                .await
                .is_some()
            {
                recorded += 1;
            }
        }
        info!(
            "fanned out {kind} from {author_id} to {recorded}/{} follower(s)",
            followers.len()
        );
        Ok(recorded)
    }

    pub async fn announce_chapter(
        &self,
        author_id: &str,
        book_id: &str,
        chapter_id: &str,
        title: &str,
    ) -> EngagementResult<usize> {
        let payload = NotificationPayload::text(format!("{CHAPTER_TEXT}{title}"))
            .chapter(chapter_id)
            .book(book_id);
        self.notify_followers(author_id, NotificationType::Chapter, payload).await
    }

    pub async fn announce_book(&self, author_id: &str, book_id: &str, title: &str) -> EngagementResult<usize> {
        let payload = NotificationPayload::text(format!("{BOOK_TEXT}{title}")).book(book_id);
        self.notify_followers(author_id, NotificationType::Book, payload).await
    }
}
