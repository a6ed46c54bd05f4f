//! Two-level comment threads stored as a flat `comments` collection.
//!
//! A comment with no `parentId` is top-level; a reply points at a top-level comment. The tree is
//! never stored: [`CommentThread::load_thread`] groups a chapter's comments by `parentId` on
//! every read.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;

use crate::errors::{EngagementError, EngagementResult};
use crate::id::generate_document_id;
use crate::live::{FieldWatch, LiveView};
use crate::notifications::NotificationFanout;
use crate::profiles::load_authors;
use crate::store::{Query, SortOrder, Store, StoreExt, WritePlan};
use crate::types::{AuthorProfile, ChapterInfo, Comment, NotificationPayload, NotificationType, collections};

/// Input for [`CommentThread::add_comment`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewComment {
    pub chapter_id: String,
    pub author_id: String,
    pub text: String,
    pub sentence_id: Option<String>,
    pub parent_id: Option<String>,
}

impl NewComment {
    pub fn new(chapter_id: impl Into<String>, author_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chapter_id: chapter_id.into(),
            author_id: author_id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Anchor the comment to a sentence of the chapter.
    pub fn on_sentence(mut self, sentence_id: impl Into<String>) -> Self {
        self.sentence_id = Some(sentence_id.into());
        self
    }

    pub fn reply_to(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// A comment with its author's projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoredComment {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: AuthorProfile,
}

/// A top-level comment and its replies, both in creation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEntry {
    #[serde(flatten)]
    pub comment: AuthoredComment,
    pub replies: Vec<AuthoredComment>,
}

impl ThreadEntry {
    pub fn id(&self) -> &str {
        &self.comment.comment.id
    }
}

#[derive(Clone)]
pub struct CommentThread {
    store: Arc<dyn Store>,
    fanout: NotificationFanout,
}

impl CommentThread {
    pub fn new(store: Arc<dyn Store>, fanout: NotificationFanout) -> Self {
        Self { store, fanout }
    }

    /// Post a comment or a reply and notify the chapter author (comment) or the parent's author
    /// (reply). Returns the new comment id.
    ///
    /// Replies must target an existing top-level comment on the same chapter; anything deeper is
    /// rejected so the tree never exceeds two levels.
    pub async fn add_comment(&self, input: NewComment) -> EngagementResult<String> {
        if input.chapter_id.is_empty() {
            return Err(EngagementError::invalid("chapterId", "must not be empty"));
        }
        if input.author_id.is_empty() {
            return Err(EngagementError::invalid("authorId", "must not be empty"));
        }
        if input.text.trim().is_empty() {
            return Err(EngagementError::invalid("text", "must not be empty"));
        }

        let parent = match &input.parent_id {
            Some(parent_id) => Some(self.reply_target(parent_id, &input.chapter_id).await?),
            None => None,
        };

        let comment = Comment {
            id: generate_document_id(),
            chapter_id: input.chapter_id,
            author_id: input.author_id,
            text: input.text,
            sentence_id: input.sentence_id,
            parent_id: input.parent_id,
            created_at: Utc::now(),
        };
        self.store.insert(&comment).await?;
        debug!("comment {} added to chapter {}", comment.id, comment.chapter_id);

        self.notify_for(&comment, parent.as_ref()).await;
        Ok(comment.id)
    }

    /// Delete a comment owned by `requester_id`. Deleting a top-level comment removes its replies
    /// first, in the same write. Returns the number of comments removed.
    pub async fn delete_comment(&self, comment_id: &str, requester_id: &str) -> EngagementResult<usize> {
        let comment: Comment = self
            .store
            .fetch(comment_id)
            .await?
            .ok_or_else(|| EngagementError::not_found(collections::COMMENTS, comment_id))?;
        if comment.author_id != requester_id {
            return Err(EngagementError::unauthorized(
                requester_id,
                format!("{}/{comment_id}", collections::COMMENTS),
            ));
        }

        let mut plan = WritePlan::new();
        if !comment.is_reply() {
            let replies = self
                .store
                .query(&Query::new(collections::COMMENTS).filter_eq("parentId", comment_id))
                .await?;
            for reply in replies {
                plan = plan.delete(collections::COMMENTS, reply.id);
            }
        }
        let plan = plan.delete(collections::COMMENTS, comment_id);
        let removed = plan.ops.len();
        self.store.commit(plan).await?;
        debug!("deleted comment {comment_id} and {} repl(ies)", removed - 1);
        Ok(removed)
    }

    /// Current thread of a chapter.
    pub async fn load_thread(&self, chapter_id: &str) -> EngagementResult<Vec<ThreadEntry>> {
        load_thread(self.store.as_ref(), chapter_id).await
    }

    /// Live thread of a chapter, re-read whenever one of its comments changes.
    pub fn observe_thread(&self, chapter_id: &str) -> LiveView<Vec<ThreadEntry>> {
        let store = self.store.clone();
        let chapter = chapter_id.to_string();
        LiveView::spawn(
            self.store.clone(),
            FieldWatch::new(collections::COMMENTS, "chapterId", chapter_id),
            move || {
                let store = store.clone();
                let chapter = chapter.clone();
                async move { load_thread(store.as_ref(), &chapter).await }
            },
        )
    }

    async fn reply_target(&self, parent_id: &str, chapter_id: &str) -> EngagementResult<Comment> {
        let parent: Comment = self
            .store
            .fetch(parent_id)
            .await?
            .ok_or_else(|| EngagementError::not_found(collections::COMMENTS, parent_id))?;
        if parent.is_reply() {
            return Err(EngagementError::invalid("parentId", "replies cannot be replied to"));
        }
        if parent.chapter_id != chapter_id {
            return Err(EngagementError::invalid("parentId", "parent belongs to another chapter"));
        }
        Ok(parent)
    }

    async fn notify_for(&self, comment: &Comment, parent: Option<&Comment>) {
        let chapter = match self
            .store
            .fetch_as::<ChapterInfo>(collections::CHAPTERS, &comment.chapter_id)
            .await
        {
            Ok(chapter) => chapter,
            Err(err) => {
                warn!("could not load chapter {} for comment notification: {err}", comment.chapter_id);
                None
            }
        };
        let book_id = chapter.as_ref().and_then(|chapter| chapter.book_id.clone());

        let (recipient, kind) = match parent {
            Some(parent) => (Some(parent.author_id.clone()), NotificationType::Reply),
            None => (
                chapter.and_then(|chapter| chapter.author_id),
                NotificationType::NewComment,
            ),
        };
        let Some(recipient) = recipient else {
            debug!("no recipient for comment {}", comment.id);
            return;
        };

        let payload = NotificationPayload::text(comment.text.clone())
            .chapter(comment.chapter_id.clone())
            .book_opt(book_id)
            .comment(comment.id.clone());
        self.fanout
            .notify_or_log(&recipient, &comment.author_id, kind, payload)
            .await;
    }
}

async fn load_thread(store: &dyn Store, chapter_id: &str) -> EngagementResult<Vec<ThreadEntry>> {
    let query = Query::new(collections::COMMENTS)
        .filter_eq("chapterId", chapter_id)
        .order_by("createdAt", SortOrder::Asc);
    let comments: Vec<Comment> = store.find(&query).await?;
    let authors = load_authors(store, comments.iter().map(|c| c.author_id.as_str())).await?;
    Ok(assemble_thread(comments, &authors))
}

/// Group creation-ordered comments into top-level entries with their replies. Replies whose
/// parent is missing or is itself a reply are left out.
pub fn assemble_thread(comments: Vec<Comment>, authors: &HashMap<String, AuthorProfile>) -> Vec<ThreadEntry> {
    let authored = |comment: Comment| {
        let author = authors
            .get(&comment.author_id)
            .cloned()
            .unwrap_or_else(AuthorProfile::unknown);
        AuthoredComment { comment, author }
    };

    let (top_level, replies): (Vec<Comment>, Vec<Comment>) = comments.into_iter().partition(|c| !c.is_reply());
    let mut grouped: HashMap<String, Vec<AuthoredComment>> = HashMap::new();
    for reply in replies {
        if let Some(parent_id) = reply.parent_id.clone() {
            grouped.entry(parent_id).or_default().push(authored(reply));
        }
    }

    let entries: Vec<ThreadEntry> = top_level
        .into_iter()
        .map(|comment| {
            let replies = grouped.remove(&comment.id).unwrap_or_default();
            ThreadEntry {
                comment: authored(comment),
                replies,
            }
        })
        .collect();

    let orphaned: usize = grouped.values().map(Vec::len).sum();
    if orphaned > 0 {
        warn!("dropped {orphaned} repl(ies) without a top-level parent");
    }
    entries
}
