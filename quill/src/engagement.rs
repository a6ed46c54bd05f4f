//! Likes and the denormalized counters that mirror them.
//!
//! A like is a `likes/{contentId}_{userId}` document; its existence is the liked state. Each
//! toggle also moves the content's own `likeCount` and, when a book is given, the book's
//! `totalLikes`. By default those counter writes are independent increments issued after the like
//! document is written ([`CounterMode::BestEffort`]): a failure between them leaves the counters
//! drifting and is only logged. [`CounterMode::Atomic`] writes the like and both counters in one
//! plan instead.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;

use crate::errors::{EngagementError, EngagementResult, StoreError};
use crate::keys::like_id;
use crate::live::{FieldWatch, LiveView};
use crate::notifications::NotificationFanout;
use crate::store::{Query, Store, StoreExt, WritePlan};
use crate::types::{ContentRef, Like, NotificationPayload, NotificationType, collections, counters};

/// How counter updates are applied relative to the like document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CounterMode {
    /// Like document first, then one independent increment per counter. Counter failures are
    /// logged and swallowed.
    #[default]
    BestEffort,
    /// Like document and counters in a single atomic plan.
    Atomic,
}

/// Everything `toggle_like` needs to know about the liked content.
#[derive(Debug, Clone, PartialEq)]
pub struct LikeRequest {
    pub content: ContentRef,
    pub user_id: String,
    pub book_id: Option<String>,
    pub chapter_id: Option<String>,
    pub author_id: Option<String>,
    pub title: Option<String>,
}

impl LikeRequest {
    pub fn new(content: ContentRef, user_id: impl Into<String>) -> Self {
        Self {
            content,
            user_id: user_id.into(),
            book_id: None,
            chapter_id: None,
            author_id: None,
            title: None,
        }
    }

    pub fn in_book(mut self, book_id: impl Into<String>) -> Self {
        self.book_id = Some(book_id.into());
        self
    }

    pub fn in_chapter(mut self, chapter_id: impl Into<String>) -> Self {
        self.chapter_id = Some(chapter_id.into());
        self
    }

    /// Author and title used for the `like` notification on chapters.
    pub fn by_author(mut self, author_id: impl Into<String>, title: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self.title = Some(title.into());
        self
    }
}

/// What a like button shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeState {
    pub liked: bool,
    pub count: usize,
}

#[derive(Clone)]
pub struct EngagementCounter {
    store: Arc<dyn Store>,
    fanout: NotificationFanout,
    mode: CounterMode,
}

impl EngagementCounter {
    pub fn new(store: Arc<dyn Store>, fanout: NotificationFanout) -> Self {
        Self {
            store,
            fanout,
            mode: CounterMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: CounterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> CounterMode {
        self.mode
    }

    /// Flip `request.user_id`'s like on the content and return the new liked state. `actor_id`
    /// is the authenticated caller and must be the liking user.
    pub async fn toggle_like(&self, actor_id: &str, request: &LikeRequest) -> EngagementResult<bool> {
        if request.user_id.is_empty() {
            return Err(EngagementError::invalid("userId", "must not be empty"));
        }
        if actor_id != request.user_id {
            return Err(EngagementError::unauthorized(
                actor_id,
                format!("{}/{}", collections::LIKES, like_id(&request.content.to_string(), &request.user_id)),
            ));
        }

        let content_id = request.content.to_string();
        let id = like_id(&content_id, &request.user_id);
        if self.store.exists(collections::LIKES, &id).await? {
            self.unlike(&id, request).await?;
            return Ok(false);
        }

        let like = Like {
            id,
            content_id,
            user_id: request.user_id.clone(),
            book_id: request.book_id.clone(),
            created_at: Utc::now(),
        };
        if !self.like(&like, request).await? {
            debug!("{} was liked concurrently; leaving counters alone", like.id);
            return Ok(true);
        }
        self.notify_author(request).await;
        Ok(true)
    }

    pub async fn is_liked(&self, content: &ContentRef, user_id: &str) -> EngagementResult<bool> {
        Ok(self
            .store
            .exists(collections::LIKES, &like_id(&content.to_string(), user_id))
            .await?)
    }

    /// One-shot read of the like button state; the count is the number of like documents.
    pub async fn like_state(&self, content: &ContentRef, user_id: &str) -> EngagementResult<LikeState> {
        like_state(self.store.as_ref(), &content.to_string(), user_id).await
    }

    pub fn observe_like(&self, content: &ContentRef, user_id: &str) -> LiveView<LikeState> {
        let store = self.store.clone();
        let content_id = content.to_string();
        let user = user_id.to_string();
        LiveView::spawn(
            self.store.clone(),
            FieldWatch::new(collections::LIKES, "contentId", content_id.clone()),
            move || {
                let store = store.clone();
                let content_id = content_id.clone();
                let user = user.clone();
                async move { like_state(store.as_ref(), &content_id, &user).await }
            },
        )
    }

    /// Returns `false` when someone else created the same like first.
    async fn like(&self, like: &Like, request: &LikeRequest) -> EngagementResult<bool> {
        let plan = WritePlan::new().create(like)?;
        let plan = match self.mode {
            CounterMode::BestEffort => plan,
            CounterMode::Atomic => with_counters(plan, request, 1),
        };
        match self.store.commit(plan).await {
            Ok(_) => {}
            Err(StoreError::AlreadyExists { .. }) => return Ok(false),
            Err(err) => return Err(err.into()),
        }
        if self.mode == CounterMode::BestEffort {
            self.adjust_counters(request, 1).await;
        }
        Ok(true)
    }

    async fn unlike(&self, id: &str, request: &LikeRequest) -> EngagementResult<()> {
        let plan = WritePlan::new()
            .require_exists(collections::LIKES, id)
            .delete(collections::LIKES, id);
        let plan = match self.mode {
            CounterMode::BestEffort => plan,
            CounterMode::Atomic => with_counters(plan, request, -1),
        };
        if !self.store.commit(plan).await?.was_applied() {
            debug!("{id} was removed concurrently; leaving counters alone");
            return Ok(());
        }
        if self.mode == CounterMode::BestEffort {
            self.adjust_counters(request, -1).await;
        }
        Ok(())
    }

    async fn adjust_counters(&self, request: &LikeRequest, delta: i64) {
        let content = &request.content;
        let targets = std::iter::once((content.collection(), content.document_id(), content.counter_field()))
            .chain(
                request
                    .book_id
                    .as_deref()
                    .map(|book_id| (collections::BOOKS, book_id, counters::BOOK_LIKES)),
            );
        for (collection, id, field) in targets {
            match self.store.increment(collection, id, field, delta).await {
                Ok(true) => {}
                Ok(false) => debug!("{collection}/{id} does not exist; {field} not adjusted"),
                Err(err) => warn!("failed to adjust {collection}/{id}.{field} by {delta}: {err}"),
            }
        }
    }

    async fn notify_author(&self, request: &LikeRequest) {
        let (ContentRef::Chapter(chapter_id), Some(author_id), Some(title)) =
            (&request.content, &request.author_id, &request.title)
        else {
            return;
        };
        let payload = NotificationPayload::text(format!(" liked your chapter \"{title}\""))
            .chapter(request.chapter_id.clone().unwrap_or_else(|| chapter_id.clone()))
            .book_opt(request.book_id.clone());
        self.fanout
            .notify_or_log(author_id, &request.user_id, NotificationType::Like, payload)
            .await;
    }
}

fn with_counters(plan: WritePlan, request: &LikeRequest, delta: i64) -> WritePlan {
    let content = &request.content;
    let plan = plan.increment(content.collection(), content.document_id(), content.counter_field(), delta);
    match &request.book_id {
        Some(book_id) => plan.increment(collections::BOOKS, book_id.clone(), counters::BOOK_LIKES, delta),
        None => plan,
    }
}

async fn like_state(store: &dyn Store, content_id: &str, user_id: &str) -> EngagementResult<LikeState> {
    let likes: Vec<Like> = store
        .find(&Query::new(collections::LIKES).filter_eq("contentId", content_id))
        .await?;
    Ok(LikeState {
        liked: likes.iter().any(|like| like.user_id == user_id),
        count: likes.len(),
    })
}
