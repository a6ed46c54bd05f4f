//! Document shapes stored by the engagement pipeline.
//!
//! Every document carries its own `id` and is stored with camelCase field names. Timestamps are
//! persisted as epoch milliseconds so that range filters compare numerically.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::errors::EngagementError;

/// Collection names shared with the rest of the platform.
pub mod collections {
    pub const COMMENTS: &str = "comments";
    pub const LIKES: &str = "likes";
    pub const PROGRESS: &str = "user_chapter_progress";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const PREFERENCES: &str = "notification_preferences";
    pub const FOLLOWS: &str = "follows";
    pub const BOOKS: &str = "books";
    pub const CHAPTERS: &str = "chapters";
    pub const USERS: &str = "users";
    pub const USERNAMES: &str = "usernames";
    pub const ACCOUNTS: &str = "accounts";
    pub const TRIGGER_RECEIPTS: &str = "trigger_receipts";
}

/// Denormalized counter fields on pre-existing chapter and book documents.
pub mod counters {
    pub const CHAPTER_LIKES: &str = "likeCount";
    pub const CHAPTER_READS: &str = "readCount";
    pub const COMMENT_LIKES: &str = "likeCount";
    pub const BOOK_LIKES: &str = "totalLikes";
    pub const BOOK_READS: &str = "totalReads";
}

/// A typed document living in a named collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub chapter_id: String,
    pub author_id: String,
    pub text: String,
    #[serde(default)]
    pub sentence_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }
}

impl Document for Comment {
    const COLLECTION: &'static str = collections::COMMENTS;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Likeable content, encoded as a type-prefixed content id (`chapter:<id>`, `comment:<id>`,
/// `reply:<id>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentRef {
    Chapter(String),
    Comment(String),
    Reply(String),
}

impl ContentRef {
    /// Collection holding the content's own `likeCount`.
    pub fn collection(&self) -> &'static str {
        match self {
            ContentRef::Chapter(_) => collections::CHAPTERS,
            ContentRef::Comment(_) | ContentRef::Reply(_) => collections::COMMENTS,
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            ContentRef::Chapter(id) | ContentRef::Comment(id) | ContentRef::Reply(id) => id,
        }
    }

    pub fn counter_field(&self) -> &'static str {
        match self {
            ContentRef::Chapter(_) => counters::CHAPTER_LIKES,
            ContentRef::Comment(_) | ContentRef::Reply(_) => counters::COMMENT_LIKES,
        }
    }

    pub fn is_chapter(&self) -> bool {
        matches!(self, ContentRef::Chapter(_))
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRef::Chapter(id) => write!(f, "chapter:{id}"),
            ContentRef::Comment(id) => write!(f, "comment:{id}"),
            ContentRef::Reply(id) => write!(f, "reply:{id}"),
        }
    }
}

impl FromStr for ContentRef {
    type Err = EngagementError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (kind, id) = raw
            .split_once(':')
            .ok_or_else(|| EngagementError::invalid("contentId", format!("`{raw}` has no type prefix")))?;
        if id.is_empty() {
            return Err(EngagementError::invalid("contentId", "content id is empty"));
        }
        match kind {
            "chapter" => Ok(ContentRef::Chapter(id.to_string())),
            "comment" => Ok(ContentRef::Comment(id.to_string())),
            "reply" => Ok(ContentRef::Reply(id.to_string())),
            other => Err(EngagementError::invalid("contentId", format!("unknown content type `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub id: String,
    pub content_id: String,
    pub user_id: String,
    #[serde(default)]
    pub book_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Document for Like {
    const COLLECTION: &'static str = collections::LIKES;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Per-(user, chapter) read marker. `Unset` is never persisted; it describes a missing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProgressStatus {
    #[default]
    #[serde(rename = "unset")]
    Unset,
    #[serde(rename = "partial")]
    Partial,
    #[serde(rename = "true")]
    Read,
}

impl ProgressStatus {
    /// The status an explicit toggle moves to. `Unset` is never re-entered.
    pub fn toggled(self) -> Self {
        match self {
            ProgressStatus::Read => ProgressStatus::Partial,
            ProgressStatus::Partial | ProgressStatus::Unset => ProgressStatus::Read,
        }
    }

    pub fn is_read(self) -> bool {
        self == ProgressStatus::Read
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterProgress {
    pub id: String,
    pub user_id: String,
    pub book_id: String,
    pub chapter_id: String,
    pub status: ProgressStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Document for ChapterProgress {
    const COLLECTION: &'static str = collections::PROGRESS;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    NewComment,
    Reply,
    Follow,
    Like,
    Book,
    Chapter,
}

impl NotificationType {
    pub const ALL: [NotificationType; 6] = [
        NotificationType::NewComment,
        NotificationType::Reply,
        NotificationType::Follow,
        NotificationType::Like,
        NotificationType::Book,
        NotificationType::Chapter,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            NotificationType::NewComment => "new_comment",
            NotificationType::Reply => "reply",
            NotificationType::Follow => "follow",
            NotificationType::Like => "like",
            NotificationType::Book => "book",
            NotificationType::Chapter => "chapter",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = EngagementError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == raw)
            .ok_or_else(|| EngagementError::invalid("type", format!("unknown notification type `{raw}`")))
    }
}

/// Correlation fields carried by a notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationPayload {
    pub text: String,
    pub chapter_id: Option<String>,
    pub book_id: Option<String>,
    pub comment_id: Option<String>,
}

impl NotificationPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn chapter(mut self, chapter_id: impl Into<String>) -> Self {
        self.chapter_id = Some(chapter_id.into());
        self
    }

    pub fn book(mut self, book_id: impl Into<String>) -> Self {
        self.book_id = Some(book_id.into());
        self
    }

    pub fn book_opt(mut self, book_id: Option<String>) -> Self {
        self.book_id = book_id;
        self
    }

    pub fn comment(mut self, comment_id: impl Into<String>) -> Self {
        self.comment_id = Some(comment_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    pub read: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Document for Notification {
    const COLLECTION: &'static str = collections::NOTIFICATIONS;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Per-user opt-outs keyed by notification type. Absent keys mean "enabled".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences(pub BTreeMap<String, bool>);

/// Key older clients wrote for `new_comment`.
const LEGACY_COMMENT_KEY: &str = "comment";

impl NotificationPreferences {
    pub fn is_enabled(&self, kind: NotificationType) -> bool {
        if let Some(enabled) = self.0.get(kind.as_str()) {
            return *enabled;
        }
        if kind == NotificationType::NewComment
            && let Some(enabled) = self.0.get(LEGACY_COMMENT_KEY)
        {
            return *enabled;
        }
        true
    }

    pub fn set(&mut self, kind: NotificationType, enabled: bool) {
        self.0.insert(kind.as_str().to_string(), enabled);
    }

    /// Effective value for every known type.
    pub fn resolved(&self) -> Vec<(NotificationType, bool)> {
        NotificationType::ALL
            .into_iter()
            .map(|kind| (kind, self.is_enabled(kind)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Follow {
    pub id: String,
    pub follower_id: String,
    pub followee_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub followed_at: DateTime<Utc>,
}

impl Document for Follow {
    const COLLECTION: &'static str = collections::FOLLOWS;

    fn id(&self) -> &str {
        &self.id
    }
}

/// The subset of a `users` document the pipeline reads. Field names follow the documents the
/// mobile app writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub id: String,
    pub username: Option<String>,
    #[serde(rename = "photoURL", alias = "avatarUrl")]
    pub avatar_url: Option<String>,
    #[serde(rename = "fcmToken", alias = "pushToken")]
    pub push_token: Option<String>,
}

/// Lightweight author projection attached to comments and inbox entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorProfile {
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Shown for authors whose profile document is missing.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

impl AuthorProfile {
    pub fn unknown() -> Self {
        Self {
            username: UNKNOWN_AUTHOR.to_string(),
            avatar_url: None,
        }
    }
}

impl From<UserProfile> for AuthorProfile {
    fn from(profile: UserProfile) -> Self {
        Self {
            username: profile.username.unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            avatar_url: profile.avatar_url,
        }
    }
}

/// The subset of a `chapters` document the pipeline reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterInfo {
    pub id: String,
    pub book_id: Option<String>,
    pub author_id: Option<String>,
    pub title: Option<String>,
    pub like_count: i64,
    pub read_count: i64,
}

/// The subset of a `books` document the pipeline reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookInfo {
    pub id: String,
    pub author_id: Option<String>,
    pub title: Option<String>,
    pub total_likes: i64,
    pub total_reads: i64,
}

/// An identity as reported by the account directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub email_verified: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Document for AccountRecord {
    const COLLECTION: &'static str = collections::ACCOUNTS;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Marker a trigger writes, in the same transaction as its effect, for each event it applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerReceipt {
    pub id: String,
    pub trigger: String,
    pub event_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Document for TriggerReceipt {
    const COLLECTION: &'static str = collections::TRIGGER_RECEIPTS;

    fn id(&self) -> &str {
        &self.id
    }
}
