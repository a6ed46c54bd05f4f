//! Quill engagement library.
//!
//! Threaded comments, likes with denormalized counters, chapter read progress, notification
//! fan-out with per-type preferences, push relay, and retention cleanup, all written against an
//! injected [`Store`](store::Store) capability.

pub mod comments;
pub mod engagement;
pub mod errors;
pub mod follows;
pub mod id;
pub mod janitor;
pub mod keys;
pub mod live;
pub mod notifications;
pub mod profiles;
pub mod progress;
pub mod push;
pub mod runtime;
pub mod services;
pub mod store;
pub mod triggers;
pub mod types;
pub mod validators;

pub use comments::{AuthoredComment, CommentThread, NewComment, ThreadEntry};
pub use engagement::{CounterMode, EngagementCounter, LikeRequest, LikeState};
pub use errors::*;
pub use follows::FollowGraph;
pub use janitor::{
    AccountDirectory, JanitorJob, JanitorTask, LocalObjectStorage, ObjectStorage, PurgeReport, RetentionJanitor,
    RetentionPolicy, StoreAccountDirectory,
};
pub use live::LiveView;
pub use notifications::{InboxEntry, NotificationFanout, NotificationInbox, PreferenceStore};
pub use progress::{ReadCountTrigger, ReadProgressTracker};
pub use push::{DeviceRegistry, DispatchOutcome, HttpPushGateway, PushDispatcher, PushGateway, PushRelayTrigger};
pub use services::Services;
pub use store::{InMemoryStore, RedisStore, Store, StoreExt};
pub use triggers::{ChangeHandler, Schedule, ScheduledJob, Scheduler, TriggerRuntime};
pub use types::*;

// Re-export redis types so users don't need to depend on a specific redis version
pub use redis;
pub use redis::aio::ConnectionManager;

/// Delete all keys matching a pattern (for test cleanup).
///
/// This performs a SCAN + DEL operation to safely delete keys without blocking Redis.
pub async fn cleanup_pattern(conn: &mut ConnectionManager, pattern: &str) -> Result<u64, StoreError> {
    const SCAN_COUNT: usize = 1000;
    let mut cursor: u64 = 0;
    let mut total_deleted: u64 = 0;

    loop {
        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_COUNT)
            .query_async(conn)
            .await?;

        if !keys.is_empty() {
            let deleted: u64 = redis::cmd("DEL").arg(&keys).query_async(conn).await?;
            total_deleted += deleted;
        }

        cursor = next_cursor;
        if cursor == 0 {
            break;
        }
    }

    Ok(total_deleted)
}
