use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::errors::{EngagementError, EngagementResult, StoreError};
use crate::keys::follow_id;
use crate::notifications::NotificationFanout;
use crate::store::{Query, Store, StoreExt};
use crate::types::{Follow, NotificationPayload, NotificationType, collections};

/// Text appended to the follower's display name in the `follow` notification.
const FOLLOW_TEXT: &str = " started following you";

/// Ids of everyone following `user_id`.
pub async fn follower_ids(store: &dyn Store, user_id: &str) -> Result<Vec<String>, StoreError> {
    let query = Query::new(collections::FOLLOWS).filter_eq("followeeId", user_id);
    let follows = store.find::<Follow>(&query).await?;
    Ok(follows.into_iter().map(|follow| follow.follower_id).collect())
}

/// Directed follower → followee relation, stored flat as `follows/{followerId}_{followeeId}`.
#[derive(Clone)]
pub struct FollowGraph {
    store: Arc<dyn Store>,
    fanout: NotificationFanout,
}

impl FollowGraph {
    pub fn new(store: Arc<dyn Store>, fanout: NotificationFanout) -> Self {
        Self { store, fanout }
    }

    /// Follow `followee_id`. Re-following is a no-op and does not notify again.
    pub async fn follow(&self, follower_id: &str, followee_id: &str) -> EngagementResult<()> {
        validate_pair(follower_id, followee_id)?;

        let id = follow_id(follower_id, followee_id);
        if self.store.exists(collections::FOLLOWS, &id).await? {
            debug!("{follower_id} already follows {followee_id}");
            return Ok(());
        }
        let follow = Follow {
            id,
            follower_id: follower_id.to_string(),
            followee_id: followee_id.to_string(),
            followed_at: Utc::now(),
        };
        self.store.put(&follow).await?;

        self.fanout
            .notify_or_log(
                followee_id,
                follower_id,
                NotificationType::Follow,
                NotificationPayload::text(FOLLOW_TEXT),
            )
            .await;
        Ok(())
    }

    /// Returns whether a relation was removed.
    pub async fn unfollow(&self, follower_id: &str, followee_id: &str) -> EngagementResult<bool> {
        validate_pair(follower_id, followee_id)?;
        Ok(self
            .store
            .remove(collections::FOLLOWS, &follow_id(follower_id, followee_id))
            .await?)
    }

    pub async fn is_following(&self, follower_id: &str, followee_id: &str) -> EngagementResult<bool> {
        Ok(self
            .store
            .exists(collections::FOLLOWS, &follow_id(follower_id, followee_id))
            .await?)
    }

    pub async fn followers(&self, user_id: &str) -> EngagementResult<Vec<String>> {
        Ok(follower_ids(self.store.as_ref(), user_id).await?)
    }

    pub async fn following(&self, user_id: &str) -> EngagementResult<Vec<String>> {
        let query = Query::new(collections::FOLLOWS).filter_eq("followerId", user_id);
        let follows = self.store.find::<Follow>(&query).await?;
        Ok(follows.into_iter().map(|follow| follow.followee_id).collect())
    }
}

fn validate_pair(follower_id: &str, followee_id: &str) -> EngagementResult<()> {
    if follower_id.is_empty() {
        return Err(EngagementError::invalid("followerId", "must not be empty"));
    }
    if followee_id.is_empty() {
        return Err(EngagementError::invalid("followeeId", "must not be empty"));
    }
    if follower_id == followee_id {
        return Err(EngagementError::invalid("followeeId", "users cannot follow themselves"));
    }
    Ok(())
}
