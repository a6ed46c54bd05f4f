use std::sync::Arc;

use log::info;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{EngagementError, EngagementResult};
use crate::live::{FieldWatch, LiveView};
use crate::profiles::load_authors;
use crate::store::{CommitOutcome, MAX_PLAN_OPS, Query, SortOrder, Store, StoreExt, WriteOp, WritePlan};
use crate::types::{AuthorProfile, Notification, collections};

/// A notification together with its sender's projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    #[serde(flatten)]
    pub notification: Notification,
    pub sender: AuthorProfile,
}

/// The recipient-facing side of notifications: listing, read state, deletion.
#[derive(Clone)]
pub struct NotificationInbox {
    store: Arc<dyn Store>,
}

impl NotificationInbox {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Every notification addressed to `recipient_id`, newest first.
    pub async fn list(&self, recipient_id: &str) -> EngagementResult<Vec<InboxEntry>> {
        load_inbox(self.store.as_ref(), recipient_id).await
    }

    pub async fn unread_count(&self, recipient_id: &str) -> EngagementResult<usize> {
        count_matching(self.store.as_ref(), &unread_query(recipient_id)).await
    }

    pub fn observe_inbox(&self, recipient_id: &str) -> LiveView<Vec<InboxEntry>> {
        let store = self.store.clone();
        let recipient = recipient_id.to_string();
        LiveView::spawn(
            self.store.clone(),
            FieldWatch::new(collections::NOTIFICATIONS, "recipientId", recipient_id),
            move || {
                let store = store.clone();
                let recipient = recipient.clone();
                async move { load_inbox(store.as_ref(), &recipient).await }
            },
        )
    }

    pub fn observe_unread_count(&self, recipient_id: &str) -> LiveView<usize> {
        let store = self.store.clone();
        let query = unread_query(recipient_id);
        LiveView::spawn(
            self.store.clone(),
            FieldWatch::new(collections::NOTIFICATIONS, "recipientId", recipient_id),
            move || {
                let store = store.clone();
                let query = query.clone();
                async move { count_matching(store.as_ref(), &query).await }
            },
        )
    }

    pub async fn mark_read(&self, notification_id: &str, requester_id: &str) -> EngagementResult<()> {
        self.owned(notification_id, requester_id).await?;
        let plan =
            WritePlan::single(mark_read_op(notification_id)).require_exists(collections::NOTIFICATIONS, notification_id);
        self.store.commit(plan).await?;
        Ok(())
    }

    /// Mark every unread notification of `recipient_id` read, in plans of at most
    /// [`MAX_PLAN_OPS`] writes. Returns how many changed.
    pub async fn mark_all_read(&self, recipient_id: &str) -> EngagementResult<usize> {
        let unread = self.store.query(&unread_query(recipient_id)).await?;
        if unread.is_empty() {
            return Ok(0);
        }
        let mut changed = 0;
        for chunk in unread.chunks(MAX_PLAN_OPS) {
            let plan = chunk
                .iter()
                .fold(WritePlan::new(), |plan, document| plan.push(mark_read_op(&document.id)));
            if let CommitOutcome::Applied(count) = self.store.commit(plan).await? {
                changed += count;
            }
        }
        info!("marked {changed} notification(s) read for {recipient_id}");
        Ok(changed)
    }

    pub async fn delete(&self, notification_id: &str, requester_id: &str) -> EngagementResult<()> {
        self.owned(notification_id, requester_id).await?;
        self.store.remove(collections::NOTIFICATIONS, notification_id).await?;
        Ok(())
    }

    async fn owned(&self, notification_id: &str, requester_id: &str) -> EngagementResult<Notification> {
        let notification: Notification = self
            .store
            .fetch(notification_id)
            .await?
            .ok_or_else(|| EngagementError::not_found(collections::NOTIFICATIONS, notification_id))?;
        if notification.recipient_id != requester_id {
            return Err(EngagementError::unauthorized(
                requester_id,
                format!("{}/{notification_id}", collections::NOTIFICATIONS),
            ));
        }
        Ok(notification)
    }
}

fn unread_query(recipient_id: &str) -> Query {
    Query::new(collections::NOTIFICATIONS)
        .filter_eq("recipientId", recipient_id)
        .filter_eq("read", false)
}

fn mark_read_op(notification_id: &str) -> WriteOp {
    let mut fields = Map::new();
    fields.insert("read".to_string(), Value::Bool(true));
    WriteOp::Merge {
        collection: collections::NOTIFICATIONS.to_string(),
        id: notification_id.to_string(),
        fields,
    }
}

async fn count_matching(store: &dyn Store, query: &Query) -> EngagementResult<usize> {
    Ok(store.query(query).await?.len())
}

async fn load_inbox(store: &dyn Store, recipient_id: &str) -> EngagementResult<Vec<InboxEntry>> {
    let query = Query::new(collections::NOTIFICATIONS)
        .filter_eq("recipientId", recipient_id)
        .order_by("createdAt", SortOrder::Desc);
    let notifications: Vec<Notification> = store.find(&query).await?;
    let senders = load_authors(store, notifications.iter().map(|n| n.sender_id.as_str())).await?;

    Ok(notifications
        .into_iter()
        .map(|notification| {
            let sender = senders
                .get(&notification.sender_id)
                .cloned()
                .unwrap_or_else(AuthorProfile::unknown);
            InboxEntry { notification, sender }
        })
        .collect())
}
