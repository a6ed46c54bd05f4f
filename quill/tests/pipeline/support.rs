#![allow(dead_code)]

pub(crate) use chrono::{DateTime, TimeDelta, Utc};
pub(crate) use quill::store::{
    ChangeEvent, CommitOutcome, LogPosition, LoggedChange, Query, StoredDocument, WriteOp, WritePlan,
};
pub(crate) use quill::types::{NotificationType, collections};
pub(crate) use quill::{EngagementError, InMemoryStore, Services, Store, StoreError, StoreExt};
pub(crate) use serde_json::{Value, json};
pub(crate) use std::sync::Arc;
pub(crate) use std::time::Duration;

use async_trait::async_trait;
use quill::push::{PushGateway, PushMessage};
use quill::{Notification, PushError};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::broadcast;

pub(crate) fn memory_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new())
}

/// Write a raw document, replacing whatever is there.
pub(crate) async fn seed(store: &dyn Store, collection: &str, id: &str, data: Value) {
    store
        .commit(WritePlan::single(WriteOp::Put {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        }))
        .await
        .expect("seed document");
}

pub(crate) async fn seed_user(store: &dyn Store, id: &str, username: &str) {
    seed(store, collections::USERS, id, json!({ "id": id, "username": username })).await;
}

/// Chapter `c1` of book `b1`, both written by `author`, with zeroed counters.
pub(crate) async fn seed_book(store: &dyn Store, author: &str) {
    seed(
        store,
        collections::BOOKS,
        "b1",
        json!({ "id": "b1", "authorId": author, "title": "Tides", "totalLikes": 0, "totalReads": 0 }),
    )
    .await;
    seed(
        store,
        collections::CHAPTERS,
        "c1",
        json!({
            "id": "c1",
            "bookId": "b1",
            "authorId": author,
            "title": "Dawn",
            "likeCount": 0,
            "readCount": 0,
        }),
    )
    .await;
}

pub(crate) async fn field(store: &dyn Store, collection: &str, id: &str, name: &str) -> Value {
    store
        .get(collection, id)
        .await
        .expect("read document")
        .and_then(|doc| doc.get(name).cloned())
        .unwrap_or(Value::Null)
}

pub(crate) async fn notifications_for(store: &dyn Store, recipient: &str) -> Vec<Notification> {
    store
        .find(&Query::new(collections::NOTIFICATIONS).filter_eq("recipientId", recipient))
        .await
        .expect("query notifications")
}

/// Drain every change event queued on `changes`.
pub(crate) fn drain(changes: &mut broadcast::Receiver<ChangeEvent>) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = changes.try_recv() {
        events.push(event);
    }
    events
}

/// Poll `check` until it holds or two seconds pass.
pub(crate) async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Push gateway that keeps every message it is handed.
#[derive(Default)]
pub(crate) struct RecordingGateway {
    sent: Mutex<Vec<PushMessage>>,
    fail: bool,
}

impl RecordingGateway {
    pub(crate) fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().expect("gateway lock").clone()
    }
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        self.sent.lock().expect("gateway lock").push(message.clone());
        if self.fail {
            return Err(PushError::Rejected {
                message: "DeviceNotRegistered".into(),
            });
        }
        Ok(())
    }
}

/// Store whose commits fail whenever they touch one of the broken collections.
pub(crate) struct FlakyStore {
    inner: InMemoryStore,
    broken: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            broken: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn break_collection(&self, collection: &str) {
        self.broken.lock().expect("flaky lock").insert(collection.to_string());
    }

    pub(crate) fn count(&self, collection: &str) -> usize {
        self.inner.count(collection)
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<StoredDocument>, StoreError> {
        self.inner.get_many(collection, ids).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        self.inner.query(query).await
    }

    async fn commit(&self, plan: WritePlan) -> Result<CommitOutcome, StoreError> {
        let failing = {
            let broken = self.broken.lock().expect("flaky lock");
            plan.ops.iter().find(|op| broken.contains(op.collection())).map(|op| op.collection().to_string())
        };
        if let Some(collection) = failing {
            return Err(StoreError::backend(format!("{collection} is unavailable")));
        }
        self.inner.commit(plan).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.subscribe()
    }

    async fn read_change_log(
        &self,
        group: &str,
        position: LogPosition,
        limit: usize,
    ) -> Result<Vec<LoggedChange>, StoreError> {
        self.inner.read_change_log(group, position, limit).await
    }

    async fn ack_changes(&self, group: &str, log_ids: &[String]) -> Result<(), StoreError> {
        self.inner.ack_changes(group, log_ids).await
    }

    async fn trim_change_log(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.trim_change_log(cutoff).await
    }
}
