//! The document store capability the pipeline is written against.
//!
//! A [`Store`] offers per-document reads, collection queries, an atomic multi-document
//! [`WritePlan`] (which also provides atomic field increments), a durable change log that the
//! trigger runtime consumes, and a best-effort change feed that live views subscribe to.
//! Components receive an `Arc<dyn Store>` at construction; nothing in the crate reaches for a
//! global client.

mod memory;
mod query;
mod redis;

pub use memory::InMemoryStore;
pub use query::{FilterCondition, FilterOperator, OrderBy, Query, SortOrder, compare_values};
pub use redis::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::{errors::StoreError, types::Document};

/// Largest id list a single [`Store::get_many`] call accepts. Callers chunk beyond it.
pub const MAX_IN_LIST: usize = 30;

/// Largest number of operations the pipeline puts into one bulk [`WritePlan`]. Bulk updates and
/// purges are committed in chunks of this size.
pub const MAX_PLAN_OPS: usize = 500;

/// Capacity of the change-event channel each store keeps for its subscribers.
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Where a change-log read starts for a consumer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPosition {
    /// Entries already handed to the group but never acknowledged.
    Pending,
    /// Entries never handed to the group.
    New,
}

/// A change event read from the durable change log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedChange {
    /// Position in the log, used to acknowledge the entry.
    pub log_id: String,
    pub event: ChangeEvent,
}

/// A document together with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Value,
}

impl StoredDocument {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Condition checked before any operation of a plan is applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Precondition {
    Exists { collection: String, id: String },
    Absent { collection: String, id: String },
}

/// A single mutation inside a [`WritePlan`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    /// Insert a new document; the whole plan fails with `AlreadyExists` if it is present.
    Create { collection: String, id: String, data: Value },
    /// Insert or replace a document.
    Put { collection: String, id: String, data: Value },
    /// Shallow-merge fields into a document, creating it if missing.
    Merge {
        collection: String,
        id: String,
        fields: Map<String, Value>,
    },
    /// Remove a document if present.
    Delete { collection: String, id: String },
    /// Add `delta` to a numeric field. Documents that do not exist are left untouched; a missing
    /// field counts as zero.
    Increment {
        collection: String,
        id: String,
        field: String,
        delta: i64,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Create { collection, .. }
            | WriteOp::Put { collection, .. }
            | WriteOp::Merge { collection, .. }
            | WriteOp::Delete { collection, .. }
            | WriteOp::Increment { collection, .. } => collection,
        }
    }
}

/// An all-or-nothing group of writes, guarded by preconditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WritePlan {
    pub preconditions: Vec<Precondition>,
    pub ops: Vec<WriteOp>,
}

impl WritePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(op: WriteOp) -> Self {
        Self {
            preconditions: Vec::new(),
            ops: vec![op],
        }
    }

    pub fn require_absent(mut self, collection: impl Into<String>, id: impl Into<String>) -> Self {
        self.preconditions.push(Precondition::Absent {
            collection: collection.into(),
            id: id.into(),
        });
        self
    }

    pub fn require_exists(mut self, collection: impl Into<String>, id: impl Into<String>) -> Self {
        self.preconditions.push(Precondition::Exists {
            collection: collection.into(),
            id: id.into(),
        });
        self
    }

    pub fn push(mut self, op: WriteOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn create<D: Document>(self, document: &D) -> Result<Self, StoreError> {
        let data = serde_json::to_value(document)?;
        Ok(self.push(WriteOp::Create {
            collection: D::COLLECTION.to_string(),
            id: document.id().to_string(),
            data,
        }))
    }

    pub fn put<D: Document>(self, document: &D) -> Result<Self, StoreError> {
        let data = serde_json::to_value(document)?;
        Ok(self.push(WriteOp::Put {
            collection: D::COLLECTION.to_string(),
            id: document.id().to_string(),
            data,
        }))
    }

    pub fn delete(self, collection: impl Into<String>, id: impl Into<String>) -> Self {
        self.push(WriteOp::Delete {
            collection: collection.into(),
            id: id.into(),
        })
    }

    pub fn increment(
        self,
        collection: impl Into<String>,
        id: impl Into<String>,
        field: impl Into<String>,
        delta: i64,
    ) -> Self {
        self.push(WriteOp::Increment {
            collection: collection.into(),
            id: id.into(),
            field: field.into(),
            delta,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Result of committing a [`WritePlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Every operation was applied; carries the number of documents that changed.
    Applied(usize),
    /// A precondition did not hold; nothing was written.
    Skipped,
}

impl CommitOutcome {
    pub fn was_applied(self) -> bool {
        matches!(self, CommitOutcome::Applied(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One document mutation, as observed by triggers and live views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: String,
    pub collection: String,
    pub document_id: String,
    pub kind: ChangeKind,
    pub before: Option<Value>,
    pub after: Option<Value>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    pub(crate) fn from_states(
        collection: &str,
        document_id: &str,
        before: Option<Value>,
        after: Option<Value>,
    ) -> Option<Self> {
        Self::with_event_id(crate::id::generate_event_id(), collection, document_id, before, after, Utc::now())
    }

    pub(crate) fn with_event_id(
        event_id: String,
        collection: &str,
        document_id: &str,
        before: Option<Value>,
        after: Option<Value>,
        at: DateTime<Utc>,
    ) -> Option<Self> {
        let kind = match (&before, &after) {
            (None, Some(_)) => ChangeKind::Created,
            (Some(_), None) => ChangeKind::Deleted,
            (Some(old), Some(new)) if old != new => ChangeKind::Updated,
            _ => return None,
        };
        Some(Self {
            event_id,
            collection: collection.to_string(),
            document_id: document_id.to_string(),
            kind,
            before,
            after,
            at,
        })
    }
}

/// Document store capability injected into every pipeline component.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a single document by id.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Fetch up to [`MAX_IN_LIST`] documents by id. Missing ids are omitted from the result.
    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<StoredDocument>, StoreError>;

    /// Run a collection query.
    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError>;

    /// Apply a plan atomically: either every operation is applied or none is.
    async fn commit(&self, plan: WritePlan) -> Result<CommitOutcome, StoreError>;

    /// Subscribe to change events for all collections. Delivery is best effort: a receiver that
    /// falls behind the channel capacity skips events. Consumers that must see every change
    /// read the change log instead.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;

    /// Read up to `limit` entries of the change log for consumer `group`. Every applied change is
    /// appended to the log atomically with its write. A group seen for the first time starts at
    /// the beginning of the log. Entries stay pending for the group until acknowledged.
    async fn read_change_log(
        &self,
        group: &str,
        position: LogPosition,
        limit: usize,
    ) -> Result<Vec<LoggedChange>, StoreError>;

    /// Acknowledge entries handed to `group`, so they are not redelivered.
    async fn ack_changes(&self, group: &str, log_ids: &[String]) -> Result<(), StoreError>;

    /// Drop change-log entries recorded before `cutoff`. Returns how many were removed.
    async fn trim_change_log(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Typed convenience layer over [`Store`].
#[async_trait]
pub trait StoreExt: Store {
    async fn fetch<D: Document>(&self, id: &str) -> Result<Option<D>, StoreError> {
        self.fetch_as(D::COLLECTION, id).await
    }

    async fn fetch_as<T: DeserializeOwned + Send>(&self, collection: &str, id: &str) -> Result<Option<T>, StoreError> {
        match self.get(collection, id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self.get(collection, id).await?.is_some())
    }

    async fn find<D: Document>(&self, query: &Query) -> Result<Vec<D>, StoreError> {
        let documents = self.query(query).await?;
        documents.iter().map(|doc| doc.decode::<D>()).collect()
    }

    async fn insert<D: Document>(&self, document: &D) -> Result<(), StoreError> {
        self.commit(WritePlan::new().create(document)?).await.map(|_| ())
    }

    async fn put<D: Document>(&self, document: &D) -> Result<(), StoreError> {
        self.commit(WritePlan::new().put(document)?).await.map(|_| ())
    }

    async fn merge(&self, collection: &str, id: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.commit(WritePlan::single(WriteOp::Merge {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        }))
        .await
        .map(|_| ())
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let outcome = self.commit(WritePlan::new().delete(collection, id)).await?;
        Ok(outcome == CommitOutcome::Applied(1))
    }

    /// Atomic single-field increment. Returns `false` when the document does not exist.
    async fn increment(&self, collection: &str, id: &str, field: &str, delta: i64) -> Result<bool, StoreError> {
        let outcome = self.commit(WritePlan::new().increment(collection, id, field, delta)).await?;
        Ok(outcome == CommitOutcome::Applied(1))
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
