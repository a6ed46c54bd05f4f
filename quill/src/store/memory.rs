use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::{
    CHANGE_CHANNEL_CAPACITY, ChangeEvent, CommitOutcome, LogPosition, LoggedChange, MAX_IN_LIST, Precondition, Query,
    Store, StoredDocument, WriteOp, WritePlan,
};
use crate::errors::StoreError;

type Collections = HashMap<String, BTreeMap<String, Value>>;

/// Process-local store. Every plan is applied under one lock, so plans are atomic and
/// serialised; changes are appended to the log under that same lock and broadcast after it is
/// released.
pub struct InMemoryStore {
    collections: Mutex<Collections>,
    log: Mutex<ChangeLog>,
    changes: broadcast::Sender<ChangeEvent>,
}

#[derive(Default)]
struct ChangeLog {
    entries: BTreeMap<u64, ChangeEvent>,
    next_seq: u64,
    groups: HashMap<String, GroupCursor>,
}

#[derive(Default)]
struct GroupCursor {
    next: u64,
    pending: BTreeSet<u64>,
}

impl ChangeLog {
    fn append(&mut self, event: ChangeEvent) {
        self.entries.insert(self.next_seq, event);
        self.next_seq += 1;
    }

    fn read(&mut self, group: &str, position: LogPosition, limit: usize) -> Vec<LoggedChange> {
        let cursor = self.groups.entry(group.to_string()).or_default();
        match position {
            LogPosition::New => {
                let batch: Vec<LoggedChange> = self
                    .entries
                    .range(cursor.next..)
                    .take(limit)
                    .map(|(seq, event)| LoggedChange {
                        log_id: seq.to_string(),
                        event: event.clone(),
                    })
                    .collect();
                for entry in &batch {
                    if let Ok(seq) = entry.log_id.parse::<u64>() {
                        cursor.pending.insert(seq);
                        cursor.next = seq + 1;
                    }
                }
                batch
            }
            LogPosition::Pending => {
                // entries trimmed while pending can no longer be delivered
                cursor.pending.retain(|seq| self.entries.contains_key(seq));
                cursor
                    .pending
                    .iter()
                    .take(limit)
                    .filter_map(|seq| {
                        self.entries.get(seq).map(|event| LoggedChange {
                            log_id: seq.to_string(),
                            event: event.clone(),
                        })
                    })
                    .collect()
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            collections: Mutex::new(HashMap::new()),
            log: Mutex::new(ChangeLog::default()),
            changes,
        }
    }

    /// Number of documents currently stored in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.lock()
            .map(|collections| collections.get(collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    /// Number of live change-feed receivers.
    pub fn subscriber_count(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Number of entries currently held in the change log.
    pub fn change_log_len(&self) -> usize {
        self.lock_log().map(|log| log.entries.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>, StoreError> {
        self.collections
            .lock()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))
    }

    fn lock_log(&self) -> Result<MutexGuard<'_, ChangeLog>, StoreError> {
        self.log
            .lock()
            .map_err(|_| StoreError::backend("in-memory change log lock poisoned"))
    }
}

fn lookup<'a>(collections: &'a Collections, collection: &str, id: &str) -> Option<&'a Value> {
    collections.get(collection).and_then(|docs| docs.get(id))
}

fn check_preconditions(collections: &Collections, plan: &WritePlan) -> bool {
    plan.preconditions.iter().all(|condition| match condition {
        Precondition::Exists { collection, id } => lookup(collections, collection, id).is_some(),
        Precondition::Absent { collection, id } => lookup(collections, collection, id).is_none(),
    })
}

fn apply_op(collections: &mut Collections, op: WriteOp) -> Option<ChangeEvent> {
    match op {
        WriteOp::Create { collection, id, data } | WriteOp::Put { collection, id, data } => {
            let before = collections.entry(collection.clone()).or_default().insert(id.clone(), data.clone());
            ChangeEvent::from_states(&collection, &id, before, Some(data))
        }
        WriteOp::Merge { collection, id, fields } => {
            let docs = collections.entry(collection.clone()).or_default();
            let before = docs.get(&id).cloned();
            let mut merged = match &before {
                Some(Value::Object(existing)) => existing.clone(),
                _ => Map::new(),
            };
            merged.extend(fields);
            let after = Value::Object(merged);
            docs.insert(id.clone(), after.clone());
            ChangeEvent::from_states(&collection, &id, before, Some(after))
        }
        WriteOp::Delete { collection, id } => {
            let before = collections.get_mut(&collection).and_then(|docs| docs.remove(&id));
            ChangeEvent::from_states(&collection, &id, before, None)
        }
        WriteOp::Increment {
            collection,
            id,
            field,
            delta,
        } => {
            let document = collections.get_mut(&collection).and_then(|docs| docs.get_mut(&id))?;
            let before = document.clone();
            let object = document.as_object_mut()?;
            let current = object.get(&field).and_then(Value::as_i64).unwrap_or(0);
            object.insert(field, Value::from(current + delta));
            let after = document.clone();
            ChangeEvent::from_states(&collection, &id, Some(before), Some(after))
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.lock()?;
        Ok(lookup(&collections, collection, id).cloned())
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<StoredDocument>, StoreError> {
        if ids.len() > MAX_IN_LIST {
            return Err(StoreError::InListTooLarge {
                len: ids.len(),
                max: MAX_IN_LIST,
            });
        }
        let collections = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                lookup(&collections, collection, id).map(|data| StoredDocument {
                    id: id.clone(),
                    data: data.clone(),
                })
            })
            .collect())
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let candidates: Vec<StoredDocument> = {
            let collections = self.lock()?;
            collections
                .get(&query.collection)
                .map(|docs| {
                    docs.iter()
                        .map(|(id, data)| StoredDocument {
                            id: id.clone(),
                            data: data.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(query.apply(candidates))
    }

    async fn commit(&self, plan: WritePlan) -> Result<CommitOutcome, StoreError> {
        let events = {
            let mut collections = self.lock()?;
            if !check_preconditions(&collections, &plan) {
                return Ok(CommitOutcome::Skipped);
            }
            for op in &plan.ops {
                if let WriteOp::Create { collection, id, .. } = op
                    && lookup(&collections, collection, id).is_some()
                {
                    return Err(StoreError::AlreadyExists {
                        collection: collection.clone(),
                        id: id.clone(),
                    });
                }
            }
            let events = plan
                .ops
                .into_iter()
                .filter_map(|op| apply_op(&mut collections, op))
                .collect::<Vec<_>>();
            let mut log = self.lock_log()?;
            for event in &events {
                log.append(event.clone());
            }
            events
        };

        let changed = events.len();
        for event in events {
            // No receivers is fine: nobody is watching.
            let _ = self.changes.send(event);
        }
        Ok(CommitOutcome::Applied(changed))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    async fn read_change_log(
        &self,
        group: &str,
        position: LogPosition,
        limit: usize,
    ) -> Result<Vec<LoggedChange>, StoreError> {
        Ok(self.lock_log()?.read(group, position, limit))
    }

    async fn ack_changes(&self, group: &str, log_ids: &[String]) -> Result<(), StoreError> {
        let mut log = self.lock_log()?;
        if let Some(cursor) = log.groups.get_mut(group) {
            for seq in log_ids.iter().filter_map(|id| id.parse::<u64>().ok()) {
                cursor.pending.remove(&seq);
            }
        }
        Ok(())
    }

    async fn trim_change_log(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut log = self.lock_log()?;
        let before = log.entries.len();
        log.entries.retain(|_, event| event.at >= cutoff);
        Ok((before - log.entries.len()) as u64)
    }
}
