use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use redis::{
    RedisResult,
    aio::ConnectionManager,
    cmd,
    streams::{StreamId, StreamReadReply},
};
use serde_json::Value;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_stream::StreamExt;

use super::{
    CHANGE_CHANNEL_CAPACITY, ChangeEvent, CommitOutcome, LogPosition, LoggedChange, MAX_IN_LIST, Query, Store,
    StoredDocument, WritePlan,
};
use crate::{
    errors::StoreError,
    keys::KeyContext,
    runtime::{ScriptResponse, build_plan_payload, execute_plan},
};

/// Documents per `JSON.MGET` round trip when scanning a collection.
const SCAN_BATCH: usize = 200;

/// Consumer name used inside change-log consumer groups.
const LOG_CONSUMER: &str = "quill";

/// Redis-backed store: documents are RedisJSON values under `{prefix}:{collection}:{id}`, each
/// collection keeps an id set for queries, and plans run inside one Lua script that also appends
/// every change to a stream. Change events are additionally published on a pub/sub channel for
/// live views in every process.
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    changes: broadcast::Sender<ChangeEvent>,
    listener: JoinHandle<()>,
}

impl RedisStore {
    /// Connect to Redis and start listening on the prefix's change channel.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        let prefix = prefix.into();
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(KeyContext::new(&prefix).changes_channel()).await?;

        let sender = changes.clone();
        let listener = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!("dropping unreadable change message: {err}");
                        continue;
                    }
                };
                match serde_json::from_str::<ChangeEvent>(&payload) {
                    Ok(event) => {
                        let _ = sender.send(event);
                    }
                    Err(err) => warn!("dropping malformed change event: {err}"),
                }
            }
            debug!("change feed subscription closed");
        });

        Ok(Self {
            conn,
            prefix,
            changes,
            listener,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn keys(&self) -> KeyContext<'_> {
        KeyContext::new(&self.prefix)
    }

    async fn fetch_documents(&self, collection: &str, ids: &[String]) -> Result<Vec<StoredDocument>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys = self.keys();
        let mut command = cmd("JSON.MGET");
        for id in ids {
            command.arg(keys.document(collection, id));
        }
        command.arg(".");

        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = command.query_async(&mut conn).await?;
        let mut documents = Vec::with_capacity(raw.len());
        for (id, json) in ids.iter().zip(raw) {
            if let Some(json) = json {
                documents.push(StoredDocument {
                    id: id.clone(),
                    data: serde_json::from_str(&json)?,
                });
            }
        }
        Ok(documents)
    }

    async fn read_group(&self, group: &str, start: &str, limit: usize) -> RedisResult<Option<StreamReadReply>> {
        let mut conn = self.conn.clone();
        cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(LOG_CONSUMER)
            .arg("COUNT")
            .arg(limit)
            .arg("STREAMS")
            .arg(self.keys().change_log())
            .arg(start)
            .query_async(&mut conn)
            .await
    }

    async fn create_group(&self, group: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let created: RedisResult<()> = cmd("XGROUP")
            .arg("CREATE")
            .arg(self.keys().change_log())
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn publish(&self, events: &[ChangeEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let channel = self.keys().changes_channel();
        let mut pipe = redis::pipe();
        for event in events {
            pipe.cmd("PUBLISH").arg(&channel).arg(serde_json::to_string(event)?).ignore();
        }
        let mut conn = self.conn.clone();
        let () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

impl Drop for RedisStore {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let key = self.keys().document(collection, id);
        let mut conn = self.conn.clone();
        let raw: Option<String> = cmd("JSON.GET").arg(&key).query_async(&mut conn).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> Result<Vec<StoredDocument>, StoreError> {
        if ids.len() > MAX_IN_LIST {
            return Err(StoreError::InListTooLarge {
                len: ids.len(),
                max: MAX_IN_LIST,
            });
        }
        self.fetch_documents(collection, ids).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let ids_key = self.keys().collection_ids(&query.collection);
        let mut conn = self.conn.clone();
        let ids: Vec<String> = cmd("SMEMBERS").arg(&ids_key).query_async(&mut conn).await?;

        let mut candidates = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(SCAN_BATCH) {
            candidates.extend(self.fetch_documents(&query.collection, chunk).await?);
        }
        Ok(query.apply(candidates))
    }

    async fn commit(&self, plan: WritePlan) -> Result<CommitOutcome, StoreError> {
        let at = Utc::now();
        let payload = build_plan_payload(&self.keys(), plan, at)?;
        let mut conn = self.conn.clone();
        let changes = match execute_plan(&mut conn, &payload).await? {
            ScriptResponse::Skipped => return Ok(CommitOutcome::Skipped),
            ScriptResponse::Applied(changes) => changes,
        };

        let events: Vec<ChangeEvent> = changes
            .into_iter()
            .filter_map(|change| {
                let event_id = change.log_id.unwrap_or_else(crate::id::generate_event_id);
                ChangeEvent::with_event_id(event_id, &change.collection, &change.id, change.before, change.after, at)
            })
            .collect();

        // Write and change log are committed; live views of other processes miss this publish.
        if let Err(err) = self.publish(&events).await {
            warn!("failed to publish {} change event(s): {err}", events.len());
        }
        Ok(CommitOutcome::Applied(events.len()))
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
        let start = match position {
            LogPosition::Pending => "0",
            LogPosition::New => ">",
        };
        let reply = match self.read_group(group, start, limit).await {
            Err(err) if err.code() == Some("NOGROUP") => {
                self.create_group(group).await?;
                self.read_group(group, start, limit).await?
            }
            other => other?,
        };

        let mut logged = Vec::new();
        let mut unreadable = Vec::new();
        for entry in reply.into_iter().flat_map(|reply| reply.keys).flat_map(|key| key.ids) {
            match decode_logged(&entry) {
                Some(event) => logged.push(LoggedChange {
                    log_id: entry.id,
                    event,
                }),
                None => {
                    warn!("skipping unreadable change log entry {}", entry.id);
                    unreadable.push(entry.id);
                }
            }
        }
        if !unreadable.is_empty() {
            self.ack_changes(group, &unreadable).await?;
        }
        Ok(logged)
    }

    async fn ack_changes(&self, group: &str, log_ids: &[String]) -> Result<(), StoreError> {
        if log_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _acked: u64 = cmd("XACK")
            .arg(self.keys().change_log())
            .arg(group)
            .arg(log_ids)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn trim_change_log(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = cmd("XTRIM")
            .arg(self.keys().change_log())
            .arg("MINID")
            .arg(cutoff.timestamp_millis())
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }
}

/// Rebuild a change event from a change log entry. The entry id doubles as the event id, so
/// redeliveries carry the same id.
fn decode_logged(entry: &StreamId) -> Option<ChangeEvent> {
    let collection: String = entry.get("collection")?;
    let document_id: String = entry.get("id")?;
    let state = |field: &str| -> Option<Value> {
        entry
            .get::<String>(field)
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| serde_json::from_str(&raw).ok())
    };
    let at = entry
        .get::<String>("at")
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);
    ChangeEvent::with_event_id(
        entry.id.clone(),
        &collection,
        &document_id,
        state("before"),
        state("after"),
        at,
    )
}
