use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    errors::StoreError,
    keys::KeyContext,
    store::{Precondition, WriteOp, WritePlan},
};

/// A [`WritePlan`] with collection/id pairs resolved to Redis keys, ready for the Lua script.
#[derive(Debug, Serialize, Default)]
pub struct PlanPayload {
    /// Change log stream the script appends to.
    pub log_key: String,
    /// Commit time in epoch milliseconds, recorded with each logged change.
    pub at: String,
    pub preconditions: Vec<PreconditionPayload>,
    pub ops: Vec<OperationPayload>,
}

#[derive(Debug, Serialize)]
pub struct PreconditionPayload {
    pub check: PreconditionCheck,
    pub key: String,
}

#[derive(Debug, Serialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionCheck {
    Exists,
    Absent,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Put,
    Merge,
    Delete,
    Increment,
}

#[derive(Debug, Serialize)]
pub struct OperationPayload {
    pub op: OperationType,
    pub key: String,
    pub ids_key: String,
    pub collection: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl OperationPayload {
    fn new(keys: &KeyContext<'_>, op: OperationType, collection: String, id: String) -> Self {
        Self {
            op,
            key: keys.document(&collection, &id),
            ids_key: keys.collection_ids(&collection),
            collection,
            id,
            data_json: None,
            fields_json: None,
            field: None,
            delta: None,
        }
    }
}

pub fn build_plan_payload(
    keys: &KeyContext<'_>,
    plan: WritePlan,
    at: DateTime<Utc>,
) -> Result<PlanPayload, StoreError> {
    let preconditions = plan
        .preconditions
        .into_iter()
        .map(|condition| match condition {
            Precondition::Exists { collection, id } => PreconditionPayload {
                check: PreconditionCheck::Exists,
                key: keys.document(&collection, &id),
            },
            Precondition::Absent { collection, id } => PreconditionPayload {
                check: PreconditionCheck::Absent,
                key: keys.document(&collection, &id),
            },
        })
        .collect();

    let mut ops = Vec::with_capacity(plan.ops.len());
    for op in plan.ops {
        let payload = match op {
            WriteOp::Create { collection, id, data } => {
                let mut payload = OperationPayload::new(keys, OperationType::Create, collection, id);
                payload.data_json = Some(serde_json::to_string(&data)?);
                payload
            }
            WriteOp::Put { collection, id, data } => {
                let mut payload = OperationPayload::new(keys, OperationType::Put, collection, id);
                payload.data_json = Some(serde_json::to_string(&data)?);
                payload
            }
            WriteOp::Merge { collection, id, fields } => {
                let mut payload = OperationPayload::new(keys, OperationType::Merge, collection, id);
                payload.fields_json = Some(serde_json::to_string(&fields)?);
                payload
            }
            WriteOp::Delete { collection, id } => OperationPayload::new(keys, OperationType::Delete, collection, id),
            WriteOp::Increment {
                collection,
                id,
                field,
                delta,
            } => {
                let mut payload = OperationPayload::new(keys, OperationType::Increment, collection, id);
                payload.field = Some(field);
                payload.delta = Some(delta);
                payload
            }
        };
        ops.push(payload);
    }

    Ok(PlanPayload {
        log_key: keys.change_log(),
        at: at.timestamp_millis().to_string(),
        preconditions,
        ops,
    })
}
