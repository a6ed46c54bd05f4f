use redis::aio::ConnectionLike;
use serde_json::Value;

use crate::{
    errors::StoreError,
    runtime::{commands::PlanPayload, scripts::APPLY_PLAN_SCRIPT},
};

/// One document change reported by the plan script. States are raw JSON documents.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptChange {
    pub collection: String,
    pub id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    /// Change log entry the script appended for this change.
    pub log_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptResponse {
    Skipped,
    Applied(Vec<ScriptChange>),
}

pub async fn execute_plan<C>(conn: &mut C, payload: &PlanPayload) -> Result<ScriptResponse, StoreError>
where
    C: ConnectionLike + Send,
{
    let encoded = serde_json::to_string(payload)?;
    let mut invocation = APPLY_PLAN_SCRIPT.prepare_invoke();
    invocation.arg(encoded);
    let raw: String = invocation.invoke_async(conn).await?;
    parse_response(&raw)
}

fn parse_document(value: Option<&Value>) -> Result<Option<Value>, StoreError> {
    match value {
        Some(Value::String(raw)) => Ok(Some(serde_json::from_str(raw)?)),
        _ => Ok(None),
    }
}

pub(crate) fn parse_response(raw: &str) -> Result<ScriptResponse, StoreError> {
    let value: Value = serde_json::from_str(raw)?;

    if let Some(code) = value.get("error").and_then(Value::as_str) {
        return match code {
            "already_exists" => Err(StoreError::AlreadyExists {
                collection: value.get("collection").and_then(Value::as_str).unwrap_or_default().to_string(),
                id: value.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            }),
            other => Err(StoreError::backend(format!("plan script failed: {other}"))),
        };
    }

    if value.get("skipped").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(ScriptResponse::Skipped);
    }

    // cjson encodes an empty table as `{}`, so a missing array means no changes.
    let entries = value.get("changes").and_then(Value::as_array).cloned().unwrap_or_default();
    let mut changes = Vec::with_capacity(entries.len());
    for entry in &entries {
        changes.push(ScriptChange {
            collection: entry.get("collection").and_then(Value::as_str).unwrap_or_default().to_string(),
            id: entry.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            before: parse_document(entry.get("before"))?,
            after: parse_document(entry.get("after"))?,
            log_id: entry.get("log_id").and_then(Value::as_str).map(str::to_string),
        });
    }
    Ok(ScriptResponse::Applied(changes))
}
