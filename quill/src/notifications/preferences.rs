use std::sync::Arc;

use log::debug;
use serde_json::{Map, Value};

use crate::errors::{EngagementError, EngagementResult};
use crate::store::{Store, StoreExt};
use crate::types::{NotificationPreferences, NotificationType, collections};

/// Per-user opt-outs, stored as `notification_preferences/{userId}`.
#[derive(Clone)]
pub struct PreferenceStore {
    store: Arc<dyn Store>,
}

impl PreferenceStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Current preferences. A missing document means every type is enabled; keys whose values
    /// are not booleans are ignored.
    pub async fn preferences(&self, user_id: &str) -> EngagementResult<NotificationPreferences> {
        let mut preferences = NotificationPreferences::default();
        if let Some(Value::Object(fields)) = self.store.get(collections::PREFERENCES, user_id).await? {
            for (key, value) in fields {
                match value {
                    Value::Bool(enabled) => {
                        preferences.0.insert(key, enabled);
                    }
                    other => debug!("ignoring non-boolean preference {key}={other} for {user_id}"),
                }
            }
        }
        Ok(preferences)
    }

    /// Set one type's preference, leaving the others untouched.
    pub async fn set_preference(&self, user_id: &str, kind: NotificationType, enabled: bool) -> EngagementResult<()> {
        if user_id.is_empty() {
            return Err(EngagementError::invalid("userId", "must not be empty"));
        }
        let mut fields = Map::new();
        fields.insert(kind.as_str().to_string(), Value::Bool(enabled));
        self.store.merge(collections::PREFERENCES, user_id, fields).await?;
        Ok(())
    }

    /// The preference gate: delivery is suppressed only by an explicit `false`.
    pub async fn delivery_enabled(&self, user_id: &str, kind: NotificationType) -> EngagementResult<bool> {
        Ok(self.preferences(user_id).await?.is_enabled(kind))
    }
}
