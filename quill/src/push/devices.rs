use std::sync::Arc;

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::errors::{EngagementError, EngagementResult};
use crate::store::{Store, StoreExt};
use crate::types::{UserProfile, collections};
use crate::validators::is_valid_push_token;

/// Field of the `users` document holding the device token.
pub const PUSH_TOKEN_FIELD: &str = "fcmToken";

/// Device tokens kept on `users/{id}.fcmToken`.
#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<dyn Store>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn register_device_token(&self, user_id: &str, token: &str) -> EngagementResult<()> {
        if user_id.is_empty() {
            return Err(EngagementError::invalid("userId", "must not be empty"));
        }
        if !is_valid_push_token(token) {
            return Err(EngagementError::invalid(PUSH_TOKEN_FIELD, format!("`{token}` is not a device token")));
        }
        self.write_token(user_id, Value::String(token.to_string())).await?;
        debug!("registered device token for {user_id}");
        Ok(())
    }

    pub async fn clear_device_token(&self, user_id: &str) -> EngagementResult<()> {
        self.write_token(user_id, Value::Null).await
    }

    /// The user's token if one is registered and well-formed.
    pub async fn device_token(&self, user_id: &str) -> EngagementResult<Option<String>> {
        let profile = self.store.fetch_as::<UserProfile>(collections::USERS, user_id).await?;
        Ok(profile.and_then(|profile| profile.push_token).and_then(|token| {
            if is_valid_push_token(&token) {
                Some(token)
            } else {
                warn!("ignoring malformed device token stored for {user_id}");
                None
            }
        }))
    }

    async fn write_token(&self, user_id: &str, token: Value) -> EngagementResult<()> {
        let mut fields = Map::new();
        fields.insert(PUSH_TOKEN_FIELD.to_string(), token);
        self.store.merge(collections::USERS, user_id, fields).await?;
        Ok(())
    }
}
