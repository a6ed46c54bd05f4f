use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};

use super::devices::DeviceRegistry;
use super::gateway::{PushGateway, PushMessage};
use crate::errors::{EngagementError, EngagementResult, StoreError};
use crate::keys::receipt_id;
use crate::notifications::PreferenceStore;
use crate::profiles::display_name;
use crate::store::{ChangeEvent, ChangeKind, Store, WritePlan};
use crate::triggers::ChangeHandler;
use crate::types::{Notification, NotificationType, TriggerReceipt, collections};

/// Receipt namespace of [`PushRelayTrigger`].
pub const PUSH_RELAY_TRIGGER: &str = "push_relay";

/// Shown in place of a sender without a username.
pub const SENDER_FALLBACK: &str = "Someone";

const PUSH_SOUND: &str = "default";

/// What happened to one notification on its way to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// The recipient opted out of this notification type.
    Suppressed,
    /// No usable device token; the recipient has no registered device.
    NoDeviceToken,
    /// The gateway refused or could not be reached. Not retried.
    GatewayFailed,
}

pub fn push_title(kind: NotificationType) -> &'static str {
    match kind {
        NotificationType::NewComment => "New comment",
        NotificationType::Reply => "New reply",
        NotificationType::Follow => "New follower",
        NotificationType::Like => "New like",
        NotificationType::Book => "New book",
        NotificationType::Chapter => "New chapter",
    }
}

/// Builds the gateway message: body is the sender's name immediately followed by the
/// notification text, data is the notification record itself.
pub fn compose_message(notification: &Notification, token: &str, sender_name: &str) -> EngagementResult<PushMessage> {
    let data = serde_json::to_value(notification).map_err(StoreError::from)?;
    Ok(PushMessage {
        to: token.to_string(),
        sound: PUSH_SOUND.to_string(),
        title: push_title(notification.kind).to_string(),
        body: format!("{sender_name}{}", notification.text),
        data,
    })
}

/// Relays notification records to the push gateway, applying the preference gate.
#[derive(Clone)]
pub struct PushDispatcher {
    store: Arc<dyn Store>,
    preferences: PreferenceStore,
    devices: DeviceRegistry,
    gateway: Arc<dyn PushGateway>,
}

impl PushDispatcher {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PushGateway>) -> Self {
        Self {
            preferences: PreferenceStore::new(store.clone()),
            devices: DeviceRegistry::new(store.clone()),
            store,
            gateway,
        }
    }

    pub async fn dispatch(&self, notification: &Notification) -> EngagementResult<DispatchOutcome> {
        let recipient = &notification.recipient_id;
        if !self.preferences.delivery_enabled(recipient, notification.kind).await? {
            debug!("{} suppressed: {recipient} opted out of {}", notification.id, notification.kind);
            return Ok(DispatchOutcome::Suppressed);
        }
        let Some(token) = self.devices.device_token(recipient).await? else {
            debug!("{} not relayed: {recipient} has no device token", notification.id);
            return Ok(DispatchOutcome::NoDeviceToken);
        };
        let sender = display_name(self.store.as_ref(), &notification.sender_id)
            .await?
            .unwrap_or_else(|| SENDER_FALLBACK.to_string());

        let message = compose_message(notification, &token, &sender)?;
        match self.gateway.send(&message).await {
            Ok(()) => {
                info!("relayed {} notification {} to {recipient}", notification.kind, notification.id);
                Ok(DispatchOutcome::Delivered)
            }
            Err(err) => {
                warn!("push relay of {} failed: {err}", notification.id);
                Ok(DispatchOutcome::GatewayFailed)
            }
        }
    }
}

/// On-create trigger for `notifications`. A receipt is claimed before sending, so a redelivered
/// creation event never produces a second push.
pub struct PushRelayTrigger {
    store: Arc<dyn Store>,
    dispatcher: PushDispatcher,
}

impl PushRelayTrigger {
    pub fn new(store: Arc<dyn Store>, dispatcher: PushDispatcher) -> Self {
        Self { store, dispatcher }
    }
}

#[async_trait]
impl ChangeHandler for PushRelayTrigger {
    fn name(&self) -> &'static str {
        PUSH_RELAY_TRIGGER
    }

    fn collection(&self) -> &'static str {
        collections::NOTIFICATIONS
    }

    fn accepts(&self, event: &ChangeEvent) -> bool {
        event.collection == collections::NOTIFICATIONS && event.kind == ChangeKind::Created
    }

    async fn handle(&self, event: &ChangeEvent) -> EngagementResult<()> {
        let Some(after) = &event.after else {
            return Ok(());
        };
        let notification: Notification = serde_json::from_value(after.clone())
            .map_err(|err| EngagementError::invalid("notification", err.to_string()))?;

        let receipt = TriggerReceipt {
            id: receipt_id(PUSH_RELAY_TRIGGER, &event.event_id),
            trigger: PUSH_RELAY_TRIGGER.to_string(),
            event_id: event.event_id.clone(),
            created_at: Utc::now(),
        };
        let claim = WritePlan::new()
            .require_absent(collections::TRIGGER_RECEIPTS, receipt.id.clone())
            .create(&receipt)?;
        if !self.store.commit(claim).await?.was_applied() {
            debug!("notification {} already relayed", notification.id);
            return Ok(());
        }

        let outcome = self.dispatcher.dispatch(&notification).await?;
        debug!("notification {} relay outcome: {outcome:?}", notification.id);
        Ok(())
    }
}
