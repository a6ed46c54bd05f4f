//! Delivery of notification records to devices through an external push gateway.

mod devices;
mod dispatcher;
mod gateway;

pub use devices::DeviceRegistry;
pub use dispatcher::{
    DispatchOutcome, PUSH_RELAY_TRIGGER, PushDispatcher, PushRelayTrigger, SENDER_FALLBACK, compose_message,
    push_title,
};
pub use gateway::{DEFAULT_PUSH_ENDPOINT, HttpPushGateway, PushGateway, PushMessage};
