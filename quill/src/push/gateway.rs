use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PushError;
use crate::validators::is_valid_url;

/// Default gateway endpoint (Expo push service).
pub const DEFAULT_PUSH_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";

/// Outbound push message as accepted by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub to: String,
    pub sound: String,
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// Hands composed messages to an external push service.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError>;
}

/// Per-message ticket returned by the gateway.
#[derive(Debug, Deserialize)]
struct PushTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    data: PushTicket,
}

/// JSON-over-HTTP gateway client.
#[derive(Debug, Clone)]
pub struct HttpPushGateway {
    client: Client,
    endpoint: String,
}

impl HttpPushGateway {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PushError> {
        let endpoint = endpoint.into();
        if !is_valid_url(&endpoint) {
            return Err(PushError::Endpoint { endpoint });
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Rejected {
                message: format!("HTTP {status}: {body}"),
            });
        }

        let reply: PushResponse = response.json().await?;
        if reply.data.status != "ok" {
            return Err(PushError::Rejected {
                message: reply.data.message.unwrap_or(reply.data.status),
            });
        }
        debug!("push gateway accepted message for {}", message.to);
        Ok(())
    }
}
