//! VK Teams Bot API client
//!
//! Implements the Transport trait over the bot HTTP API: `messages/sendText`
//! for outbound text and long-polled `events/get` for inbound messages.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{InboundBatch, InboundMessage, SenderProfile, Transport, TransportError};
use crate::config::BotConfig;

/// Event type carrying a user's text message
const NEW_MESSAGE: &str = "newMessage";

/// VK Teams bot API client
pub struct VkTeamsClient {
    token: String,
    base_url: String,
    poll_time_secs: u64,
    http: Client,
}

/// Envelope shared by every API response
#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default = "default_ok")]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    events: Vec<Event>,
}

fn default_ok() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "eventId")]
    event_id: u64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    chat: Chat,
    #[serde(default)]
    from: Option<Author>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    #[serde(rename = "chatId")]
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct Author {
    #[serde(rename = "firstName", default)]
    first_name: String,
    #[serde(rename = "lastName", default)]
    last_name: String,
}

impl VkTeamsClient {
    /// Create a new client from configuration
    ///
    /// Reads the bot token from the environment variable named in config.
    pub fn from_config(config: &BotConfig) -> Result<Self, TransportError> {
        debug!(base_url = %config.base_url, token_env = %config.token_env, "from_config: called");
        let token = config
            .get_token()
            .map_err(|e| TransportError::Config(e.to_string()))?;
        Self::new(&config.base_url, token, config.poll_time_secs, config.timeout())
    }

    /// Create a client with explicit settings
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        poll_time_secs: u64,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            token: token.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_time_secs,
            http,
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// GET an API method and return the body of a 2xx response
    async fn get(&self, method: &str, query: &[(&str, String)]) -> Result<String, TransportError> {
        let response = self
            .http
            .get(self.url(method))
            .query(&[("token", self.token.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            debug!(%method, status = status.as_u16(), "get: non-success status");
            return Err(TransportError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }

    /// Convert raw events into messages, returning the next cursor
    fn collect_messages(events: Vec<Event>, cursor: u64) -> InboundBatch {
        let mut batch = InboundBatch {
            messages: Vec::new(),
            cursor,
        };

        for event in events {
            batch.cursor = batch.cursor.max(event.event_id);
            if event.kind != NEW_MESSAGE {
                debug!(kind = %event.kind, event_id = event.event_id, "collect_messages: skipping event");
                continue;
            }

            let payload: MessagePayload = match serde_json::from_value(event.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(event_id = event.event_id, error = %e, "Malformed newMessage payload");
                    continue;
                }
            };

            let Some(text) = payload.text.filter(|t| !t.trim().is_empty()) else {
                debug!(event_id = event.event_id, "collect_messages: message without text");
                continue;
            };

            let sender = payload
                .from
                .map(|f| SenderProfile {
                    first_name: f.first_name,
                    last_name: f.last_name,
                })
                .unwrap_or_default();

            batch.messages.push(InboundMessage {
                chat_id: payload.chat.chat_id,
                sender,
                text,
            });
        }

        batch
    }
}

#[async_trait]
impl Transport for VkTeamsClient {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        debug!(%chat_id, text_len = text.len(), "send_text: called");
        let body = self
            .get(
                "messages/sendText",
                &[("chatId", chat_id.to_string()), ("text", text.to_string())],
            )
            .await?;

        let status: ApiStatus =
            serde_json::from_str(&body).map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        if !status.ok {
            let description = status.description.unwrap_or_else(|| "unknown error".to_string());
            debug!(%chat_id, %description, "send_text: rejected");
            return Err(TransportError::Rejected(description));
        }
        Ok(())
    }

    async fn poll_events(&self, cursor: u64) -> Result<InboundBatch, TransportError> {
        let body = self
            .get(
                "events/get",
                &[
                    ("lastEventId", cursor.to_string()),
                    ("pollTime", self.poll_time_secs.to_string()),
                ],
            )
            .await?;

        let response: EventsResponse =
            serde_json::from_str(&body).map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        if !response.ok {
            return Err(TransportError::Rejected(
                response.description.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        Ok(Self::collect_messages(response.events, cursor))
    }
}
