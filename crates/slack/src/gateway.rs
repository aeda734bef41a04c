use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::blocks::MessageTemplate;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("slack request `{method}` failed: {detail}")]
    Transport { method: String, detail: String },
    #[error("slack method `{method}` returned an error: {error}")]
    Api { method: String, error: String },
    #[error("could not decode slack response for `{method}`: {detail}")]
    Decode { method: String, detail: String },
}

/// Outbound side of the chat platform.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Opens (or reuses) the direct-message channel between the bot and `user_id`.
    async fn open_direct_channel(&self, user_id: &str) -> Result<String, GatewayError>;

    async fn post_message(
        &self,
        channel_id: &str,
        message: &MessageTemplate,
    ) -> Result<(), GatewayError>;
}

/// `MessagingGateway` backed by the Slack Web API.
pub struct SlackWebApiGateway {
    client: Client,
    base_url: String,
    bot_token: SecretString,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<ChannelRef>,
}

#[derive(Debug, Deserialize)]
struct ChannelRef {
    id: String,
}

impl SlackWebApiGateway {
    pub fn new(base_url: impl Into<String>, bot_token: SecretString) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build().map_err(|error| {
            GatewayError::Transport { method: "client.build".to_owned(), detail: error.to_string() }
        })?;
        Ok(Self::with_client(client, base_url, bot_token))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, bot_token: SecretString) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url, bot_token }
    }

    async fn call(&self, method: &str, body: Value) -> Result<ApiEnvelope, GatewayError> {
        let url = format!("{}/{method}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.bot_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| GatewayError::Transport {
                method: method.to_owned(),
                detail: error.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::Transport {
                method: method.to_owned(),
                detail: format!("http status {}", response.status()),
            });
        }

        let envelope: ApiEnvelope = response.json().await.map_err(|error| {
            GatewayError::Decode { method: method.to_owned(), detail: error.to_string() }
        })?;
        if !envelope.ok {
            return Err(GatewayError::Api {
                method: method.to_owned(),
                error: envelope.error.unwrap_or_else(|| "unknown_error".to_owned()),
            });
        }

        debug!(event_name = "egress.slack.api_call", method, "slack api call succeeded");
        Ok(envelope)
    }
}

#[async_trait]
impl MessagingGateway for SlackWebApiGateway {
    async fn open_direct_channel(&self, user_id: &str) -> Result<String, GatewayError> {
        let envelope = self.call("conversations.open", json!({ "users": user_id })).await?;
        envelope.channel.map(|channel| channel.id).ok_or_else(|| GatewayError::Decode {
            method: "conversations.open".to_owned(),
            detail: "response has no channel id".to_owned(),
        })
    }

    async fn post_message(
        &self,
        channel_id: &str,
        message: &MessageTemplate,
    ) -> Result<(), GatewayError> {
        let mut body = serde_json::to_value(message).map_err(|error| GatewayError::Decode {
            method: "chat.postMessage".to_owned(),
            detail: error.to_string(),
        })?;
        if let Value::Object(fields) = &mut body {
            fields.insert("channel".to_owned(), Value::String(channel_id.to_owned()));
        }
        self.call("chat.postMessage", body).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::{GatewayError, MessagingGateway, SlackWebApiGateway};
    use crate::blocks::MessageTemplate;

    #[tokio::test]
    async fn unreachable_api_surfaces_transport_error() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .expect("client");
        let gateway = SlackWebApiGateway::with_client(
            client,
            "http://127.0.0.1:9/api/",
            SecretString::from("xoxb-test".to_owned()),
        );

        let error = gateway
            .post_message("D1", &MessageTemplate::text("hello"))
            .await
            .expect_err("nothing listens on the discard port");

        assert!(matches!(error, GatewayError::Transport { ref method, .. } if method == "chat.postMessage"));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let gateway = SlackWebApiGateway::new(
            "https://slack.com/api/",
            SecretString::from("xoxb-test".to_owned()),
        )
        .expect("gateway");
        assert_eq!(gateway.base_url, "https://slack.com/api");
    }
}
