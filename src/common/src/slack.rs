//! Slack Web API client (chat.postMessage / chat.update / chat.delete).

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::Config;

const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Slack API error: {0}")]
    ApiError(String),

    #[error("Slack client not configured: {0}")]
    NotConfigured(String),
}

/// Envelope shared by the chat.* methods.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackResponse {
    pub ok: bool,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SlackResponse {
    fn into_result(self) -> Result<Self, SlackError> {
        if self.ok {
            Ok(self)
        } else {
            Err(SlackError::ApiError(
                self.error.unwrap_or_else(|| "unknown_error".to_string()),
            ))
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocks: Option<&'a serde_json::Value>,
}

/// Slack bot client bound to one channel.
pub struct SlackClient {
    client: Client,
    base_url: String,
    token: String,
    channel: String,
}

impl SlackClient {
    /// Create a client from config. Fails when no bot token is configured.
    pub fn new(config: &Config) -> Result<Self, SlackError> {
        let token = config
            .slack_bot_token
            .clone()
            .ok_or_else(|| SlackError::NotConfigured("SLACK_BOT_TOKEN".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: config.slack_api_url.trim_end_matches('/').to_string(),
            token,
            channel: config.slack_channel_id.clone(),
        })
    }

    /// Channel this client posts to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn call(&self, method: &str, body: &ChatRequest<'_>) -> Result<SlackResponse, SlackError> {
        let url = format!("{}/{}", self.base_url, method);
        debug!("[SLACK] {} channel={}", method, self.channel);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SlackError::ApiError(format!(
                "{} returned status: {}",
                method,
                response.status()
            )));
        }

        response.json::<SlackResponse>().await?.into_result()
    }

    /// Post a message; returns its timestamp handle.
    pub async fn post_message(
        &self,
        text: &str,
        blocks: &serde_json::Value,
    ) -> Result<String, SlackError> {
        let body = ChatRequest {
            channel: &self.channel,
            ts: None,
            text: Some(text),
            blocks: Some(blocks),
        };

        self.call("chat.postMessage", &body)
            .await?
            .ts
            .ok_or_else(|| SlackError::ApiError("chat.postMessage returned no ts".to_string()))
    }

    /// Replace the content of a posted message.
    pub async fn update_message(
        &self,
        ts: &str,
        text: &str,
        blocks: &serde_json::Value,
    ) -> Result<(), SlackError> {
        let body = ChatRequest {
            channel: &self.channel,
            ts: Some(ts),
            text: Some(text),
            blocks: Some(blocks),
        };

        self.call("chat.update", &body).await.map(|_| ())
    }

    /// Delete a posted message.
    pub async fn delete_message(&self, ts: &str) -> Result<(), SlackError> {
        let body = ChatRequest {
            channel: &self.channel,
            ts: Some(ts),
            text: None,
            blocks: None,
        };

        self.call("chat.delete", &body).await.map(|_| ())
    }
}
