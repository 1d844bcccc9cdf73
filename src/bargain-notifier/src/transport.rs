//! Notification transport.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use common::SlackClient;
use tracing::info;

/// A posted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub channel: String,
    pub ts: String,
}

/// Rendered message: fallback text plus Block Kit blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageContent {
    pub text: String,
    pub blocks: serde_json::Value,
}

/// Sink for bargain notifications.
/// Mockable for testing via mockall.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post a new message.
    async fn post(&self, content: &MessageContent) -> Result<MessageHandle>;

    /// Replace a posted message's content.
    async fn update(&self, handle: &MessageHandle, content: &MessageContent) -> Result<()>;

    /// Remove a posted message.
    async fn delete(&self, handle: &MessageHandle) -> Result<()>;
}

/// Slack-backed notifier.
pub struct SlackNotifier {
    client: SlackClient,
}

impl SlackNotifier {
    pub fn new(client: SlackClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn post(&self, content: &MessageContent) -> Result<MessageHandle> {
        let ts = self
            .client
            .post_message(&content.text, &content.blocks)
            .await?;

        Ok(MessageHandle {
            channel: self.client.channel().to_string(),
            ts,
        })
    }

    async fn update(&self, handle: &MessageHandle, content: &MessageContent) -> Result<()> {
        self.client
            .update_message(&handle.ts, &content.text, &content.blocks)
            .await?;
        Ok(())
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<()> {
        self.client.delete_message(&handle.ts).await?;
        Ok(())
    }
}

/// Logs messages instead of sending them.
pub struct DryRunNotifier {
    channel: String,
    next_ts: AtomicU64,
}

impl DryRunNotifier {
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            next_ts: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Notifier for DryRunNotifier {
    async fn post(&self, content: &MessageContent) -> Result<MessageHandle> {
        let seq = self.next_ts.fetch_add(1, Ordering::Relaxed);
        let handle = MessageHandle {
            channel: self.channel.clone(),
            ts: format!("dry-run.{:06}", seq),
        };

        info!("[DRY RUN] post {} | {}", handle.ts, content.text);
        Ok(handle)
    }

    async fn update(&self, handle: &MessageHandle, _content: &MessageContent) -> Result<()> {
        info!("[DRY RUN] update {}", handle.ts);
        Ok(())
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<()> {
        info!("[DRY RUN] delete {}", handle.ts);
        Ok(())
    }
}
