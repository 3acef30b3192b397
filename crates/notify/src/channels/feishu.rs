//! Feishu (Lark) custom-bot webhook channel.
//!
//! Feishu bots with "signature verification" enabled expect every message to
//! carry a unix timestamp and a signature derived from it:
//! `base64(HMAC-SHA256(key = "{timestamp}\n{secret}", message = ""))`.

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::NotifyEvent;
use crate::NotifyChannel;

type HmacSha256 = Hmac<Sha256>;

/// Compute the Feishu webhook signature for a timestamp (seconds).
///
/// Identical inputs always produce identical signatures.
pub fn gen_sign(secret: &str, timestamp: i64) -> Result<String, ChannelError> {
    let string_to_sign = format!("{timestamp}\n{secret}");
    let mac = HmacSha256::new_from_slice(string_to_sign.as_bytes())
        .map_err(|e| ChannelError::Signing(e.to_string()))?;
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Feishu webhook notification channel.
pub struct FeishuChannel {
    name: String,
    webhook_url: String,
    secret: String,
    client: reqwest::Client,
}

impl FeishuChannel {
    /// Create a Feishu channel from an already resolved webhook URL and signing secret.
    pub fn new(
        name: impl Into<String>,
        webhook_url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            name: name.into(),
            webhook_url: webhook_url.into(),
            secret: secret.into(),
            client,
        })
    }

    /// Build the signed bot message for an event at the given timestamp.
    fn build_message(&self, event: &NotifyEvent, timestamp: i64) -> Result<BotMessage, ChannelError> {
        let sign = gen_sign(&self.secret, timestamp)?;
        let text = format!(
            "Namespace: {}\nPod: {}\nContent: {}",
            event.namespace(),
            event.pod(),
            event.body()
        );
        Ok(BotMessage {
            timestamp: timestamp.to_string(),
            sign,
            msg_type: "text",
            content: TextContent { text },
        })
    }
}

#[async_trait]
impl NotifyChannel for FeishuChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        if self.webhook_url.is_empty() {
            return Err(ChannelError::NotConfigured(self.name.clone()));
        }

        let message = self.build_message(event, chrono::Utc::now().timestamp())?;

        debug!(channel = %self.name, event = %event.title(), "Sending notification");

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(
                channel = %self.name,
                status = %status,
                body = %body,
                "Feishu webhook request failed"
            );
            return Err(ChannelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: BotReply = serde_json::from_str(&body)?;
        if reply.code != 0 {
            warn!(channel = %self.name, code = reply.code, msg = %reply.msg, "Feishu rejected message");
            return Err(ChannelError::Rejected {
                code: reply.code,
                message: reply.msg,
            });
        }

        debug!(channel = %self.name, "Notification sent successfully");
        Ok(())
    }
}

// =============================================================================
// Feishu API types
// =============================================================================

#[derive(Debug, Serialize)]
struct BotMessage {
    timestamp: String,
    sign: String,
    msg_type: &'static str,
    content: TextContent,
}

#[derive(Debug, Serialize)]
struct TextContent {
    text: String,
}

#[derive(Debug, Deserialize)]
struct BotReply {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}
