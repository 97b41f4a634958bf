//! Webhook notifications for the publish pipeline's dead-letter path.
//!
//! A job that exhausts its retries on a channel, or that trips that
//! channel's circuit breaker, is handed off to the dead-letter queue
//! (§4.3). This crate posts a notification about that hand-off to an
//! operator-configured webhook (Slack, Discord, or a generic JSON
//! consumer), optionally signed with an HMAC-SHA256 over the request body
//! so the receiver can verify the notification actually came from this
//! pipeline.
//!
//! Sending is meant to be fire-and-forget: callers should dispatch
//! [`send_webhook`] on a background thread rather than block the
//! publishing path on a third party's uptime.
//!
//! # Example
//!
//! ```ignore
//! use distro_webhook::{WebhookConfig, WebhookType, dead_letter_payload};
//!
//! let config = WebhookConfig {
//!     url: "https://hooks.slack.com/services/...".to_string(),
//!     webhook_type: WebhookType::Slack,
//!     secret: None,
//!     timeout_secs: 30,
//! };
//!
//! let payload = dead_letter_payload("job-1", "social_twitter", "rate_limited");
//! distro_webhook::send_webhook(&config, &payload).expect("send");
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use distro_types::Channel;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Webhook flavor, controlling the request body shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookType {
    #[default]
    Generic,
    Slack,
    Discord,
}

/// Configuration for a single notification target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub webhook_type: WebhookType,
    /// HMAC-SHA256 signing secret. When set, every request carries an
    /// `X-Distro-Signature: sha256=<hex>` header over the raw JSON body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            webhook_type: WebhookType::default(),
            secret: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Notification payload. Generic enough to cover both dead-letter hand-off
/// and terminal job failure notifications.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: std::collections::BTreeMap<String, serde_json::Value>,
}

fn sign(secret: &str, body: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any size");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Send a webhook notification, blocking until the request completes or
/// times out. Callers on the hot publish path should run this on a
/// dedicated thread instead of inline.
pub fn send_webhook(config: &WebhookConfig, payload: &WebhookPayload) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("failed to create HTTP client")?;

    let body = match config.webhook_type {
        WebhookType::Generic => serde_json::to_string(payload)?,
        WebhookType::Slack => slack_payload(payload)?,
        WebhookType::Discord => discord_payload(payload)?,
    };

    let mut request = client
        .post(&config.url)
        .header("Content-Type", "application/json");

    if let Some(secret) = &config.secret {
        let signature = sign(secret, &body);
        request = request.header("X-Distro-Signature", format!("sha256={signature}"));
    }

    let response = request
        .body(body)
        .send()
        .context("failed to send webhook request")?;

    if !response.status().is_success() {
        return Err(anyhow::anyhow!(
            "webhook request failed with status {}: {}",
            response.status(),
            response.text().unwrap_or_default()
        ));
    }

    Ok(())
}

/// Dispatch a webhook send on a background thread, swallowing the result.
/// Matches the fire-and-forget pattern used for dead-letter hand-off:
/// notification delivery never blocks or fails the publish it's reporting
/// on.
pub fn send_webhook_fire_and_forget(config: WebhookConfig, payload: WebhookPayload) {
    std::thread::spawn(move || {
        let _ = send_webhook(&config, &payload);
    });
}

fn slack_payload(payload: &WebhookPayload) -> Result<String> {
    let color = if payload.success { "good" } else { "danger" };
    let mut fields = vec![];

    if let Some(job_id) = &payload.job_id {
        fields.push(json!({ "title": "Job", "value": job_id, "short": true }));
    }
    if let Some(channel) = &payload.channel {
        fields.push(json!({ "title": "Channel", "value": channel, "short": true }));
    }
    if let Some(content_id) = &payload.content_id {
        fields.push(json!({ "title": "Content", "value": content_id, "short": true }));
    }
    if let Some(error) = &payload.error {
        fields.push(json!({ "title": "Error", "value": error, "short": false }));
    }

    let slack_json = json!({
        "attachments": [{
            "color": color,
            "title": payload.title.as_deref().unwrap_or("Distro Notification"),
            "text": payload.message,
            "fields": fields
        }]
    });

    Ok(serde_json::to_string(&slack_json)?)
}

fn discord_payload(payload: &WebhookPayload) -> Result<String> {
    let color = if payload.success { 65280_u32 } else { 16711680_u32 };
    let mut fields = vec![];

    if let Some(job_id) = &payload.job_id {
        fields.push(json!({ "name": "Job", "value": job_id, "inline": true }));
    }
    if let Some(channel) = &payload.channel {
        fields.push(json!({ "name": "Channel", "value": channel, "inline": true }));
    }
    if let Some(content_id) = &payload.content_id {
        fields.push(json!({ "name": "Content", "value": content_id, "inline": true }));
    }
    if let Some(error) = &payload.error {
        fields.push(json!({ "name": "Error", "value": error, "inline": false }));
    }

    let discord_json = json!({
        "embeds": [{
            "title": payload.title.as_deref().unwrap_or("Distro Notification"),
            "description": payload.message,
            "color": color,
            "fields": fields
        }]
    });

    Ok(serde_json::to_string(&discord_json)?)
}

/// Build a notification payload for a channel hand-off to the dead-letter
/// queue after retries (or the circuit breaker) exhaust a publish attempt.
pub fn dead_letter_payload(job_id: &str, channel: Channel, reason: &str) -> WebhookPayload {
    WebhookPayload {
        message: format!("Job {job_id} dead-lettered on {channel}: {reason}"),
        title: Some("Publish Dead-Lettered".to_string()),
        success: false,
        job_id: Some(job_id.to_string()),
        channel: Some(channel.to_string()),
        content_id: None,
        error: Some(reason.to_string()),
        extra: Default::default(),
    }
}

/// Build a notification payload for a job that reached a terminal success
/// state across all channels.
pub fn job_completed_payload(job_id: &str) -> WebhookPayload {
    WebhookPayload {
        message: format!("Job {job_id} completed"),
        title: Some("Publish Completed".to_string()),
        success: true,
        job_id: Some(job_id.to_string()),
        channel: None,
        content_id: None,
        error: None,
        extra: Default::default(),
    }
}
