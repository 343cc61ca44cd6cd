// Outbound notification sink. Delivery is fire-and-forget: failures are logged, never retried.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::NotifyConfig;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the sink accepted the message.
    async fn deliver(&self, text: &str) -> bool;
}

/// Chat webhook accepting `{"content": "..."}`.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(cfg: &NotifyConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url: cfg
                .webhook_url
                .clone()
                .context("notify.webhook_url is missing (set WEBHOOK_URL)")?,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, text: &str) -> bool {
        let result = self
            .client
            .post(&self.url)
            .json(&json!({ "content": text }))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                info!(operation = "notify", chars = text.chars().count(), "Notification delivered");
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(operation = "notify", status = %status, body = %body, "Webhook rejected notification");
                false
            }
            Err(e) => {
                warn!(operation = "notify", error = %e, "Webhook delivery failed");
                false
            }
        }
    }
}
