use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::app::ports::AlertGateway;

/// Posts alerts as `{"text": ...}`, the shape Slack-style incoming webhooks accept.
pub struct WebhookAlertGateway {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertGateway {
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into() }
    }
}

#[async_trait]
impl AlertGateway for WebhookAlertGateway {
    async fn send(&self, message: &str) -> bool {
        let result = self
            .client
            .post(&self.url)
            .timeout(Duration::from_secs(10))
            .json(&json!({ "text": message }))
            .send()
            .await;

        match result {
            Ok(r) if r.status().is_success() => {
                info!("Alert delivered");
                true
            }
            Ok(r) => {
                warn!("Alert webhook responded with status {}", r.status().as_u16());
                false
            }
            Err(e) => {
                warn!("Failed to deliver alert: {}", e);
                false
            }
        }
    }
}

/// Fallback when no webhook is configured: the alert only goes to the log.
#[derive(Debug, Default)]
pub struct LogAlertGateway;

#[async_trait]
impl AlertGateway for LogAlertGateway {
    async fn send(&self, message: &str) -> bool {
        warn!(alert = %message, "ALERT");
        true
    }
}

/// Picks the webhook gateway when a URL is configured.
pub fn gateway_from_config(webhook_url: Option<&str>) -> Arc<dyn AlertGateway> {
    match webhook_url {
        Some(url) if !url.trim().is_empty() => Arc::new(WebhookAlertGateway::new(url)),
        _ => Arc::new(LogAlertGateway),
    }
}
