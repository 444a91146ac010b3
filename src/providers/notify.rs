//! Operator / human-review notification port.

use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

use super::{check_http_response, ProviderError, PROVIDER_TIMEOUT};

/// Sends structured notifications to a named channel: human-review
/// escalations, operator alerts, daily summaries.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a payload to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on delivery failure.
    async fn send(&self, channel: &str, payload: &Value) -> Result<(), ProviderError>;
}

/// Webhook notifier: POSTs `{channel, payload}` to a configured URL
/// (Slack-style incoming webhook).
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, channel: &str, payload: &Value) -> Result<(), ProviderError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ProviderError::Parse(format!("bad notifier url: {e}")))?;
        let body = json!({"channel": channel, "payload": payload});
        let response = self
            .client
            .post(url)
            .timeout(PROVIDER_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        check_http_response(response).await?;
        Ok(())
    }
}

/// Notifier that drops everything; used when no webhook is configured and
/// in tests.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _channel: &str, _payload: &Value) -> Result<(), ProviderError> {
        Ok(())
    }
}
