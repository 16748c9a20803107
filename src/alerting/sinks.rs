use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde_json::json;
use tracing::{error, info};
use url::Url;
use crate::alerting::notification_manager::Notification;
use crate::errors::{DispatchError, DispatchResult};

/// The push transport. Implementations deliver best-effort; the engine never waits on the result.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> DispatchResult<()>;
}

/// Posts each notification as JSON to a webhook.
pub struct WebhookSink {
    client: Client,
    url: Url,
    auth_token: Option<Secret<String>>,
}

impl WebhookSink {
    pub fn new(url: Url, auth_token: Option<Secret<String>>) -> Self {
        info!("Initializing webhook notification sink for {}", url.host_str().unwrap_or("unknown host"));
        Self { client: Client::new(), url, auth_token }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, notification: &Notification) -> DispatchResult<()> {
        let mut request = self.client.post(self.url.clone()).json(&json!({
            "recipients": notification.recipients,
            "title": notification.title,
            "body": notification.body,
            "metadata": notification.metadata,
        }));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;

        if response.status().is_success() {
            info!("Notification sent: {} -> {:?}", notification.title, notification.recipients);
            Ok(())
        } else {
            error!("Webhook rejected notification '{}': {}", notification.title, response.status());
            Err(DispatchError::NotificationError(format!("webhook returned {}", response.status())))
        }
    }
}

/// Writes notifications to the log. Used when no webhook is configured.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> DispatchResult<()> {
        info!(
            "NOTIFY {:?}: {} - {} {:?}",
            notification.recipients, notification.title, notification.body, notification.metadata
        );
        Ok(())
    }
}
