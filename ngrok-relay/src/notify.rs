//! Webhook notification of the discovered address.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY: usize = 200;

/// Discord webhook message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub username: String,
    pub content: String,
}

/// Sends one message per call to a fixed webhook URL.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: String,
    username: String,
}

impl Notifier {
    pub fn new(webhook_url: impl Into<String>, username: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            username: username.into(),
        })
    }

    /// POST `message` to the webhook. The response body is discarded on success.
    pub async fn notify(&self, message: &str) -> Result<(), DeliveryError> {
        let payload = NotificationPayload {
            username: self.username.clone(),
            content: message.to_string(),
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        tracing::info!(%status, "webhook notified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve, unused_port, webhook_receiver};
    use axum::http::StatusCode;

    #[test]
    fn test_payload_shape() {
        let payload = NotificationPayload {
            username: "Ngrok".into(),
            content: "https://abc123.ngrok.io".into(),
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({"username": "Ngrok", "content": "https://abc123.ngrok.io"})
        );
    }

    #[tokio::test]
    async fn test_notify_posts_json() {
        let (app, received) = webhook_receiver(StatusCode::NO_CONTENT);
        let addr = serve(app).await;

        let notifier = Notifier::new(format!("http://{addr}/api/webhooks/1/x"), "Ngrok").unwrap();
        notifier.notify("tcp://0.tcp.ngrok.io:12345").await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].content, "tcp://0.tcp.ngrok.io:12345");
        assert_eq!(received[0].username, "Ngrok");
    }

    #[tokio::test]
    async fn test_non_success_is_delivery_error() {
        let (app, _received) = webhook_receiver(StatusCode::NOT_FOUND);
        let addr = serve(app).await;

        let notifier = Notifier::new(format!("http://{addr}/api/webhooks/1/x"), "Ngrok").unwrap();
        let err = notifier.notify("https://abc123.ngrok.io").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_transport_error() {
        let port = unused_port().await;
        let notifier = Notifier::new(format!("http://127.0.0.1:{port}/hook"), "Ngrok").unwrap();
        let err = notifier.notify("https://abc123.ngrok.io").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }
}
