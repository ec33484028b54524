use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email transport is not configured")]
    NotConfigured,
    #[error("email provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("email transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Outbound email delivery; returns the provider's message id when it has one
#[async_trait]
pub trait EmailTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &EmailMessage) -> Result<Option<String>, EmailError>;
}

/// Resend HTTP API (`POST /emails`)
pub struct ResendTransport {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

impl ResendTransport {
    pub fn new(client: reqwest::Client, api_base: String, api_key: String) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl EmailTransport for ResendTransport {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn send(&self, message: &EmailMessage) -> Result<Option<String>, EmailError> {
        if self.api_key.is_empty() {
            return Err(EmailError::NotConfigured);
        }

        let response = self
            .client
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": message.from,
                "to": [message.to],
                "subject": message.subject,
                "html": message.html,
            }))
            .send()
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(EmailError::Provider {
                status,
                message: text.chars().take(300).collect(),
            });
        }

        let body: ResendResponse = response.json().await.map_err(|e| EmailError::Transport(e.to_string()))?;
        Ok(body.id)
    }
}

/// Writes emails to the log instead of sending them; keeps a copy for inspection
#[derive(Default)]
pub struct LogTransport {
    sent: Mutex<Vec<EmailMessage>>,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailTransport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &EmailMessage) -> Result<Option<String>, EmailError> {
        tracing::info!("Email (not sent) to {}: {}", message.to, message.subject);
        if let Ok(mut sent) = self.sent.lock() {
            // Keep the last 100
            if sent.len() >= 100 {
                sent.remove(0);
            }
            sent.push(message.clone());
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_transport_records_messages() {
        let transport = LogTransport::new();
        let message = EmailMessage {
            from: "shop@example.com".into(),
            to: "guest@example.com".into(),
            subject: "Hi".into(),
            html: "<p>Hi</p>".into(),
        };
        assert_eq!(transport.send(&message).await.unwrap(), None);
        assert_eq!(transport.sent(), vec![message]);
    }

    #[tokio::test]
    async fn resend_requires_api_key() {
        let transport = ResendTransport::new(reqwest::Client::new(), "https://api.resend.com".into(), String::new());
        let message = EmailMessage {
            from: "a@b.co".into(),
            to: "c@d.co".into(),
            subject: "s".into(),
            html: "h".into(),
        };
        assert!(matches!(transport.send(&message).await, Err(EmailError::NotConfigured)));
    }
}
