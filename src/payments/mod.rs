//! Payment provider integrations.
//!
//! Card data never reaches this service: providers are driven through their
//! REST APIs and report outcomes back through signed webhooks.

pub mod square;
pub mod stripe;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::PaymentsConfig;
use crate::types::{PaymentPhase, ProviderKind};

pub use square::SquareProvider;
pub use stripe::StripeProvider;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider {0} is not configured")]
    NotConfigured(ProviderKind),
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("{provider} returned HTTP {status}: {message}")]
    Provider {
        provider: ProviderKind,
        status: u16,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

/// What a payment is for, carried through provider metadata and back in webhooks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentReference {
    Order(Uuid),
    Quote { quote_id: Uuid, phase: PaymentPhase },
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentReference::Order(id) => write!(f, "order:{}", id),
            PaymentReference::Quote { quote_id, phase } => write!(f, "quote:{}:{}", quote_id, phase),
        }
    }
}

impl FromStr for PaymentReference {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || PaymentError::InvalidPayload(format!("unrecognised payment reference '{}'", s));
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("order"), Some(id), None, None) => Ok(PaymentReference::Order(id.parse().map_err(|_| bad())?)),
            (Some("quote"), Some(id), Some(phase), None) => Ok(PaymentReference::Quote {
                quote_id: id.parse().map_err(|_| bad())?,
                phase: phase.parse().map_err(|_| bad())?,
            }),
            _ => Err(bad()),
        }
    }
}

/// Why a captured charge could not simply be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIssue {
    /// Money arrived for something already cancelled
    NeedsRefund,
    /// Less than the amount owed was captured
    Underpaid,
}

impl PaymentIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentIssue::NeedsRefund => "needs_refund",
            PaymentIssue::Underpaid => "underpaid",
        }
    }
}

impl fmt::Display for PaymentIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What applying a successful charge did to an order or quote
#[derive(Debug, Clone)]
pub enum PaymentApplied<T> {
    Applied(T),
    /// Recorded, but staff have to sort it out
    NeedsAttention(T, PaymentIssue),
    /// Already seen, or matches nothing
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub reference: PaymentReference,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub customer_email: Option<String>,
    /// Replays with the same key must not create a second charge
    pub idempotency_key: String,
}

/// Provider-side payment handed back to the browser to complete
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub provider: ProviderKind,
    pub provider_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
}

/// Verified webhook outcome, reduced to what the storefront acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentSucceeded {
        provider_ref: String,
        reference: Option<PaymentReference>,
        amount_cents: i64,
    },
    PaymentFailed {
        provider_ref: String,
        reference: Option<PaymentReference>,
        reason: String,
    },
    Ignored {
        event_type: String,
    },
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentIntent, PaymentError>;

    /// Authenticate a webhook delivery and decode it
    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookEvent, PaymentError>;
}

/// Configured providers, looked up by kind
#[derive(Clone, Default)]
pub struct PaymentRegistry {
    providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
}

impl PaymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every provider whose credentials are present
    pub fn from_config(cfg: &PaymentsConfig) -> Self {
        let client = http_client();
        let mut registry = Self::new();

        if let Some(key) = cfg.stripe_secret_key.clone().filter(|k| !k.is_empty()) {
            registry.register(Arc::new(StripeProvider::new(
                client.clone(),
                cfg.stripe_api_base.clone(),
                key,
                cfg.stripe_webhook_secret.clone(),
            )));
        }
        if let (Some(token), Some(location)) = (
            cfg.square_access_token.clone().filter(|t| !t.is_empty()),
            cfg.square_location_id.clone().filter(|l| !l.is_empty()),
        ) {
            registry.register(Arc::new(SquareProvider::new(
                client,
                cfg.square_api_base.clone(),
                token,
                location,
                cfg.square_webhook_key.clone(),
                cfg.square_notification_url.clone(),
            )));
        }

        tracing::info!("Payment providers enabled: {:?}", registry.available());
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn PaymentProvider>, PaymentError> {
        self.providers.get(&kind).cloned().ok_or(PaymentError::NotConfigured(kind))
    }

    pub fn available(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Read a provider's error body into a `PaymentError::Provider`
pub(crate) async fn provider_error(provider: ProviderKind, response: reqwest::Response) -> PaymentError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    PaymentError::Provider {
        provider,
        status,
        message: message.chars().take(500).collect(),
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, PaymentError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PaymentError::InvalidSignature(format!("missing {} header", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_round_trip_through_metadata() {
        let order = PaymentReference::Order(Uuid::new_v4());
        assert_eq!(order.to_string().parse::<PaymentReference>().unwrap(), order);

        let quote = PaymentReference::Quote {
            quote_id: Uuid::new_v4(),
            phase: PaymentPhase::Balance,
        };
        assert!(quote.to_string().ends_with(":balance"));
        assert_eq!(quote.to_string().parse::<PaymentReference>().unwrap(), quote);
    }

    #[test]
    fn rejects_unknown_references() {
        assert!("invoice:123".parse::<PaymentReference>().is_err());
        assert!("order:not-a-uuid".parse::<PaymentReference>().is_err());
        assert!(format!("quote:{}:tip", Uuid::new_v4()).parse::<PaymentReference>().is_err());
    }

    #[test]
    fn registry_reports_missing_provider() {
        let registry = PaymentRegistry::new();
        assert!(matches!(registry.get(ProviderKind::Stripe), Err(PaymentError::NotConfigured(ProviderKind::Stripe))));
        assert!(registry.available().is_empty());
    }

    #[test]
    fn registry_only_enables_configured_providers() {
        let mut cfg = crate::config::AppConfig::development().payments;
        cfg.stripe_secret_key = Some("sk_test_123".into());
        cfg.square_access_token = Some("sq-token".into());
        cfg.square_location_id = None;
        let registry = PaymentRegistry::from_config(&cfg);
        assert_eq!(registry.available(), vec![ProviderKind::Stripe]);
        assert_eq!(registry.get(ProviderKind::Stripe).unwrap().name(), "stripe");
    }
}
