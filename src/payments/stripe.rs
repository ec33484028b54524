use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{
    header_str, provider_error, PaymentError, PaymentIntent, PaymentProvider, PaymentReference, PaymentRequest,
    WebhookEvent,
};
use crate::security::constant_time_eq;
use crate::types::ProviderKind;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
/// Maximum age of a signed webhook timestamp, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct StripeProvider {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    client_secret: Option<String>,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeIntentObject,
}

#[derive(Debug, Deserialize)]
struct StripeIntentObject {
    id: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    amount_received: Option<i64>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
    #[serde(default)]
    last_payment_error: Option<StripeError>,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    message: Option<String>,
}

impl StripeProvider {
    pub fn new(client: reqwest::Client, api_base: String, secret_key: String, webhook_secret: Option<String>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key,
            webhook_secret,
        }
    }
}

/// Check a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against the raw body.
///
/// Any `v1` entry may match; the timestamp must be within the tolerance of `now_unix`.
pub fn verify_signature(header: &str, body: &[u8], secret: &str, now_unix: i64) -> Result<(), PaymentError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(sig) = hex::decode(value) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(PaymentError::InvalidSignature("no v1 signature".into()));
    }
    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(PaymentError::InvalidSignature("timestamp outside tolerance".into()));
    }

    let expected = sign(secret, timestamp, body)?;
    if signatures.iter().any(|sig| constant_time_eq(sig, &expected)) {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature("signature mismatch".into()))
    }
}

fn sign(secret: &str, timestamp: i64, body: &[u8]) -> Result<Vec<u8>, PaymentError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Decode a verified event body
pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, PaymentError> {
    let event: StripeEvent =
        serde_json::from_slice(body).map_err(|e| PaymentError::InvalidPayload(format!("stripe event: {}", e)))?;
    let object = event.data.object;
    let reference = object.metadata.get("reference").and_then(|r| r.parse::<PaymentReference>().ok());

    Ok(match event.event_type.as_str() {
        "payment_intent.succeeded" => WebhookEvent::PaymentSucceeded {
            provider_ref: object.id,
            reference,
            amount_cents: object.amount_received.unwrap_or(object.amount),
        },
        "payment_intent.payment_failed" => WebhookEvent::PaymentFailed {
            provider_ref: object.id,
            reference,
            reason: object
                .last_payment_error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "payment failed".to_string()),
        },
        _ => WebhookEvent::Ignored {
            event_type: event.event_type,
        },
    })
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentIntent, PaymentError> {
        let url = format!("{}/v1/payment_intents", self.api_base);
        let mut form = vec![
            ("amount", request.amount_cents.to_string()),
            ("currency", request.currency.to_ascii_lowercase()),
            ("description", request.description.clone()),
            ("metadata[reference]", request.reference.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("receipt_email", email.clone()));
        }

        tracing::debug!("Creating Stripe payment intent for {}", request.reference);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| PaymentError::Transport(format!("stripe request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(provider_error(ProviderKind::Stripe, response).await);
        }

        let intent: PaymentIntentResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::InvalidPayload(format!("stripe response: {}", e)))?;

        Ok(PaymentIntent {
            provider: ProviderKind::Stripe,
            provider_ref: intent.id,
            client_secret: intent.client_secret,
            checkout_url: None,
            amount_cents: intent.amount,
            currency: intent.currency,
        })
    }

    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookEvent, PaymentError> {
        let secret = self
            .webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(PaymentError::NotConfigured(ProviderKind::Stripe))?;
        let header = header_str(headers, SIGNATURE_HEADER)?;
        verify_signature(header, body, secret, Utc::now().timestamp())?;
        parse_event(body)
    }
}

/// Build a valid signature header, for exercising webhook endpoints in tests
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let sig = sign(secret, timestamp, body).map(hex::encode).unwrap_or_default();
    format!("t={},v1={}", timestamp, sig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaymentPhase;
    use uuid::Uuid;

    const SECRET: &str = "whsec_test";

    fn succeeded_body(reference: &str) -> Vec<u8> {
        serde_json::json!({
            "type": "payment_intent.succeeded",
            "data": { "object": {
                "id": "pi_123",
                "amount": 5000,
                "amount_received": 5000,
                "metadata": { "reference": reference }
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn accepts_valid_signature() {
        let body = succeeded_body("order:00000000-0000-0000-0000-000000000000");
        let now = 1_700_000_000;
        let header = signature_header(SECRET, now, &body);
        assert!(verify_signature(&header, &body, SECRET, now + 10).is_ok());
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let body = b"{}";
        let now = 1_700_000_000;
        let good = signature_header(SECRET, now, body);
        let header = format!("t={},v1={},{}", now, "00".repeat(32), good.split_once(',').unwrap().1);
        assert!(verify_signature(&header, body, SECRET, now).is_ok());
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let body = succeeded_body("order:00000000-0000-0000-0000-000000000000");
        let now = 1_700_000_000;
        let header = signature_header(SECRET, now, &body);
        assert!(matches!(
            verify_signature(&header, b"{\"tampered\":true}", SECRET, now),
            Err(PaymentError::InvalidSignature(_))
        ));
        assert!(verify_signature(&header, &body, "whsec_other", now).is_err());
    }

    #[test]
    fn rejects_stale_timestamps() {
        let body = b"{}";
        let then = 1_700_000_000;
        let header = signature_header(SECRET, then, body);
        assert!(verify_signature(&header, body, SECRET, then + SIGNATURE_TOLERANCE_SECS).is_ok());
        assert!(verify_signature(&header, body, SECRET, then + SIGNATURE_TOLERANCE_SECS + 1).is_err());
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(verify_signature("garbage", b"{}", SECRET, 0).is_err());
        assert!(verify_signature("t=1", b"{}", SECRET, 1).is_err());
        assert!(verify_signature("v1=abcd", b"{}", SECRET, 1).is_err());
    }

    #[test]
    fn parses_succeeded_and_failed_events() {
        let quote_id = Uuid::new_v4();
        let body = succeeded_body(&format!("quote:{}:deposit", quote_id));
        assert_eq!(
            parse_event(&body).unwrap(),
            WebhookEvent::PaymentSucceeded {
                provider_ref: "pi_123".into(),
                reference: Some(PaymentReference::Quote {
                    quote_id,
                    phase: PaymentPhase::Deposit
                }),
                amount_cents: 5000,
            }
        );

        let failed = serde_json::json!({
            "type": "payment_intent.payment_failed",
            "data": { "object": { "id": "pi_9", "amount": 100, "last_payment_error": { "message": "card declined" } } }
        })
        .to_string();
        assert!(matches!(
            parse_event(failed.as_bytes()).unwrap(),
            WebhookEvent::PaymentFailed { reason, reference: None, .. } if reason == "card declined"
        ));

        let other = r#"{"type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#;
        assert!(matches!(parse_event(other.as_bytes()).unwrap(), WebhookEvent::Ignored { .. }));
    }
}
