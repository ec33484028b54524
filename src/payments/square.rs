use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use super::{
    header_str, provider_error, PaymentError, PaymentIntent, PaymentProvider, PaymentReference, PaymentRequest,
    WebhookEvent,
};
use crate::security::constant_time_eq;
use crate::types::ProviderKind;

pub const SIGNATURE_HEADER: &str = "x-square-hmacsha256-signature";
const SQUARE_VERSION: &str = "2024-01-18";

pub struct SquareProvider {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
    location_id: String,
    webhook_key: Option<String>,
    notification_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentLinkResponse {
    payment_link: PaymentLink,
}

#[derive(Debug, Deserialize)]
struct PaymentLink {
    url: String,
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct SquareEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: Option<SquareEventData>,
}

#[derive(Debug, Deserialize)]
struct SquareEventData {
    object: SquareEventObject,
}

#[derive(Debug, Deserialize)]
struct SquareEventObject {
    payment: Option<SquarePayment>,
}

#[derive(Debug, Deserialize)]
struct SquarePayment {
    order_id: String,
    status: String,
    #[serde(default)]
    note: Option<String>,
    amount_money: Option<Money>,
}

#[derive(Debug, Deserialize)]
struct Money {
    amount: i64,
}

impl SquareProvider {
    pub fn new(
        client: reqwest::Client,
        api_base: String,
        access_token: String,
        location_id: String,
        webhook_key: Option<String>,
        notification_url: Option<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token,
            location_id,
            webhook_key,
            notification_url,
        }
    }
}

/// Square signs `notification_url + body` and sends the base64 HMAC-SHA256
pub fn verify_signature(signature_b64: &str, notification_url: &str, body: &[u8], key: &str) -> Result<(), PaymentError> {
    let provided = STANDARD
        .decode(signature_b64.trim())
        .map_err(|_| PaymentError::InvalidSignature("signature is not base64".into()))?;
    let expected = sign(key, notification_url, body)?;
    if constant_time_eq(&provided, &expected) {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature("signature mismatch".into()))
    }
}

fn sign(key: &str, notification_url: &str, body: &[u8]) -> Result<Vec<u8>, PaymentError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key.as_bytes()).map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
    mac.update(notification_url.as_bytes());
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Build a valid signature header value, for exercising webhook endpoints in tests
pub fn signature_header(key: &str, notification_url: &str, body: &[u8]) -> String {
    sign(key, notification_url, body).map(|s| STANDARD.encode(s)).unwrap_or_default()
}

/// Decode a verified `payment.*` event; the order id is the provider reference
pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, PaymentError> {
    let event: SquareEvent =
        serde_json::from_slice(body).map_err(|e| PaymentError::InvalidPayload(format!("square event: {}", e)))?;

    let payment = match (event.event_type.as_str(), event.data.and_then(|d| d.object.payment)) {
        ("payment.created" | "payment.updated", Some(payment)) => payment,
        _ => {
            return Ok(WebhookEvent::Ignored {
                event_type: event.event_type,
            })
        }
    };

    let reference = payment.note.as_deref().and_then(|n| n.parse::<PaymentReference>().ok());
    Ok(match payment.status.as_str() {
        "COMPLETED" => WebhookEvent::PaymentSucceeded {
            provider_ref: payment.order_id,
            reference,
            amount_cents: payment.amount_money.map(|m| m.amount).unwrap_or(0),
        },
        "FAILED" | "CANCELED" => WebhookEvent::PaymentFailed {
            provider_ref: payment.order_id,
            reference,
            reason: format!("payment {}", payment.status.to_ascii_lowercase()),
        },
        other => WebhookEvent::Ignored {
            event_type: format!("{}:{}", event.event_type, other),
        },
    })
}

#[async_trait]
impl PaymentProvider for SquareProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Square
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentIntent, PaymentError> {
        let url = format!("{}/v2/online-checkout/payment-links", self.api_base);
        let mut body = json!({
            "idempotency_key": request.idempotency_key,
            "quick_pay": {
                "name": request.description,
                "price_money": {
                    "amount": request.amount_cents,
                    "currency": request.currency.to_ascii_uppercase(),
                },
                "location_id": self.location_id,
            },
            "payment_note": request.reference.to_string(),
        });
        if let Some(email) = &request.customer_email {
            body["pre_populated_data"] = json!({ "buyer_email": email });
        }

        tracing::debug!("Creating Square payment link for {}", request.reference);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .header("Square-Version", SQUARE_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| PaymentError::Transport(format!("square request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(provider_error(ProviderKind::Square, response).await);
        }

        let link: PaymentLinkResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::InvalidPayload(format!("square response: {}", e)))?;

        Ok(PaymentIntent {
            provider: ProviderKind::Square,
            provider_ref: link.payment_link.order_id,
            client_secret: None,
            checkout_url: Some(link.payment_link.url),
            amount_cents: request.amount_cents,
            currency: request.currency.clone(),
        })
    }

    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookEvent, PaymentError> {
        let (Some(key), Some(notification_url)) = (
            self.webhook_key.as_deref().filter(|k| !k.is_empty()),
            self.notification_url.as_deref(),
        ) else {
            return Err(PaymentError::NotConfigured(ProviderKind::Square));
        };
        let signature = header_str(headers, SIGNATURE_HEADER)?;
        verify_signature(signature, notification_url, body, key)?;
        parse_event(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const KEY: &str = "square-signature-key";
    const URL: &str = "https://shop.example.com/api/webhooks/square";

    fn payment_body(status: &str, note: &str) -> Vec<u8> {
        json!({
            "type": "payment.updated",
            "data": { "object": { "payment": {
                "id": "pay_1",
                "order_id": "ord_1",
                "status": status,
                "note": note,
                "amount_money": { "amount": 4200, "currency": "USD" }
            }}}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn verifies_signature_over_url_and_body() {
        let body = payment_body("COMPLETED", "");
        let sig = signature_header(KEY, URL, &body);
        assert!(verify_signature(&sig, URL, &body, KEY).is_ok());
        assert!(verify_signature(&sig, "https://evil.example.com/hook", &body, KEY).is_err());
        assert!(verify_signature(&sig, URL, b"{}", KEY).is_err());
        assert!(verify_signature("%%%", URL, &body, KEY).is_err());
    }

    #[test]
    fn maps_payment_status() {
        let id = Uuid::new_v4();
        let event = parse_event(&payment_body("COMPLETED", &format!("order:{}", id))).unwrap();
        assert_eq!(
            event,
            WebhookEvent::PaymentSucceeded {
                provider_ref: "ord_1".into(),
                reference: Some(PaymentReference::Order(id)),
                amount_cents: 4200,
            }
        );
        assert!(matches!(
            parse_event(&payment_body("FAILED", "")).unwrap(),
            WebhookEvent::PaymentFailed { reference: None, .. }
        ));
        assert!(matches!(
            parse_event(&payment_body("APPROVED", "")).unwrap(),
            WebhookEvent::Ignored { .. }
        ));
    }

    #[test]
    fn ignores_unrelated_events() {
        let body = br#"{"type":"refund.created","data":{"object":{}}}"#;
        assert!(matches!(parse_event(body).unwrap(), WebhookEvent::Ignored { event_type } if event_type == "refund.created"));
    }
}
