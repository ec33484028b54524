use axum::http::HeaderMap;
use std::sync::Arc;

use crate::error::ApiError;
use crate::notifications::{vars, NotificationTrigger};
use crate::payments::{PaymentApplied, PaymentError, PaymentIssue, PaymentReference, PaymentRegistry, WebhookEvent};
use crate::security::{SecurityEventKind, SecurityMonitor};
use crate::services::checkout_service::{CheckoutService, Order};
use crate::services::notification_service::NotificationService;
use crate::services::quote_service::QuoteService;
use crate::types::{format_cents, ProviderKind};

/// What a delivery ended up doing, echoed back to the provider
#[derive(Debug, Clone, serde::Serialize)]
pub struct WebhookOutcome {
    pub received: bool,
    pub action: &'static str,
}

impl WebhookOutcome {
    fn new(action: &'static str) -> Self {
        Self { received: true, action }
    }
}

fn order_vars(order: &Order) -> crate::notifications::TemplateVars {
    vars([
        ("customer_name", order.customer_name.clone()),
        ("email", order.email.clone()),
        ("order_number", order.number()),
        ("total", format_cents(order.total_cents)),
        ("fulfilment", order.fulfilment.clone()),
    ])
}

/// Routes verified provider events to orders or quotes
pub struct WebhookService {
    payments: PaymentRegistry,
    checkout: CheckoutService,
    quotes: QuoteService,
    notifications: Arc<NotificationService>,
    monitor: Arc<SecurityMonitor>,
}

impl WebhookService {
    pub fn new(
        payments: PaymentRegistry,
        checkout: CheckoutService,
        quotes: QuoteService,
        notifications: Arc<NotificationService>,
        monitor: Arc<SecurityMonitor>,
    ) -> Self {
        Self {
            payments,
            checkout,
            quotes,
            notifications,
            monitor,
        }
    }

    pub async fn handle(
        &self,
        provider: ProviderKind,
        headers: &HeaderMap,
        body: &[u8],
        client_ip: Option<String>,
    ) -> Result<WebhookOutcome, ApiError> {
        let event = match self.payments.get(provider)?.verify_webhook(headers, body) {
            Ok(event) => event,
            Err(PaymentError::InvalidSignature(msg)) => {
                self.monitor
                    .record(SecurityEventKind::InvalidSignature, client_ip, format!("{} webhook: {}", provider, msg));
                return Err(PaymentError::InvalidSignature(msg).into());
            }
            Err(e) => return Err(e.into()),
        };

        match event {
            WebhookEvent::PaymentSucceeded {
                provider_ref,
                reference,
                amount_cents,
            } => self.succeeded(provider, &provider_ref, reference, amount_cents).await,
            WebhookEvent::PaymentFailed {
                provider_ref,
                reference,
                reason,
            } => self.failed(provider, &provider_ref, reference, &reason).await,
            WebhookEvent::Ignored { event_type } => {
                tracing::debug!("Ignoring {} webhook event {}", provider, event_type);
                Ok(WebhookOutcome::new("ignored"))
            }
        }
    }

    async fn succeeded(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        reference: Option<PaymentReference>,
        amount_cents: i64,
    ) -> Result<WebhookOutcome, ApiError> {
        match reference {
            Some(PaymentReference::Quote { .. }) => {
                self.quote_paid(provider, provider_ref, reference, amount_cents).await
            }
            Some(PaymentReference::Order(order_id)) => {
                self.order_paid(provider, provider_ref, Some(order_id), amount_cents).await
            }
            None => {
                // No metadata: try orders first, then quote payments by provider reference
                let outcome = self.order_paid(provider, provider_ref, None, amount_cents).await?;
                if outcome.action != "duplicate" {
                    return Ok(outcome);
                }
                self.quote_paid(provider, provider_ref, None, amount_cents).await
            }
        }
    }

    async fn quote_paid(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        reference: Option<PaymentReference>,
        amount_cents: i64,
    ) -> Result<WebhookOutcome, ApiError> {
        match self
            .quotes
            .apply_payment_success(provider, provider_ref, reference, amount_cents)
            .await?
        {
            PaymentApplied::Applied(_) => Ok(WebhookOutcome::new("quote_advanced")),
            PaymentApplied::NeedsAttention(quote, issue) => {
                let detail = format!(
                    "quote total ${}, status {}",
                    quote.total_cents.map(format_cents).unwrap_or_default(),
                    quote.status
                );
                let reference = format!("catering quote for {}", quote.event_date);
                self.flag(provider, provider_ref, amount_cents, issue, &quote.customer_name, &quote.email, reference, detail)
                    .await;
                Ok(WebhookOutcome::new(issue.as_str()))
            }
            PaymentApplied::Duplicate => Ok(WebhookOutcome::new("duplicate")),
        }
    }

    async fn order_paid(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        order_hint: Option<uuid::Uuid>,
        amount_cents: i64,
    ) -> Result<WebhookOutcome, ApiError> {
        let order = match self
            .checkout
            .mark_paid(provider, provider_ref, order_hint, amount_cents)
            .await?
        {
            PaymentApplied::Applied(order) => order,
            PaymentApplied::NeedsAttention(order, issue) => {
                let detail = format!("order total ${}, status {}", format_cents(order.total_cents), order.status);
                let reference = format!("order {}", order.number());
                self.flag(provider, provider_ref, amount_cents, issue, &order.customer_name, &order.email, reference, detail)
                    .await;
                return Ok(WebhookOutcome::new(issue.as_str()));
            }
            PaymentApplied::Duplicate => return Ok(WebhookOutcome::new("duplicate")),
        };

        let v = order_vars(&order);
        futures::join!(
            self.notifications
                .notify(NotificationTrigger::OrderConfirmation, &order.email, v.clone()),
            self.notifications.notify_admin(NotificationTrigger::AdminNewOrder, v),
        );
        Ok(WebhookOutcome::new("order_paid"))
    }

    /// Tell staff about money that was captured but could not be applied
    #[allow(clippy::too_many_arguments)]
    async fn flag(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        amount_cents: i64,
        issue: PaymentIssue,
        customer_name: &str,
        email: &str,
        reference: String,
        detail: String,
    ) {
        let v = vars([
            ("provider", provider.to_string()),
            ("provider_ref", provider_ref.to_string()),
            ("amount", format_cents(amount_cents)),
            ("issue", issue.to_string()),
            ("customer_name", customer_name.to_string()),
            ("email", email.to_string()),
            ("reference", reference),
            ("detail", detail),
        ]);
        self.notifications
            .notify_admin(NotificationTrigger::AdminPaymentIssue, v)
            .await;
    }

    async fn failed(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        reference: Option<PaymentReference>,
        reason: &str,
    ) -> Result<WebhookOutcome, ApiError> {
        if let Some(PaymentReference::Quote { .. }) = reference {
            let quote = self
                .quotes
                .apply_payment_failure(provider, provider_ref, reference, reason)
                .await?;
            return Ok(WebhookOutcome::new(if quote.is_some() { "quote_payment_failed" } else { "duplicate" }));
        }

        let order_hint = match reference {
            Some(PaymentReference::Order(id)) => Some(id),
            _ => None,
        };
        match self.checkout.mark_failed(provider, provider_ref, order_hint).await? {
            Some(order) => {
                let mut v = order_vars(&order);
                v.insert("reference".to_string(), format!("order {}", order.number()));
                v.insert("reason".to_string(), reason.to_string());
                self.notifications
                    .notify(NotificationTrigger::PaymentFailed, &order.email, v)
                    .await;
                Ok(WebhookOutcome::new("order_payment_failed"))
            }
            None if reference.is_none() => {
                let quote = self
                    .quotes
                    .apply_payment_failure(provider, provider_ref, None, reason)
                    .await?;
                Ok(WebhookOutcome::new(if quote.is_some() { "quote_payment_failed" } else { "duplicate" }))
            }
            None => Ok(WebhookOutcome::new("duplicate")),
        }
    }
}
