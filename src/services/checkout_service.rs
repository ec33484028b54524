//! Retail checkout: re-price the cart, record the order, open a provider payment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::cart::{totals_for, CartError, CartItem, CartTotals, Pricing};
use crate::catalog::CatalogError;
use crate::database::DatabaseError;
use crate::payments::{
    PaymentApplied, PaymentError, PaymentIntent, PaymentIssue, PaymentReference, PaymentRegistry, PaymentRequest,
};
use crate::security::sanitize::{normalize_phone, sanitize_line, sanitize_text, validate_email};
use crate::services::cart_service::CartService;
use crate::services::catalog_service::CatalogService;
use crate::types::{Fulfilment, ProviderKind};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("invalid {field}: {message}")]
    Invalid { field: String, message: String },
    #[error("order {0} not found")]
    OrderNotFound(Uuid),
    #[error("order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error(transparent)]
    Cart(#[from] CartError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for CheckoutError {
    fn from(err: sqlx::Error) -> Self {
        CheckoutError::Database(DatabaseError::from(err))
    }
}

impl CheckoutError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        CheckoutError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Fulfilled,
    Cancelled,
    PaymentFailed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Fulfilled => "fulfilled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::PaymentFailed => "payment_failed",
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (PendingPayment, Paid)
                | (PendingPayment, PaymentFailed)
                | (PendingPayment, Cancelled)
                // A retried card can still succeed after a failed attempt
                | (PaymentFailed, Paid)
                | (PaymentFailed, Cancelled)
                | (Paid, Fulfilled)
        )
    }

    pub fn transition(self, next: OrderStatus) -> Result<OrderStatus, CheckoutError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CheckoutError::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(OrderStatus::PendingPayment),
            "paid" => Ok(OrderStatus::Paid),
            "fulfilled" => Ok(OrderStatus::Fulfilled),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "payment_failed" => Ok(OrderStatus::PaymentFailed),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub session_id: Option<Uuid>,
    pub customer_name: String,
    pub email: String,
    pub phone: String,
    pub fulfilment: String,
    pub delivery_address: Option<String>,
    pub notes: String,
    pub status: String,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub delivery_fee_cents: i64,
    pub total_cents: i64,
    /// Amount the provider reported as captured
    pub paid_cents: Option<i64>,
    pub payment_issue: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn status(&self) -> Result<OrderStatus, CheckoutError> {
        self.status
            .parse()
            .map_err(|e: String| CheckoutError::Database(DatabaseError::QueryError(e)))
    }

    pub fn number(&self) -> String {
        order_number(self.id)
    }
}

/// Short human-facing order number
pub fn order_number(id: Uuid) -> String {
    id.simple().to_string()[..8].to_ascii_uppercase()
}

const ORDER_COLUMNS: &str = "id, session_id, customer_name, email, phone, fulfilment, delivery_address, notes, \
                             status, provider, provider_ref, subtotal_cents, tax_cents, delivery_fee_cents, \
                             total_cents, paid_cents, payment_issue, paid_at, created_at, updated_at";

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub customer_name: String,
    pub email: String,
    pub phone: String,
    pub fulfilment: Fulfilment,
    pub delivery_address: Option<String>,
    #[serde(default)]
    pub notes: String,
    pub provider: String,
}

/// `CheckoutRequest` after sanitization
#[derive(Debug, Clone)]
pub struct ValidCheckout {
    pub customer_name: String,
    pub email: String,
    pub phone: String,
    pub fulfilment: Fulfilment,
    pub delivery_address: Option<String>,
    pub notes: String,
    pub provider: ProviderKind,
}

impl CheckoutRequest {
    pub fn validate(self) -> Result<ValidCheckout, CheckoutError> {
        let customer_name = sanitize_line(&self.customer_name, 120);
        if customer_name.is_empty() {
            return Err(CheckoutError::invalid("customer_name", "is required"));
        }
        let email = validate_email(&self.email).map_err(|m| CheckoutError::invalid("email", m))?;
        let phone = normalize_phone(&self.phone).map_err(|m| CheckoutError::invalid("phone", m))?;
        let provider: ProviderKind = self.provider.parse().map_err(|m: String| CheckoutError::invalid("provider", m))?;

        let delivery_address = self
            .delivery_address
            .map(|a| sanitize_text(&a, 300))
            .filter(|a| !a.is_empty());
        if self.fulfilment == Fulfilment::Delivery && delivery_address.is_none() {
            return Err(CheckoutError::invalid("delivery_address", "is required for delivery"));
        }

        Ok(ValidCheckout {
            customer_name,
            email,
            phone,
            fulfilment: self.fulfilment,
            delivery_address,
            notes: sanitize_text(&self.notes, 1000),
            provider,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub totals: CartTotals,
    pub payment: PaymentIntent,
}

/// Rebuild cart lines from current catalog rows; stale or withdrawn items fail the checkout
pub fn reprice(lines: &[CartItem], products: &[crate::catalog::Product]) -> Result<Vec<CartItem>, CheckoutError> {
    lines
        .iter()
        .map(|line| -> Result<CartItem, CheckoutError> {
            let product = products
                .iter()
                .find(|p| p.id == line.product_id)
                .filter(|p| p.is_available)
                .ok_or_else(|| CatalogError::Unavailable(line.name.clone()))?;
            if line.quantity < product.min_quantity {
                return Err(CartError::BelowMinimum {
                    name: product.name.clone(),
                    min: product.min_quantity,
                }
                .into());
            }
            Ok(CartItem {
                product_id: product.id,
                name: product.name.clone(),
                unit_price_cents: product.price_cents,
                quantity: line.quantity,
                min_quantity: product.min_quantity,
                notes: line.notes.clone(),
            })
        })
        .collect()
}

/// Decide what a captured charge does to an order in `status`
pub fn settle_payment(
    status: OrderStatus,
    already_recorded: bool,
    amount_cents: i64,
    total_cents: i64,
) -> Result<PaymentApplied<OrderStatus>, CheckoutError> {
    if already_recorded || matches!(status, OrderStatus::Paid | OrderStatus::Fulfilled) {
        return Ok(PaymentApplied::Duplicate);
    }
    if status == OrderStatus::Cancelled {
        return Ok(PaymentApplied::NeedsAttention(status, PaymentIssue::NeedsRefund));
    }
    if amount_cents < total_cents {
        return Ok(PaymentApplied::NeedsAttention(status, PaymentIssue::Underpaid));
    }
    Ok(PaymentApplied::Applied(status.transition(OrderStatus::Paid)?))
}

pub struct CheckoutService {
    pool: PgPool,
    payments: PaymentRegistry,
    pricing: Pricing,
    currency: String,
}

impl CheckoutService {
    pub fn new(pool: PgPool, payments: PaymentRegistry, pricing: Pricing, currency: String) -> Self {
        Self {
            pool,
            payments,
            pricing,
            currency,
        }
    }

    pub async fn checkout(&self, session_id: Uuid, request: ValidCheckout) -> Result<CheckoutResponse, CheckoutError> {
        let provider = self.payments.get(request.provider)?;

        let cart = CartService::new(self.pool.clone()).load(session_id).await?;
        if cart.is_empty() {
            return Err(CartError::Empty.into());
        }
        let ids: Vec<Uuid> = cart.items.iter().map(|l| l.product_id).collect();
        let products = CatalogService::new(self.pool.clone()).get_many(&ids).await?;
        let items = reprice(&cart.items, &products)?;
        let totals = totals_for(&items, &self.pricing, request.fulfilment);

        let order_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, session_id, customer_name, email, phone, fulfilment, delivery_address, notes, status,
                 provider, subtotal_cents, tax_cents, delivery_fee_cents, total_cents)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order_id)
        .bind(session_id)
        .bind(&request.customer_name)
        .bind(&request.email)
        .bind(&request.phone)
        .bind(request.fulfilment.as_str())
        .bind(&request.delivery_address)
        .bind(&request.notes)
        .bind(OrderStatus::PendingPayment.as_str())
        .bind(request.provider.as_str())
        .bind(totals.subtotal_cents)
        .bind(totals.tax_cents)
        .bind(totals.delivery_fee_cents)
        .bind(totals.total_cents)
        .execute(&mut *tx)
        .await?;

        for item in &items {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, name, unit_price_cents, quantity, notes)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(order_id)
            .bind(item.product_id)
            .bind(&item.name)
            .bind(item.unit_price_cents)
            .bind(item.quantity)
            .bind(&item.notes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let payment_request = PaymentRequest {
            reference: PaymentReference::Order(order_id),
            amount_cents: totals.total_cents,
            currency: self.currency.clone(),
            description: format!("Order {}", order_number(order_id)),
            customer_email: Some(request.email.clone()),
            idempotency_key: format!("order-{}", order_id),
        };

        let intent = match provider.create_payment(&payment_request).await {
            Ok(intent) => intent,
            Err(e) => {
                self.set_status(order_id, OrderStatus::PaymentFailed).await?;
                return Err(e.into());
            }
        };

        sqlx::query("UPDATE orders SET provider_ref = $2, updated_at = now() WHERE id = $1")
            .bind(order_id)
            .bind(&intent.provider_ref)
            .execute(&self.pool)
            .await?;

        tracing::info!(
            "Order {} created: {} cents via {} ({})",
            order_id,
            totals.total_cents,
            provider.name(),
            intent.provider_ref
        );

        Ok(CheckoutResponse {
            order_id,
            order_number: order_number(order_id),
            status: OrderStatus::PendingPayment,
            totals,
            payment: intent,
        })
    }

    /// Locate the order a webhook refers to, by provider reference or the id carried in metadata
    async fn lock_order(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        provider: ProviderKind,
        provider_ref: &str,
        order_hint: Option<Uuid>,
    ) -> Result<Option<Order>, CheckoutError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE provider = $1 AND (provider_ref = $2 OR id = $3) LIMIT 1 FOR UPDATE"
        );
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(provider.as_str())
            .bind(provider_ref)
            .bind(order_hint)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(order)
    }

    /// Apply a captured charge to its order.
    ///
    /// Charges against cancelled orders and short payments are stored on the
    /// order and flagged instead of failing, so the provider stops retrying.
    pub async fn mark_paid(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        order_hint: Option<Uuid>,
        amount_cents: i64,
    ) -> Result<PaymentApplied<Order>, CheckoutError> {
        let mut tx = self.pool.begin().await?;
        let Some(order) = self.lock_order(&mut tx, provider, provider_ref, order_hint).await? else {
            tracing::warn!("Payment {} from {} matches no order", provider_ref, provider);
            return Ok(PaymentApplied::Duplicate);
        };

        let recorded = order.paid_cents.is_some() && order.provider_ref.as_deref() == Some(provider_ref);
        let (next, issue) = match settle_payment(order.status()?, recorded, amount_cents, order.total_cents)? {
            PaymentApplied::Duplicate => {
                tracing::debug!("Order {} already settled; ignoring duplicate webhook", order.id);
                return Ok(PaymentApplied::Duplicate);
            }
            PaymentApplied::Applied(next) => (next, None),
            PaymentApplied::NeedsAttention(current, issue) => (current, Some(issue)),
        };

        let sql = format!(
            "UPDATE orders SET status = $2, provider_ref = $3, paid_cents = $4, payment_issue = $5, \
             paid_at = now(), updated_at = now() WHERE id = $1 RETURNING {ORDER_COLUMNS}"
        );
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(order.id)
            .bind(next.as_str())
            .bind(provider_ref)
            .bind(amount_cents)
            .bind(issue.map(|i| i.as_str()))
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        if let Some(issue) = issue {
            tracing::warn!(
                "Order {} is {} but captured {} of {} cents; flagged {}",
                order.id,
                next,
                amount_cents,
                order.total_cents,
                issue
            );
            return Ok(PaymentApplied::NeedsAttention(order, issue));
        }

        if let Some(session_id) = order.session_id {
            if let Err(e) = CartService::new(self.pool.clone()).clear(session_id).await {
                tracing::warn!("Could not clear cart for order {}: {}", order.id, e);
            }
        }

        tracing::info!("Order {} paid ({} cents)", order.id, order.total_cents);
        Ok(PaymentApplied::Applied(order))
    }

    pub async fn mark_failed(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        order_hint: Option<Uuid>,
    ) -> Result<Option<Order>, CheckoutError> {
        let mut tx = self.pool.begin().await?;
        let Some(order) = self.lock_order(&mut tx, provider, provider_ref, order_hint).await? else {
            tracing::warn!("Failed payment {} from {} matches no order", provider_ref, provider);
            return Ok(None);
        };
        if order.status()? != OrderStatus::PendingPayment {
            return Ok(None);
        }

        let sql = format!(
            "UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 RETURNING {ORDER_COLUMNS}"
        );
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(order.id)
            .bind(OrderStatus::PaymentFailed.as_str())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::warn!("Payment failed for order {}", order.id);
        Ok(Some(order))
    }

    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Order>, CheckoutError> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit.clamp(1, 200))
            .bind(offset.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(orders)
    }

    pub async fn fulfil(&self, id: Uuid) -> Result<Order, CheckoutError> {
        let order = self.set_status(id, OrderStatus::Fulfilled).await?;
        tracing::info!("Order {} fulfilled", id);
        Ok(order)
    }

    pub async fn cancel(&self, id: Uuid) -> Result<Order, CheckoutError> {
        let order = self.set_status(id, OrderStatus::Cancelled).await?;
        tracing::info!("Order {} cancelled", id);
        Ok(order)
    }

    async fn set_status(&self, id: Uuid, next: OrderStatus) -> Result<Order, CheckoutError> {
        let mut tx = self.pool.begin().await?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(CheckoutError::OrderNotFound(id))?;
        order.status()?.transition(next)?;

        let sql = format!("UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 RETURNING {ORDER_COLUMNS}");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .bind(next.as_str())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Product;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            customer_name: "Lee".into(),
            email: "LEE@example.com".into(),
            phone: "+1 555 010 9999".into(),
            fulfilment: Fulfilment::Pickup,
            delivery_address: None,
            notes: String::new(),
            provider: "Stripe".into(),
        }
    }

    fn product(price_cents: i64, min_quantity: i32) -> Product {
        Product {
            id: Uuid::new_v4(),
            slug: "tray".into(),
            name: "Tray".into(),
            description: String::new(),
            category: "catering".into(),
            price_cents,
            image_url: None,
            is_available: true,
            is_catering: min_quantity > 1,
            min_quantity,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(product: &Product, quantity: i32, stale_price: i64) -> CartItem {
        CartItem {
            product_id: product.id,
            name: product.name.clone(),
            unit_price_cents: stale_price,
            quantity,
            min_quantity: 1,
            notes: String::new(),
        }
    }

    #[test]
    fn validates_checkout_request() {
        let valid = request().validate().unwrap();
        assert_eq!(valid.email, "lee@example.com");
        assert_eq!(valid.provider, ProviderKind::Stripe);

        let mut r = request();
        r.provider = "paypal".into();
        assert!(matches!(r.validate(), Err(CheckoutError::Invalid { field, .. }) if field == "provider"));

        let mut r = request();
        r.fulfilment = Fulfilment::Delivery;
        assert!(matches!(r.validate(), Err(CheckoutError::Invalid { field, .. }) if field == "delivery_address"));
    }

    #[test]
    fn reprices_from_catalog() {
        let tray = product(9000, 1);
        let items = reprice(&[line(&tray, 2, 100)], &[tray.clone()]).unwrap();
        assert_eq!(items[0].unit_price_cents, 9000);
        assert_eq!(items[0].line_total_cents(), 18000);
    }

    #[test]
    fn reprice_rejects_withdrawn_or_below_minimum() {
        let mut tray = product(9000, 1);
        let cart = [line(&tray, 2, 9000)];
        assert!(matches!(reprice(&cart, &[]), Err(CheckoutError::Catalog(CatalogError::Unavailable(_)))));

        tray.is_available = false;
        assert!(reprice(&cart, &[tray.clone()]).is_err());

        tray.is_available = true;
        tray.min_quantity = 10;
        assert!(matches!(reprice(&cart, &[tray]), Err(CheckoutError::Cart(CartError::BelowMinimum { min: 10, .. }))));
    }

    #[test]
    fn order_status_transitions() {
        use OrderStatus::*;
        assert!(PendingPayment.can_transition_to(Paid));
        assert!(PaymentFailed.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Fulfilled));
        assert!(!Paid.can_transition_to(Cancelled));
        assert!(!Fulfilled.can_transition_to(Paid));
        assert!(matches!(PendingPayment.transition(Fulfilled), Err(CheckoutError::InvalidTransition { .. })));
        assert_eq!("payment_failed".parse::<OrderStatus>().unwrap(), PaymentFailed);
    }

    #[test]
    fn captured_charges_settle_by_order_state() {
        use OrderStatus::*;
        assert!(matches!(settle_payment(PendingPayment, false, 4200, 4200), Ok(PaymentApplied::Applied(Paid))));
        assert!(matches!(settle_payment(PaymentFailed, false, 5000, 4200), Ok(PaymentApplied::Applied(Paid))));
        assert!(matches!(settle_payment(Paid, false, 4200, 4200), Ok(PaymentApplied::Duplicate)));
        assert!(matches!(settle_payment(Fulfilled, false, 4200, 4200), Ok(PaymentApplied::Duplicate)));
        assert!(matches!(
            settle_payment(Cancelled, false, 4200, 4200),
            Ok(PaymentApplied::NeedsAttention(Cancelled, PaymentIssue::NeedsRefund))
        ));
        assert!(matches!(
            settle_payment(PendingPayment, false, 4100, 4200),
            Ok(PaymentApplied::NeedsAttention(PendingPayment, PaymentIssue::Underpaid))
        ));
        // A redelivered flagged charge is not flagged twice
        assert!(matches!(settle_payment(Cancelled, true, 4200, 4200), Ok(PaymentApplied::Duplicate)));
    }
}
