//! Catering quote workflow: request, approval, two-phase payment, cancellation.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::automation::{balance_reminder_at, follow_up_at, TaskKind};
use crate::database::DatabaseError;
use crate::notifications::{vars, DeliveryStatus, NotificationTrigger, TemplateVars};
use crate::payments::{PaymentApplied, PaymentIntent, PaymentIssue, PaymentReference, PaymentRegistry, PaymentRequest};
use crate::quotes::{split_deposit, Quote, QuoteError, QuoteRequest, QuoteStatus};
use crate::security::sanitize::sanitize_text;
use crate::security::tokens::{PaymentClaims, TokenSigner};
use crate::services::automation_service::{schedule_task, skip_pending_tasks};
use crate::services::notification_service::NotificationService;
use crate::types::{format_cents, PaymentPhase, ProviderKind};

const QUOTE_COLUMNS: &str = "id, customer_name, email, phone, event_date, guest_count, details, status, total_cents, \
                             deposit_cents, balance_cents, cancel_reason, approved_at, deposit_paid_at, completed_at, \
                             created_at, updated_at";

pub const MAX_QUOTE_TOTAL_CENTS: i64 = 100_000_000;

/// `quote_payments.status` values that mean the charge has been dealt with
const SETTLED_PAYMENT_STATUSES: &[&str] = &["succeeded", "underpaid", "needs_refund"];

#[derive(Debug, Serialize)]
pub struct ApprovedQuote {
    pub quote: Quote,
    pub payment_url: String,
}

/// What a payment link is for, shown before the customer pays
#[derive(Debug, Serialize)]
pub struct PaymentSummary {
    pub quote_id: Uuid,
    pub customer_name: String,
    pub event_date: NaiveDate,
    pub guest_count: i32,
    pub phase: PaymentPhase,
    pub amount_cents: i64,
    pub total_cents: Option<i64>,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
    pub providers: Vec<ProviderKind>,
}

#[derive(Debug, sqlx::FromRow)]
struct QuotePaymentRow {
    quote_id: Uuid,
    phase: String,
    status: String,
}

pub struct QuoteService {
    pool: PgPool,
    payments: PaymentRegistry,
    signer: TokenSigner,
    notifications: Arc<NotificationService>,
    deposit_percent: Decimal,
    link_ttl: Duration,
    public_url: String,
    currency: String,
}

fn quote_vars(quote: &Quote) -> TemplateVars {
    vars([
        ("customer_name", quote.customer_name.clone()),
        ("email", quote.email.clone()),
        ("phone", quote.phone.clone()),
        ("event_date", quote.event_date.format("%B %-d, %Y").to_string()),
        ("guest_count", quote.guest_count.to_string()),
        ("details", quote.details.clone()),
        ("total", quote.total_cents.map(format_cents).unwrap_or_default()),
        ("deposit", quote.deposit_cents.map(format_cents).unwrap_or_default()),
        ("balance", quote.balance_cents.map(format_cents).unwrap_or_default()),
    ])
}

impl QuoteService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        payments: PaymentRegistry,
        signer: TokenSigner,
        notifications: Arc<NotificationService>,
        deposit_percent: Decimal,
        link_ttl: Duration,
        public_url: &str,
        currency: String,
    ) -> Self {
        Self {
            pool,
            payments,
            signer,
            notifications,
            deposit_percent,
            link_ttl,
            public_url: public_url.trim_end_matches('/').to_string(),
            currency,
        }
    }

    pub async fn request(&self, request: QuoteRequest) -> Result<Quote, QuoteError> {
        let request = request.validate(Utc::now().date_naive())?;

        let sql = format!(
            r#"
            INSERT INTO quotes (id, customer_name, email, phone, event_date, guest_count, details, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {QUOTE_COLUMNS}
            "#
        );
        let quote = sqlx::query_as::<_, Quote>(&sql)
            .bind(Uuid::new_v4())
            .bind(&request.customer_name)
            .bind(&request.email)
            .bind(&request.phone)
            .bind(request.event_date)
            .bind(request.guest_count)
            .bind(&request.details)
            .bind(QuoteStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        tracing::info!("Quote {} requested for {} guests on {}", quote.id, quote.guest_count, quote.event_date);

        let v = quote_vars(&quote);
        self.notifications
            .notify(NotificationTrigger::QuoteReceived, &quote.email, v.clone())
            .await;
        self.notifications.notify_admin(NotificationTrigger::AdminNewQuote, v).await;

        Ok(quote)
    }

    pub async fn get(&self, id: Uuid) -> Result<Quote, QuoteError> {
        let sql = format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = $1");
        sqlx::query_as::<_, Quote>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?
            .ok_or(QuoteError::NotFound(id))
    }

    pub async fn list(&self, status: Option<QuoteStatus>, limit: i64, offset: i64) -> Result<Vec<Quote>, QuoteError> {
        let sql = format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY event_date ASC, created_at DESC LIMIT $2 OFFSET $3"
        );
        let quotes = sqlx::query_as::<_, Quote>(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(limit.clamp(1, 200))
            .bind(offset.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(quotes)
    }

    async fn lock(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, id: Uuid) -> Result<Quote, QuoteError> {
        let sql = format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Quote>(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(DatabaseError::from)?
            .ok_or(QuoteError::NotFound(id))
    }

    /// Price the quote, split the deposit, and send the customer a deposit link
    pub async fn approve(&self, id: Uuid, total_cents: i64) -> Result<ApprovedQuote, QuoteError> {
        if total_cents > MAX_QUOTE_TOTAL_CENTS {
            return Err(QuoteError::unacceptable("total_cents", "exceeds the maximum quote total"));
        }
        let (deposit, balance) = split_deposit(total_cents, self.deposit_percent)?;

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let current = self.lock(&mut tx, id).await?;
        let next = current.status()?.transition(QuoteStatus::Approved)?;

        let sql = format!(
            r#"
            UPDATE quotes
            SET status = $2, total_cents = $3, deposit_cents = $4, balance_cents = $5,
                approved_at = now(), updated_at = now()
            WHERE id = $1
            RETURNING {QUOTE_COLUMNS}
            "#
        );
        let quote = sqlx::query_as::<_, Quote>(&sql)
            .bind(id)
            .bind(next.as_str())
            .bind(total_cents)
            .bind(deposit)
            .bind(balance)
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from)?;
        tx.commit().await.map_err(DatabaseError::from)?;

        tracing::info!("Quote {} approved: total {} deposit {} balance {}", id, total_cents, deposit, balance);

        let approved_at = quote.approved_at.unwrap_or_else(Utc::now);
        if let Err(e) = schedule_task(&self.pool, TaskKind::QuoteFollowUp, id, follow_up_at(approved_at)).await {
            tracing::warn!("Could not schedule follow-up for quote {}: {}", id, e);
        }

        let payment_url = self.payment_link(&quote)?;
        let mut v = quote_vars(&quote);
        v.insert("payment_url".to_string(), payment_url.clone());
        self.notifications
            .notify(NotificationTrigger::QuoteApproved, &quote.email, v)
            .await;

        Ok(ApprovedQuote { quote, payment_url })
    }

    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<Quote, QuoteError> {
        let reason = reason.map(|r| sanitize_text(&r, 500)).filter(|r| !r.is_empty());

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let current = self.lock(&mut tx, id).await?;
        let next = current.status()?.transition(QuoteStatus::Cancelled)?;

        let sql = format!(
            "UPDATE quotes SET status = $2, cancel_reason = $3, updated_at = now() WHERE id = $1 RETURNING {QUOTE_COLUMNS}"
        );
        let quote = sqlx::query_as::<_, Quote>(&sql)
            .bind(id)
            .bind(next.as_str())
            .bind(&reason)
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from)?;
        tx.commit().await.map_err(DatabaseError::from)?;

        tracing::info!("Quote {} cancelled", id);
        if let Err(e) = skip_pending_tasks(&self.pool, id, None).await {
            tracing::warn!("Could not clear scheduled tasks for quote {}: {}", id, e);
        }

        let mut v = quote_vars(&quote);
        v.insert("reason".to_string(), reason.unwrap_or_default());
        self.notifications
            .notify(NotificationTrigger::QuoteCancelled, &quote.email, v)
            .await;

        Ok(quote)
    }

    /// Signed token for the charge the quote currently owes
    pub fn payment_token(&self, quote: &Quote) -> Result<String, QuoteError> {
        let (phase, amount) = quote.outstanding_payment()?;
        let claims = PaymentClaims::new(quote.id, phase, amount, self.link_ttl);
        Ok(self.signer.issue_payment_token(&claims))
    }

    pub fn payment_link(&self, quote: &Quote) -> Result<String, QuoteError> {
        Ok(format!("{}/quotes/pay/{}", self.public_url, self.payment_token(quote)?))
    }

    /// Verify a payment token against the quote's current state
    async fn resolve_token(&self, token: &str) -> Result<(Quote, PaymentClaims), QuoteError> {
        let claims = self.signer.verify_payment_token(token, Utc::now())?;
        let quote = self.get(claims.quote_id).await?;
        let (phase, amount) = quote.outstanding_payment()?;
        if claims.phase != phase {
            return Err(QuoteError::PaymentMismatch(format!(
                "quote {} expects {} but link is for {}",
                quote.id, phase, claims.phase
            )));
        }
        if claims.amount_cents != amount {
            return Err(QuoteError::PaymentMismatch(format!(
                "quote {} {} is {} but link says {}",
                quote.id, phase, amount, claims.amount_cents
            )));
        }
        Ok((quote, claims))
    }

    pub async fn describe_payment(&self, token: &str) -> Result<PaymentSummary, QuoteError> {
        let (quote, claims) = self.resolve_token(token).await?;
        Ok(PaymentSummary {
            quote_id: quote.id,
            customer_name: quote.customer_name,
            event_date: quote.event_date,
            guest_count: quote.guest_count,
            phase: claims.phase,
            amount_cents: claims.amount_cents,
            total_cents: quote.total_cents,
            currency: self.currency.clone(),
            expires_at: claims.expires_at,
            providers: self.payments.available(),
        })
    }

    /// Open a provider payment for the phase the token covers
    pub async fn pay(&self, token: &str, provider: ProviderKind) -> Result<PaymentIntent, QuoteError> {
        let (quote, claims) = self.resolve_token(token).await?;
        let gateway = self.payments.get(provider)?;

        let reference = PaymentReference::Quote {
            quote_id: quote.id,
            phase: claims.phase,
        };
        let request = PaymentRequest {
            reference,
            amount_cents: claims.amount_cents,
            currency: self.currency.clone(),
            description: format!("Catering {} for {}", claims.phase, quote.event_date),
            customer_email: Some(quote.email.clone()),
            idempotency_key: format!("quote-{}-{}-{}", quote.id, claims.phase, provider),
        };
        let intent = gateway.create_payment(&request).await?;

        sqlx::query(
            r#"
            INSERT INTO quote_payments (id, quote_id, phase, provider, provider_ref, amount_cents, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            ON CONFLICT (provider, provider_ref) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(quote.id)
        .bind(claims.phase.as_str())
        .bind(provider.as_str())
        .bind(&intent.provider_ref)
        .bind(claims.amount_cents)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        tracing::info!("Quote {} {} payment opened with {} ({})", quote.id, claims.phase, provider, intent.provider_ref);
        Ok(intent)
    }

    /// Advance the quote after a successful charge.
    ///
    /// Charges for cancelled quotes or short of the amount owed are recorded
    /// against the quote and flagged rather than rejected.
    pub async fn apply_payment_success(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        reference: Option<PaymentReference>,
        amount_cents: i64,
    ) -> Result<PaymentApplied<Quote>, QuoteError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        let payment = sqlx::query_as::<_, QuotePaymentRow>(
            "SELECT quote_id, phase, status FROM quote_payments WHERE provider = $1 AND provider_ref = $2 FOR UPDATE",
        )
        .bind(provider.as_str())
        .bind(provider_ref)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        let (quote_id, phase) = match (&payment, reference) {
            (Some(row), _) if SETTLED_PAYMENT_STATUSES.contains(&row.status.as_str()) => {
                tracing::debug!("Quote payment {} already recorded as {}", provider_ref, row.status);
                return Ok(PaymentApplied::Duplicate);
            }
            (Some(row), _) => (
                row.quote_id,
                row.phase
                    .parse::<PaymentPhase>()
                    .map_err(|e| QuoteError::Database(DatabaseError::QueryError(e)))?,
            ),
            // The webhook can arrive before `pay` has stored the provider reference
            (None, Some(PaymentReference::Quote { quote_id, phase })) => (quote_id, phase),
            _ => {
                tracing::warn!("Payment {} from {} matches no quote", provider_ref, provider);
                return Ok(PaymentApplied::Duplicate);
            }
        };

        let current = self.lock(&mut tx, quote_id).await?;
        let status = current.status()?;
        let issue = if status == QuoteStatus::Cancelled {
            Some(PaymentIssue::NeedsRefund)
        } else if status.expected_phase() != Some(phase) {
            tracing::info!("Quote {} is {}; {} payment {} is a duplicate", quote_id, status, phase, provider_ref);
            self.record_payment(&mut tx, &current, phase, provider, provider_ref, amount_cents, "succeeded")
                .await?;
            tx.commit().await.map_err(DatabaseError::from)?;
            return Ok(PaymentApplied::Duplicate);
        } else if amount_cents < current.outstanding_payment()?.1 {
            Some(PaymentIssue::Underpaid)
        } else {
            None
        };
        if let Some(issue) = issue {
            self.record_payment(&mut tx, &current, phase, provider, provider_ref, amount_cents, issue.as_str())
                .await?;
            tx.commit().await.map_err(DatabaseError::from)?;
            tracing::warn!(
                "Quote {} is {}; {} payment {} of {} cents flagged {}",
                quote_id,
                status,
                phase,
                provider_ref,
                amount_cents,
                issue
            );
            return Ok(PaymentApplied::NeedsAttention(current, issue));
        }

        let mut next = status.transition(QuoteStatus::after_payment(phase))?;
        // A 100% deposit leaves nothing to collect later
        if next == QuoteStatus::DepositPaid && current.balance_cents == Some(0) {
            next = next.transition(QuoteStatus::Completed)?;
        }

        let sql = format!(
            r#"
            UPDATE quotes
            SET status = $2,
                deposit_paid_at = CASE WHEN $3 THEN now() ELSE deposit_paid_at END,
                completed_at = CASE WHEN $4 THEN now() ELSE completed_at END,
                updated_at = now()
            WHERE id = $1
            RETURNING {QUOTE_COLUMNS}
            "#
        );
        let quote = sqlx::query_as::<_, Quote>(&sql)
            .bind(quote_id)
            .bind(next.as_str())
            .bind(phase == PaymentPhase::Deposit)
            .bind(next == QuoteStatus::Completed)
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from)?;
        self.record_payment(&mut tx, &quote, phase, provider, provider_ref, amount_cents, "succeeded")
            .await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        tracing::info!("Quote {} {} paid via {}; now {}", quote_id, phase, provider, next);
        self.after_payment(&quote, phase).await;
        Ok(PaymentApplied::Applied(quote))
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_payment(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        quote: &Quote,
        phase: PaymentPhase,
        provider: ProviderKind,
        provider_ref: &str,
        amount_cents: i64,
        status: &str,
    ) -> Result<(), QuoteError> {
        sqlx::query(
            r#"
            INSERT INTO quote_payments (id, quote_id, phase, provider, provider_ref, amount_cents, status, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            ON CONFLICT (provider, provider_ref)
            DO UPDATE SET status = EXCLUDED.status, amount_cents = EXCLUDED.amount_cents, completed_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(quote.id)
        .bind(phase.as_str())
        .bind(provider.as_str())
        .bind(provider_ref)
        .bind(amount_cents)
        .bind(status)
        .execute(&mut **tx)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    /// Follow-up work once money has landed; failures here are logged only
    async fn after_payment(&self, quote: &Quote, phase: PaymentPhase) {
        let mut v = quote_vars(quote);
        match phase {
            PaymentPhase::Deposit => {
                if let Err(e) = skip_pending_tasks(&self.pool, quote.id, Some(TaskKind::QuoteFollowUp)).await {
                    tracing::warn!("Could not clear follow-up for quote {}: {}", quote.id, e);
                }
                if quote.status().ok() == Some(QuoteStatus::DepositPaid) {
                    let run_at = balance_reminder_at(quote.event_date, Utc::now());
                    if let Err(e) = schedule_task(&self.pool, TaskKind::BalanceReminder, quote.id, run_at).await {
                        tracing::warn!("Could not schedule balance reminder for quote {}: {}", quote.id, e);
                    }
                    match self.payment_link(quote) {
                        Ok(url) => {
                            v.insert("payment_url".to_string(), url);
                        }
                        Err(e) => tracing::warn!("No balance link for quote {}: {}", quote.id, e),
                    }
                }
                self.notifications
                    .notify(NotificationTrigger::DepositReceived, &quote.email, v)
                    .await;
            }
            PaymentPhase::Balance => {
                if let Err(e) = skip_pending_tasks(&self.pool, quote.id, None).await {
                    tracing::warn!("Could not clear tasks for quote {}: {}", quote.id, e);
                }
                self.notifications
                    .notify(NotificationTrigger::BalanceReceived, &quote.email, v)
                    .await;
            }
        }
    }

    pub async fn apply_payment_failure(
        &self,
        provider: ProviderKind,
        provider_ref: &str,
        reference: Option<PaymentReference>,
        reason: &str,
    ) -> Result<Option<Quote>, QuoteError> {
        let row = sqlx::query_as::<_, QuotePaymentRow>(
            r#"
            UPDATE quote_payments SET status = 'failed'
            WHERE provider = $1 AND provider_ref = $2 AND status = 'pending'
            RETURNING quote_id, phase, status
            "#,
        )
        .bind(provider.as_str())
        .bind(provider_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        let quote_id = match (row, reference) {
            (Some(row), _) => row.quote_id,
            (None, Some(PaymentReference::Quote { quote_id, .. })) => quote_id,
            _ => return Ok(None),
        };

        let quote = self.get(quote_id).await?;
        tracing::warn!("Quote {} payment {} failed: {}", quote.id, provider_ref, reason);

        let mut v = quote_vars(&quote);
        v.insert("reference".to_string(), "your catering order".to_string());
        v.insert("reason".to_string(), reason.to_string());
        self.notifications
            .notify(NotificationTrigger::PaymentFailed, &quote.email, v)
            .await;
        Ok(Some(quote))
    }

    /// Send the reminder or follow-up a scheduled task stands for.
    ///
    /// Returns `None` when the quote has moved on and the task no longer applies.
    pub async fn send_scheduled(&self, kind: TaskKind, quote_id: Uuid) -> Result<Option<DeliveryStatus>, QuoteError> {
        let quote = self.get(quote_id).await?;
        let status = quote.status()?;
        let (trigger, due_status) = match kind {
            TaskKind::QuoteFollowUp => (NotificationTrigger::QuoteFollowUp, QuoteStatus::Approved),
            TaskKind::BalanceReminder => (NotificationTrigger::BalanceReminder, QuoteStatus::DepositPaid),
        };
        if status != due_status {
            return Ok(None);
        }

        let mut v = quote_vars(&quote);
        v.insert("payment_url".to_string(), self.payment_link(&quote)?);
        Ok(Some(self.notifications.notify(trigger, &quote.email, v).await))
    }
}
