//! Catering quotes and their two-phase (deposit, then balance) payment lifecycle.

pub mod status;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use crate::cart::apply_rate;
use crate::database::DatabaseError;
use crate::payments::PaymentError;
use crate::security::sanitize::{normalize_phone, sanitize_line, sanitize_text, validate_email};
use crate::security::tokens::TokenError;
use crate::types::PaymentPhase;

pub use status::QuoteStatus;

pub const MAX_GUESTS: i32 = 5000;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("quote {0} not found")]
    NotFound(Uuid),
    #[error("quote cannot move from {from} to {to}")]
    InvalidTransition { from: QuoteStatus, to: QuoteStatus },
    #[error("quote is {0} and has nothing to pay")]
    NotPayable(QuoteStatus),
    #[error("payment does not match quote: {0}")]
    PaymentMismatch(String),
    #[error("invalid {field}: {message}")]
    Invalid { field: String, message: String },
    /// Well-formed, but not something the kitchen can take on
    #[error("cannot accept {field}: {message}")]
    Unacceptable { field: String, message: String },
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl QuoteError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        QuoteError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn unacceptable(field: &str, message: impl Into<String>) -> Self {
        QuoteError::Unacceptable {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Row in `quotes`; `status` is kept as text and parsed on demand
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Quote {
    pub id: Uuid,
    pub customer_name: String,
    pub email: String,
    pub phone: String,
    pub event_date: NaiveDate,
    pub guest_count: i32,
    pub details: String,
    pub status: String,
    pub total_cents: Option<i64>,
    pub deposit_cents: Option<i64>,
    pub balance_cents: Option<i64>,
    pub cancel_reason: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub deposit_paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn status(&self) -> Result<QuoteStatus, QuoteError> {
        self.status
            .parse()
            .map_err(|e: String| QuoteError::Database(DatabaseError::QueryError(e)))
    }

    /// The charge currently owed, if any: phase and amount
    pub fn outstanding_payment(&self) -> Result<(PaymentPhase, i64), QuoteError> {
        let status = self.status()?;
        let phase = status.expected_phase().ok_or(QuoteError::NotPayable(status))?;
        let amount = match phase {
            PaymentPhase::Deposit => self.deposit_cents,
            PaymentPhase::Balance => self.balance_cents,
        };
        let amount = amount.ok_or_else(|| QuoteError::PaymentMismatch(format!("quote {} has no {} amount", self.id, phase)))?;
        Ok((phase, amount))
    }
}

/// Customer request for a catering quote
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRequest {
    pub customer_name: String,
    pub email: String,
    pub phone: String,
    pub event_date: NaiveDate,
    pub guest_count: i32,
    #[serde(default)]
    pub details: String,
}

impl QuoteRequest {
    /// Sanitize every field; `today` is the earliest date that is still too soon
    pub fn validate(self, today: NaiveDate) -> Result<QuoteRequest, QuoteError> {
        let customer_name = sanitize_line(&self.customer_name, 120);
        if customer_name.is_empty() {
            return Err(QuoteError::invalid("customer_name", "is required"));
        }
        let email = validate_email(&self.email).map_err(|m| QuoteError::invalid("email", m))?;
        let phone = normalize_phone(&self.phone).map_err(|m| QuoteError::invalid("phone", m))?;
        if self.event_date <= today {
            return Err(QuoteError::unacceptable("event_date", "must be in the future"));
        }
        if !(1..=MAX_GUESTS).contains(&self.guest_count) {
            return Err(QuoteError::unacceptable("guest_count", format!("must be between 1 and {}", MAX_GUESTS)));
        }

        Ok(QuoteRequest {
            customer_name,
            email,
            phone,
            event_date: self.event_date,
            guest_count: self.guest_count,
            details: sanitize_text(&self.details, 4000),
        })
    }
}

/// Split an approved total into deposit and balance.
///
/// The deposit is `total * percent / 100` rounded half away from zero; the
/// balance takes the remainder so the two always sum to the total.
pub fn split_deposit(total_cents: i64, deposit_percent: Decimal) -> Result<(i64, i64), QuoteError> {
    if total_cents <= 0 {
        return Err(QuoteError::invalid("total_cents", "must be positive"));
    }
    if deposit_percent <= Decimal::ZERO || deposit_percent > Decimal::from(100) {
        return Err(QuoteError::invalid("deposit_percent", "must be in (0, 100]"));
    }
    let deposit = apply_rate(total_cents, deposit_percent / Decimal::from(100));
    Ok((deposit, total_cents - deposit))
}
