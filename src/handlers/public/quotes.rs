use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::flag_injection;
use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, ClientIp};
use crate::payments::PaymentIntent;
use crate::quotes::QuoteRequest;
use crate::services::quote_service::PaymentSummary;
use crate::types::ProviderKind;

/// What a customer gets back after requesting a quote; the full record stays admin-only
#[derive(Debug, Serialize)]
pub struct QuoteReceipt {
    pub id: Uuid,
    pub status: String,
    pub event_date: chrono::NaiveDate,
    pub guest_count: i32,
}

#[derive(Debug, Deserialize)]
pub struct PayBody {
    pub provider: String,
}

/// POST /api/quotes - request a catering quote
pub async fn request_quote(
    State(state): State<AppState>,
    ip: ClientIp,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<QuoteReceipt> {
    flag_injection(
        &state,
        ip.label(),
        "quote request",
        &[("customer_name", &request.customer_name), ("details", &request.details)],
    );

    let quote = state.quotes().request(request).await?;
    Ok(ApiResponse::created(QuoteReceipt {
        id: quote.id,
        status: quote.status,
        event_date: quote.event_date,
        guest_count: quote.guest_count,
    }))
}

/// GET /api/quotes/pay/:token - what the payment link is for
pub async fn describe_payment(State(state): State<AppState>, Path(token): Path<String>) -> ApiResult<PaymentSummary> {
    let summary = state.quotes().describe_payment(&token).await?;
    Ok(ApiResponse::success(summary).no_store())
}

/// POST /api/quotes/pay/:token - open a provider payment for the linked phase
pub async fn pay(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<PayBody>,
) -> ApiResult<PaymentIntent> {
    let provider: ProviderKind = body.provider.parse().map_err(|m: String| ApiError::invalid_field("provider", m))?;
    let intent = state.quotes().pay(&token, provider).await?;
    Ok(ApiResponse::created(intent).no_store())
}
