use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ListQuery;
use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::quotes::{Quote, QuoteStatus};
use crate::services::quote_service::ApprovedQuote;

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub total_cents: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentLink {
    pub quote_id: Uuid,
    pub payment_url: String,
}

/// GET /api/admin/quotes?status=
pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult<Vec<Quote>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<QuoteStatus>)
        .transpose()
        .map_err(|m| ApiError::invalid_field("status", m))?;
    let quotes = state.quotes().list(status, query.limit(), query.offset()).await?;
    Ok(ApiResponse::success(quotes))
}

/// GET /api/admin/quotes/:id
pub async fn show(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Quote> {
    Ok(ApiResponse::success(state.quotes().get(id).await?))
}

/// POST /api/admin/quotes/:id/approve - price the quote and email the deposit link
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> ApiResult<ApprovedQuote> {
    let approved = state.quotes().approve(id, body.total_cents).await?;
    Ok(ApiResponse::success(approved).no_store())
}

/// POST /api/admin/quotes/:id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelBody>>,
) -> ApiResult<Quote> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(ApiResponse::success(state.quotes().cancel(id, reason).await?))
}

/// GET /api/admin/quotes/:id/payment-link - reissue the link for whatever the quote owes now
pub async fn payment_link(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<PaymentLink> {
    let quotes = state.quotes();
    let quote = quotes.get(id).await?;
    let payment_url = quotes.payment_link(&quote)?;
    Ok(ApiResponse::success(PaymentLink { quote_id: id, payment_url }).no_store())
}
