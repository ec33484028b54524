use axum::extract::{Path, Query, State};
use uuid::Uuid;

use super::ListQuery;
use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::checkout_service::{Order, OrderStatus};

/// GET /api/admin/orders?status=
pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> ApiResult<Vec<Order>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()
        .map_err(|m| ApiError::invalid_field("status", m))?;
    let orders = state.checkout().list_orders(status, query.limit(), query.offset()).await?;
    Ok(ApiResponse::success(orders))
}

/// POST /api/admin/orders/:id/fulfil
pub async fn fulfil(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Order> {
    Ok(ApiResponse::success(state.checkout().fulfil(id).await?))
}

/// POST /api/admin/orders/:id/cancel
pub async fn cancel(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Order> {
    Ok(ApiResponse::success(state.checkout().cancel(id).await?))
}
