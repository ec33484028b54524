use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::catalog::{NewProduct, Product, ProductFilter, ProductUpdate};
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Deserialize)]
pub struct AvailabilityBody {
    pub is_available: bool,
}

/// GET /api/admin/products - same filters as the storefront, hidden items included
pub async fn list(State(state): State<AppState>, Query(mut filter): Query<ProductFilter>) -> ApiResult<Vec<Product>> {
    filter.include_unavailable = true;
    Ok(ApiResponse::success(state.catalog().list(&filter).await?))
}

/// POST /api/admin/products
pub async fn create(State(state): State<AppState>, Json(input): Json<NewProduct>) -> ApiResult<Product> {
    let product = state.catalog().create(input).await?;
    tracing::info!("Created product {} ({})", product.slug, product.id);
    Ok(ApiResponse::created(product))
}

/// PUT /api/admin/products/:id
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<ProductUpdate>,
) -> ApiResult<Product> {
    Ok(ApiResponse::success(state.catalog().update(id, update).await?))
}

/// PUT /api/admin/products/:id/availability
pub async fn set_availability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AvailabilityBody>,
) -> ApiResult<Product> {
    let product = state.catalog().set_availability(id, body.is_available).await?;
    Ok(ApiResponse::success(product))
}
