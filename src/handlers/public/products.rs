use axum::extract::{Path, Query, State};

use crate::app::AppState;
use crate::catalog::{Product, ProductFilter};
use crate::middleware::{ApiResponse, ApiResult};

/// GET /api/products - available products, filterable by category, catering flag and search text
pub async fn list(State(state): State<AppState>, Query(mut filter): Query<ProductFilter>) -> ApiResult<Vec<Product>> {
    filter.include_unavailable = false;
    let products = state.catalog().list(&filter).await?;
    Ok(ApiResponse::success(products))
}

/// GET /api/products/:slug
pub async fn show(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult<Product> {
    let product = state.catalog().get_by_slug(&slug).await?;
    Ok(ApiResponse::success(product))
}
