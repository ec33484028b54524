// handlers/mod.rs - two tiers: public (anonymous shoppers, webhooks) and admin (JWT)
pub mod admin;
pub mod public;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::cache_policy::{manifest, CacheManifest};
use crate::middleware::{ApiResponse, ApiResult};

/// GET / - service description
pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "Catering Storefront API",
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.config.environment,
            "payment_providers": state.payments.available(),
            "endpoints": {
                "products": "/api/products[/:slug]",
                "cart": "/api/cart, /api/cart/items[/:product_id] (session)",
                "checkout": "/api/checkout (session)",
                "quotes": "/api/quotes, /api/quotes/pay/:token",
                "uploads": "/api/uploads (session)",
                "webhooks": "/api/webhooks/stripe, /api/webhooks/square",
                "preferences": "/api/notifications/preferences?token=",
                "admin_login": "/auth/admin/login",
                "admin": "/api/admin/* (admin JWT)",
                "cache": "/cache-manifest",
            }
        }
    }))
}

/// GET /health - liveness plus database reachability
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok",
                    "email": state.notifications.transport_name(),
                }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": true,
                    "message": "database unavailable",
                    "code": "SERVICE_UNAVAILABLE",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                    }
                })),
            )
        }
    }
}

/// GET /cache-manifest - rule table consumed by the browser service worker
pub async fn cache_manifest() -> ApiResult<CacheManifest> {
    Ok(ApiResponse::success(manifest()))
}
