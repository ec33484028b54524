use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::client_ip;
use crate::security::{Decision, RateScope, SecurityEventKind};

/// The tighter bucket a request draws from in addition to the general one
pub fn scope_for(method: &Method, path: &str) -> Option<RateScope> {
    if *method != Method::POST {
        return None;
    }
    match path {
        "/api/checkout" => Some(RateScope::Checkout),
        "/api/quotes" => Some(RateScope::QuoteRequest),
        "/api/uploads" => Some(RateScope::Upload),
        "/auth/admin/login" => Some(RateScope::AdminLogin),
        _ => None,
    }
}

pub async fn rate_limit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let limiter = &state.rate_limiter;
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let ip = client_ip(&request);
    let key = ip.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string());
    let path = request.uri().path().to_string();

    let mut scopes = vec![RateScope::Api];
    if let Some(scope) = scope_for(request.method(), &path) {
        scopes.insert(0, scope);
    }

    for scope in scopes {
        if let Decision::Limited { retry_after_secs } = limiter.check(scope, &key).await {
            state.monitor.record(
                SecurityEventKind::RateLimited,
                ip.map(|ip| ip.to_string()),
                format!("{} limit hit on {}", scope.as_str(), path),
            );
            return ApiError::too_many_requests("Too many requests, please slow down", retry_after_secs)
                .into_response();
        }
    }

    next.run(request).await
}
