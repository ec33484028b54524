use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult, ClientIp};
use crate::services::webhook_service::WebhookOutcome;
use crate::types::ProviderKind;

async fn receive(state: AppState, provider: ProviderKind, headers: HeaderMap, ip: ClientIp, body: Bytes) -> ApiResult<WebhookOutcome> {
    let outcome = state.webhooks().handle(provider, &headers, &body, ip.label()).await?;
    tracing::info!("{} webhook handled: {}", provider, outcome.action);
    Ok(ApiResponse::success(outcome))
}

/// POST /api/webhooks/stripe - raw body is needed for signature verification
pub async fn stripe(State(state): State<AppState>, headers: HeaderMap, ip: ClientIp, body: Bytes) -> ApiResult<WebhookOutcome> {
    receive(state, ProviderKind::Stripe, headers, ip, body).await
}

/// POST /api/webhooks/square
pub async fn square(State(state): State<AppState>, headers: HeaderMap, ip: ClientIp, body: Bytes) -> ApiResult<WebhookOutcome> {
    receive(state, ProviderKind::Square, headers, ip, body).await
}
