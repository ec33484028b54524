use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use super::flag_injection;
use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ClientIp};
use crate::security::session::session_cookie;
use crate::security::SessionContext;
use crate::services::checkout_service::{CheckoutRequest, CheckoutResponse};

/// POST /api/checkout - turn the session cart into an order and open a provider payment
///
/// The response carries the provider's client secret or hosted checkout URL and is never cached.
/// A placed order rotates the session token; the cart identity carries over.
pub async fn checkout(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    ip: ClientIp,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    flag_injection(
        &state,
        ip.label(),
        "checkout",
        &[
            ("customer_name", &request.customer_name),
            ("notes", &request.notes),
            ("delivery_address", request.delivery_address.as_deref().unwrap_or("")),
        ],
    );

    let valid = request.validate()?;
    let response: CheckoutResponse = state.checkout().checkout(session.session_id, valid).await?;

    let fresh = state.sessions.rotate(&session.token).await?;
    let cookie = session_cookie(
        &fresh,
        state.config.security.require_https,
        state.sessions.policy().absolute_lifetime,
    );
    Ok(([(header::SET_COOKIE, cookie)], ApiResponse::created(response).no_store()))
}
