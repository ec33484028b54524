// Public tier: no JWT. Shopper routes get a `SessionContext` from the session middleware.
pub mod auth;
pub mod cart;
pub mod checkout;
pub mod notifications;
pub mod products;
pub mod quotes;
pub mod uploads;
pub mod webhooks;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{extract::State, Extension};
use serde::Serialize;

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult};
use crate::security::sanitize::contains_injection_pattern;
use crate::security::session::session_cookie;
use crate::security::{SecurityEventKind, SessionContext};

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub new_session: bool,
    pub idle_timeout_secs: i64,
    pub absolute_lifetime_secs: i64,
}

/// GET /api/session - bootstrap the shopper session cookie
pub async fn session_info(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> ApiResult<SessionInfo> {
    let policy = state.sessions.policy();
    Ok(ApiResponse::success(SessionInfo {
        new_session: session.issued_token.is_some(),
        idle_timeout_secs: policy.idle_timeout.num_seconds(),
        absolute_lifetime_secs: policy.absolute_lifetime.num_seconds(),
    })
    .no_store())
}

/// DELETE /api/session - forget the shopper session and expire the cookie
pub async fn end_session(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> impl IntoResponse {
    if state.sessions.revoke(&session.token).await {
        tracing::debug!("Ended session {}", session.session_id);
    }
    let cookie = session_cookie("", state.config.security.require_https, chrono::Duration::zero());
    ([(header::SET_COOKIE, cookie)], StatusCode::NO_CONTENT)
}

/// Record free-text fields that look like script or SQL injection.
///
/// Input is sanitized regardless; this only feeds the security monitor.
pub(crate) fn flag_injection(state: &AppState, ip: Option<String>, route: &str, fields: &[(&str, &str)]) {
    for (name, value) in fields {
        if contains_injection_pattern(value) {
            state.monitor.record(
                SecurityEventKind::InjectionAttempt,
                ip.clone(),
                format!("{}: suspicious content in '{}'", route, name),
            );
        }
    }
}
