use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::app::AppState;
use crate::middleware::client_ip;
use crate::security::session::{fingerprint, session_cookie, token_from_cookie_header, SessionError};
use crate::security::{SecurityEventKind, SessionContext};

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

/// Attach a `SessionContext`, minting a session (and cookie) when the request lacks a valid one
pub async fn session_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let ip = client_ip(&request);
    let headers = request.headers();
    let fp = fingerprint(
        header_str(headers, header::USER_AGENT),
        header_str(headers, header::ACCEPT_LANGUAGE),
        ip,
    );
    let presented = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| token_from_cookie_header(v).map(str::to_string));

    let existing = match presented {
        Some(token) => match state.sessions.validate(&token, &fp, Utc::now()).await {
            Ok(session) => Some((token, session)),
            Err(SessionError::FingerprintMismatch) => {
                state.monitor.record(
                    SecurityEventKind::SessionHijackSuspected,
                    ip.map(|ip| ip.to_string()),
                    "session presented from a different client fingerprint",
                );
                None
            }
            Err(e) => {
                tracing::debug!("Discarding session cookie: {}", e);
                None
            }
        },
        None => None,
    };

    let context = match existing {
        Some((token, session)) => SessionContext {
            session_id: session.id,
            fingerprint: fp,
            token,
            issued_token: None,
        },
        None => {
            let (token, session) = state.sessions.create(fp.clone()).await;
            tracing::debug!("Started session {}", session.id);
            SessionContext {
                session_id: session.id,
                fingerprint: fp,
                token: token.clone(),
                issued_token: Some(token),
            }
        }
    };

    let issued = context.issued_token.clone();
    request.extensions_mut().insert(context);
    let mut response = next.run(request).await;

    if let Some(token) = issued {
        let cookie = session_cookie(
            &token,
            state.config.security.require_https,
            state.sessions.policy().absolute_lifetime,
        );
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!("Could not encode session cookie: {}", e),
        }
    }
    response
}
