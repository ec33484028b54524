use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::{validate_jwt, Claims, ADMIN_ROLE};
use crate::error::ApiError;
use crate::middleware::client_ip;
use crate::security::SecurityEventKind;

/// Authenticated admin extracted from the JWT
#[derive(Clone, Debug)]
pub struct AuthAdmin {
    pub id: Uuid,
    pub email: String,
    pub role: String,
}

impl From<Claims> for AuthAdmin {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

/// Protects `/api/admin/*`: requires a valid bearer JWT with the admin role
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&request).map(|ip| ip.to_string());

    let token = match extract_jwt_from_headers(&headers) {
        Ok(token) => token,
        Err(msg) => return Err(ApiError::unauthorized(msg)),
    };

    let claims = validate_jwt(&token, &state.config.security.jwt_secret).map_err(|e| {
        state
            .monitor
            .record(SecurityEventKind::AuthFailure, ip.clone(), format!("rejected admin token: {}", e));
        ApiError::unauthorized("Invalid or expired token")
    })?;

    if claims.role != ADMIN_ROLE {
        state.monitor.record(
            SecurityEventKind::AuthFailure,
            ip,
            format!("role '{}' attempted admin access", claims.role),
        );
        return Err(ApiError::forbidden("Admin role required"));
    }

    request.extensions_mut().insert(AuthAdmin::from(claims));
    Ok(next.run(request).await)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.trim().to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(extract_jwt_from_headers(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn rejects_missing_and_non_bearer() {
        assert!(extract_jwt_from_headers(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(extract_jwt_from_headers(&headers).is_err());

        headers.insert("authorization", "Bearer   ".parse().unwrap());
        assert!(extract_jwt_from_headers(&headers).is_err());
    }
}
