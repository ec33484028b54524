use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::{login, AuthError};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, ClientIp};
use crate::security::SecurityEventKind;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: u64,
    pub admin: AdminSummary,
}

#[derive(Debug, Serialize)]
pub struct AdminSummary {
    pub id: Uuid,
    pub email: String,
}

/// POST /auth/admin/login - exchange admin credentials for a JWT
pub async fn admin_login(
    State(state): State<AppState>,
    ip: ClientIp,
    Json(body): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::bad_request("email and password are required"));
    }

    let security = &state.config.security;
    match login(
        state.db.pool(),
        &body.email,
        &body.password,
        &security.jwt_secret,
        security.jwt_expiry_hours,
    )
    .await
    {
        Ok((token, admin)) => {
            tracing::info!("Admin {} logged in", admin.email);
            Ok(ApiResponse::success(LoginResponse {
                token,
                expires_in: security.jwt_expiry_hours * 3600,
                admin: AdminSummary {
                    id: admin.id,
                    email: admin.email,
                },
            })
            .no_store())
        }
        Err(AuthError::InvalidCredentials) => {
            state.monitor.record(
                SecurityEventKind::AuthFailure,
                ip.label(),
                format!("failed admin login for {}", body.email.trim()),
            );
            Err(AuthError::InvalidCredentials.into())
        }
        Err(e) => Err(e.into()),
    }
}
