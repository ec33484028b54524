// Admin tier: everything here sits behind `admin_auth_middleware`
pub mod automation;
pub mod orders;
pub mod products;
pub mod quotes;
pub mod security;

use axum::Extension;
use serde::Deserialize;

use crate::middleware::{ApiResponse, ApiResult, AuthAdmin};

/// Shared `?status=&limit=&offset=` listing query
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct WhoAmI {
    pub id: uuid::Uuid,
    pub email: String,
    pub role: String,
}

/// GET /api/admin/whoami
pub async fn whoami(Extension(admin): Extension<AuthAdmin>) -> ApiResult<WhoAmI> {
    Ok(ApiResponse::success(WhoAmI {
        id: admin.id,
        email: admin.email,
        role: admin.role,
    }))
}
