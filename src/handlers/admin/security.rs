use axum::extract::{Query, State};
use serde::Deserialize;

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult};
use crate::security::monitor::{SecurityEvent, SecuritySummary, Severity};

#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    pub limit: Option<usize>,
    pub min_severity: Option<Severity>,
}

/// GET /api/admin/security/events?limit=&min_severity=
pub async fn events(State(state): State<AppState>, Query(query): Query<EventQuery>) -> ApiResult<Vec<SecurityEvent>> {
    let limit = query.limit.unwrap_or(100).min(1000);
    Ok(ApiResponse::success(state.monitor.recent(limit, query.min_severity)).no_store())
}

/// GET /api/admin/security/summary
pub async fn summary(State(state): State<AppState>) -> ApiResult<SecuritySummary> {
    Ok(ApiResponse::success(state.monitor.summary()).no_store())
}
