use axum::extract::State;

use crate::app::AppState;
use crate::automation::RunReport;
use crate::middleware::{ApiResponse, ApiResult};

/// POST /api/admin/automation/run - one pass over due tasks, same as the background loop
pub async fn run(State(state): State<AppState>) -> ApiResult<RunReport> {
    let report = state.automation().run_once().await?;
    Ok(ApiResponse::success(report).no_store())
}
