use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult};
use crate::notifications::{NotificationPreferences, PreferencesUpdate};

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

/// GET /api/notifications/preferences?token= - the link in every customer email footer
pub async fn get_preferences(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<NotificationPreferences> {
    let email = state.signer.verify_preference_token(&query.token)?;
    let prefs = state.notifications.preferences(&email).await?;
    Ok(ApiResponse::success(prefs).no_store())
}

/// PUT /api/notifications/preferences?token=
pub async fn update_preferences(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    Json(update): Json<PreferencesUpdate>,
) -> ApiResult<NotificationPreferences> {
    let email = state.signer.verify_preference_token(&query.token)?;
    let prefs = state.notifications.update_preferences(&email, update).await?;
    Ok(ApiResponse::success(prefs).no_store())
}
