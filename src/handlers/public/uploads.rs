use axum::extract::{Multipart, State};
use axum::Extension;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, ClientIp};
use crate::security::upload::UploadError;
use crate::security::{SecurityEventKind, SessionContext};
use crate::services::upload_service::StoredUpload;

/// POST /api/uploads - multipart field `file` (event layouts, dietary forms)
pub async fn upload(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    ip: ClientIp,
    mut multipart: Multipart,
) -> ApiResult<StoredUpload> {
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Could not read upload: {}", e)))?;
        file = Some((filename, content_type, bytes));
        break;
    }

    let Some((filename, content_type, bytes)) = file else {
        return Err(ApiError::invalid_field("file", "A file field is required"));
    };

    match state
        .uploads()
        .store(Some(session.session_id), &filename, content_type.as_deref(), &bytes)
        .await
    {
        Ok(stored) => Ok(ApiResponse::created(stored)),
        Err(err) => {
            if !matches!(err, UploadError::Io(_) | UploadError::Database(_)) {
                state.monitor.record(
                    SecurityEventKind::UploadRejected,
                    ip.label(),
                    format!("{}: {}", filename, err),
                );
            }
            Err(err.into())
        }
    }
}
