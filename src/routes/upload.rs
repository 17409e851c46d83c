use axum::extract::{Multipart, State};
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::diagnosis::UploadResponse;

/// POST /api/v1/upload — store a captured photo (multipart field `file`) and
/// return the reference to start a diagnosis with.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let storage = state
        .storage
        .as_ref()
        .ok_or(ApiError::Unavailable("Image storage"))?;

    let mut image_data = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            image_data = Some(data);
        }
    }

    let data = image_data
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;

    let format = image::guess_format(&data).map_err(|_| ApiError::UnsupportedMediaType)?;
    let extension = format.extensions_str().first().copied().unwrap_or("jpg");
    let key = format!(
        "clothes/{}-{}.{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4(),
        extension
    );

    let image_url = storage.put_image(&key, &data, format.to_mime_type()).await?;
    tracing::info!(key = %key, bytes = data.len(), "Photo uploaded");

    Ok(Json(UploadResponse { image_url }))
}
