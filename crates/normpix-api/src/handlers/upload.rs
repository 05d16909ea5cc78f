use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use normpix_processing::UploadedFile;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub storage_key: String,
    pub url: String,
}

/// Accept a multipart upload in the `file` field, normalize it when its
/// extension is on the normalization list, and store the result.
#[utoipa::path(
    post,
    path = "/api/v0/uploads",
    responses(
        (status = 201, description = "File stored", body = UploadResponse),
        (status = 400, description = "Missing file field or undecodable image", body = crate::error::ErrorResponse),
        (status = 413, description = "File exceeds the upload ceiling", body = crate::error::ErrorResponse),
        (status = 503, description = "Image engine is not ready", body = crate::error::ErrorResponse),
        (status = 500, description = "Conversion or storage failure", body = crate::error::ErrorResponse),
    ),
    tag = "uploads"
)]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("Missing filename".to_string()))?;

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read file field: {e}")))?;

        tracing::info!(
            filename = %filename,
            size_bytes = data.len(),
            "Received upload"
        );

        let location = state
            .intake
            .receive(UploadedFile::new(data.to_vec(), filename))
            .await?;

        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                storage_key: location.storage_key,
                url: location.url,
            }),
        ));
    }

    Err(ApiError::BadRequest(
        "Missing 'file' field in multipart body".to_string(),
    ))
}
