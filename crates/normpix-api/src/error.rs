//! HTTP error mapping.
//!
//! The intake's typed errors are translated to status codes here and nowhere
//! else: oversized uploads are 413, an engine that is not `Ready` is 503,
//! undecodable or untransformable input is the client's fault (400), and
//! encode or storage failures are ours (500).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use normpix_processing::{ConversionError, IntakeError};
use serde::Serialize;
use utoipa::ToSchema;

/// Error payload returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Intake(IntakeError),
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        ApiError::Intake(err)
    }
}

impl ApiError {
    fn status_code_message(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", message.clone())
            }
            ApiError::Intake(err) => match err {
                IntakeError::TooLarge { .. } => (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "PAYLOAD_TOO_LARGE",
                    err.to_string(),
                ),
                IntakeError::EngineNotReady => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "ENGINE_NOT_READY",
                    err.to_string(),
                ),
                IntakeError::Conversion(
                    ConversionError::DecodeFailed(_) | ConversionError::TransformFailed(_),
                ) => (
                    StatusCode::BAD_REQUEST,
                    "IMAGE_PROCESSING_ERROR",
                    err.to_string(),
                ),
                IntakeError::Conversion(ConversionError::EncodeFailed(_)) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "IMAGE_PROCESSING_ERROR",
                    err.to_string(),
                ),
                // Backend details stay in the logs.
                IntakeError::Storage(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "Failed to store file".to_string(),
                ),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.status_code_message();

        if status.is_server_error() {
            tracing::error!(code, error = ?self, "Request failed");
        } else {
            tracing::warn!(code, error = ?self, "Request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use normpix_storage::StorageError;

    fn status_of(err: ApiError) -> StatusCode {
        err.status_code_message().0
    }

    #[test]
    fn intake_errors_map_to_expected_statuses() {
        assert_eq!(
            status_of(ApiError::Intake(IntakeError::TooLarge {
                size: 200,
                max: 100
            })),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_of(ApiError::Intake(IntakeError::EngineNotReady)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ApiError::Intake(IntakeError::Conversion(
                ConversionError::DecodeFailed("bad magic".to_string())
            ))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::Intake(IntakeError::Conversion(
                ConversionError::TransformFailed("bad exif".to_string())
            ))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::Intake(IntakeError::Conversion(
                ConversionError::EncodeFailed("mozjpeg".to_string())
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ApiError::Intake(IntakeError::Storage(
                StorageError::UploadFailed("disk full".to_string())
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn storage_details_are_not_echoed_to_clients() {
        let err = ApiError::Intake(IntakeError::Storage(StorageError::UploadFailed(
            "secret-bucket exploded".to_string(),
        )));
        let (_, _, message) = err.status_code_message();
        assert!(!message.contains("secret-bucket"));
    }
}
