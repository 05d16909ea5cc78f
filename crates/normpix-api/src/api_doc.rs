use axum::Json;
use utoipa::OpenApi;

/// OpenAPI documentation for the upload service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "normpix",
        description = "Media ingestion and normalization service"
    ),
    paths(
        crate::handlers::upload::upload_file,
        crate::handlers::health::health_check,
    ),
    components(schemas(
        crate::handlers::upload::UploadResponse,
        crate::handlers::health::HealthResponse,
        crate::error::ErrorResponse,
    )),
    tags(
        (name = "uploads", description = "Upload intake"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
