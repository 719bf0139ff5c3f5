use super::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub upload_url: String,
    pub file_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload-url
/// Issue a write URL for a new, uniquely keyed clip object
pub async fn create_upload_url(State(state): State<AppState>) -> impl IntoResponse {
    let file_key = format!("{}.{}", uuid::Uuid::new_v4(), state.upload.extension);

    match state.issuer.issue(
        &file_key,
        &state.upload.content_type,
        Duration::from_secs(state.upload.expires_secs),
    ) {
        Ok(upload_url) => {
            info!("Issued upload URL for {}", file_key);
            (
                StatusCode::OK,
                Json(UploadTicket {
                    upload_url,
                    file_key,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Error generating upload URL: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to generate upload URL".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
