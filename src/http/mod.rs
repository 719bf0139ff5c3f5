//! Upload URL service
//!
//! Stateless HTTP endpoint that hands out short-lived write URLs, so a
//! finished clip can be PUT directly to storage:
//! - POST /upload-url - Issue `{uploadUrl, fileKey}`
//! - GET /health - Health check

mod handlers;
mod issuer;
mod routes;
mod state;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::UploadConfig;

pub use handlers::{ErrorResponse, UploadTicket};
pub use issuer::{GatewayUrlIssuer, SignedUpload, UploadUrlIssuer};
pub use routes::create_router;
pub use state::AppState;

/// Bind the configured address and serve until the process is interrupted
pub async fn serve(config: &UploadConfig) -> Result<()> {
    let state = AppState::from_config(config)?;
    let addr = format!("{}:{}", config.bind, config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Upload URL service listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down upload URL service");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}
