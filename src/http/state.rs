use super::issuer::{GatewayUrlIssuer, UploadUrlIssuer};
use crate::config::UploadConfig;
use anyhow::Result;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// URL minting backend
    pub issuer: Arc<dyn UploadUrlIssuer>,
    /// Key extension, content type and expiry of issued URLs
    pub upload: UploadConfig,
}

impl AppState {
    pub fn new(issuer: Arc<dyn UploadUrlIssuer>, upload: UploadConfig) -> Self {
        Self { issuer, upload }
    }

    /// State backed by the configured storage gateway
    pub fn from_config(upload: &UploadConfig) -> Result<Self> {
        let issuer = GatewayUrlIssuer::new(&upload.gateway_url, &upload.bucket, &upload.signing_secret)?;
        Ok(Self::new(Arc::new(issuer), upload.clone()))
    }
}
