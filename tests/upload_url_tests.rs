// Integration tests for the upload URL service
//
// Requests go straight through the router, no socket involved.

use anyhow::{bail, Result};
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use voice_clip::config::UploadConfig;
use voice_clip::http::{
    create_router, AppState, ErrorResponse, GatewayUrlIssuer, SignedUpload, UploadTicket,
    UploadUrlIssuer,
};

/// Records what it was asked for and echoes it back as the URL
#[derive(Default)]
struct RecordingIssuer {
    calls: Mutex<Vec<(String, String, Duration)>>,
}

impl UploadUrlIssuer for RecordingIssuer {
    fn issue(&self, file_key: &str, content_type: &str, expires_in: Duration) -> Result<String> {
        self.calls.lock().unwrap().push((
            file_key.to_string(),
            content_type.to_string(),
            expires_in,
        ));
        Ok(format!("https://storage.test/{}", file_key))
    }
}

struct FailingIssuer;

impl UploadUrlIssuer for FailingIssuer {
    fn issue(&self, _: &str, _: &str, _: Duration) -> Result<String> {
        bail!("credentials expired")
    }
}

fn router(issuer: Arc<dyn UploadUrlIssuer>) -> Router {
    create_router(AppState::new(issuer, UploadConfig::default()))
}

fn post_upload_url() -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/upload-url")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_issue_upload_url() -> Result<()> {
    let issuer = Arc::new(RecordingIssuer::default());
    let response = router(issuer.clone()).oneshot(post_upload_url()).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );

    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let ticket: UploadTicket = serde_json::from_slice(&body)?;

    let (stem, ext) = ticket.file_key.rsplit_once('.').unwrap();
    assert_eq!(ext, "wav");
    assert!(uuid::Uuid::parse_str(stem).is_ok());
    assert_eq!(ticket.upload_url, format!("https://storage.test/{}", ticket.file_key));

    let calls = issuer.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, ticket.file_key);
    assert_eq!(calls[0].1, "audio/wav");
    assert_eq!(calls[0].2, Duration::from_secs(300));
    Ok(())
}

#[tokio::test]
async fn test_response_uses_camel_case_fields() -> Result<()> {
    let response = router(Arc::new(RecordingIssuer::default()))
        .oneshot(post_upload_url())
        .await?;

    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let json: serde_json::Value = serde_json::from_slice(&body)?;

    assert!(json["uploadUrl"].is_string());
    assert!(json["fileKey"].is_string());
    assert_eq!(json.as_object().map(|o| o.len()), Some(2));
    Ok(())
}

#[tokio::test]
async fn test_each_request_gets_a_new_key() -> Result<()> {
    let app = router(Arc::new(RecordingIssuer::default()));
    let mut keys = Vec::new();

    for _ in 0..3 {
        let response = app.clone().oneshot(post_upload_url()).await?;
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let ticket: UploadTicket = serde_json::from_slice(&body)?;
        keys.push(ticket.file_key);
    }

    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_issuer_failure_returns_500() -> Result<()> {
    let response = router(Arc::new(FailingIssuer))
        .oneshot(post_upload_url())
        .await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let error: ErrorResponse = serde_json::from_slice(&body)?;
    assert_eq!(error.error, "Failed to generate upload URL");
    Ok(())
}

#[tokio::test]
async fn test_cors_preflight() -> Result<()> {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/upload-url")
        .header(header::ORIGIN, "https://app.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())?;

    let response = router(Arc::new(RecordingIssuer::default()))
        .oneshot(request)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS].to_str()?;
    assert!(methods.contains("POST"));
    assert!(methods.contains("OPTIONS"));

    let allowed = headers[header::ACCESS_CONTROL_ALLOW_HEADERS].to_str()?;
    assert!(allowed.to_ascii_lowercase().contains("content-type"));
    Ok(())
}

#[tokio::test]
async fn test_get_is_not_allowed() -> Result<()> {
    let request = Request::builder()
        .method(Method::GET)
        .uri("/upload-url")
        .body(Body::empty())?;

    let response = router(Arc::new(RecordingIssuer::default()))
        .oneshot(request)
        .await?;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let request = Request::builder().uri("/health").body(Body::empty())?;

    let response = router(Arc::new(RecordingIssuer::default()))
        .oneshot(request)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&body[..], b"OK");
    Ok(())
}

#[test]
fn test_gateway_state_from_config() {
    let signed = UploadConfig {
        signing_secret: "shared-secret".to_string(),
        ..UploadConfig::default()
    };
    assert!(AppState::from_config(&signed).is_ok());

    // Serving unsigned URLs is refused
    assert!(AppState::from_config(&UploadConfig::default()).is_err());

    let bad = UploadConfig {
        gateway_url: "storage.local".to_string(),
        ..signed
    };
    assert!(AppState::from_config(&bad).is_err());
}

#[tokio::test]
async fn test_gateway_urls_carry_verifiable_signature() -> Result<()> {
    let config = UploadConfig {
        gateway_url: "https://storage.test".to_string(),
        signing_secret: "shared-secret".to_string(),
        ..UploadConfig::default()
    };
    let app = create_router(AppState::from_config(&config)?);

    let response = app.oneshot(post_upload_url()).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let ticket: UploadTicket = serde_json::from_slice(&body)?;

    let (path, query) = ticket.upload_url.split_once('?').unwrap();
    assert_eq!(path, format!("https://storage.test/voice-clips/{}", ticket.file_key));

    let param = |name: &str| {
        query
            .split('&')
            .find_map(|p| p.strip_prefix(name).and_then(|p| p.strip_prefix('=')))
            .unwrap()
            .to_string()
    };
    let expires: i64 = param("expires").parse()?;
    let nonce = param("nonce");
    let signature = param("signature");

    let gateway = GatewayUrlIssuer::new("https://storage.test", "voice-clips", "shared-secret")?;
    let upload = SignedUpload {
        file_key: &ticket.file_key,
        content_type: "audio/wav",
        expires,
        nonce: &nonce,
    };
    let now = chrono::Utc::now().timestamp();
    assert!(gateway.verify(&upload, &signature, now));

    // Pushing the expiry out invalidates the URL
    let extended = SignedUpload {
        expires: expires + 3_600,
        ..upload
    };
    assert!(!gateway.verify(&extended, &signature, now));
    Ok(())
}
