//! Webhook Handler
//!
//! Verifies the signature, clears the index cache and, when podcast content
//! changed, eagerly refetches the index from the primary source.

use tracing::{info, warn};

use super::protocol::{PushPayload, WebhookResponse};
use super::signature;
use crate::error::AppError;
use crate::service::PodcastService;
use crate::upstream::client::REFRESH_TIMEOUT;

/// Process one webhook delivery
///
/// # Arguments
/// * `event` - Value of the event header
/// * `body` - Raw request body
/// * `signature_header` - Value of the signature header, if sent
/// * `secret` - Configured shared secret, if any
pub async fn handle(
    service: &PodcastService,
    event: &str,
    body: &[u8],
    signature_header: Option<&str>,
    secret: Option<&str>,
) -> Result<WebhookResponse, AppError> {
    info!(event = event, "Received webhook");

    if let (Some(secret), Some(sig)) = (secret, signature_header) {
        if !signature::verify(secret, body, sig) {
            warn!(event = event, "Webhook signature verification failed");
            return Err(AppError::InvalidSignature);
        }
    }

    service.invalidate();
    let payload = parse_payload(body)?;
    let mut response = WebhookResponse::processed(event);

    if event != "push" {
        return Ok(response);
    }
    let Some(payload) = payload else {
        return Ok(response);
    };

    let podcast_files = payload.podcast_files();
    if podcast_files.is_empty() {
        return Ok(response);
    }
    info!(files = ?podcast_files, "Podcast files updated");
    response.podcast_files_updated = Some(podcast_files);

    match service.refresh_from_primary(REFRESH_TIMEOUT).await {
        Ok(podcasts) => {
            info!(podcasts = podcasts, "Index refreshed from webhook");
            response.data_refreshed = Some(true);
        }
        Err(e) => {
            warn!(error = %e, "Index refresh from webhook failed");
            response.data_refresh_error = Some(e.to_string());
        }
    }

    Ok(response)
}

/// Parse the body; an empty body carries no payload
fn parse_payload(body: &[u8]) -> Result<Option<PushPayload>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| AppError::MalformedPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{counted_route, spawn_server, test_config, unreachable_url};
    use axum::http::StatusCode;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const INDEX: &str = r#"{"podcasts":[{"id":"ep1"}]}"#;
    const PUSH: &[u8] = br#"{"commits":[{"modified":["podcast_index.json"]}]}"#;
    const PUSH_UNRELATED: &[u8] = br#"{"commits":[{"modified":["src/lib.rs"]}]}"#;

    async fn populated_service(dir: &std::path::Path) -> (PodcastService, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new().route(
            "/index.json",
            counted_route(Arc::clone(&hits), StatusCode::OK, INDEX, Duration::ZERO),
        );
        let base = spawn_server(router).await;
        let config = test_config(
            &format!("{}/index.json", base),
            &unreachable_url("backup.json"),
            &base,
            dir,
        );
        let service = PodcastService::new(&config).unwrap();
        service.get_index().await.unwrap();
        assert!(service.is_cached());
        (service, hits)
    }

    #[tokio::test]
    async fn test_tampered_body_keeps_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = populated_service(dir.path()).await;
        let sig = signature::sign("s3cret", PUSH);

        let err = handle(
            &service,
            "push",
            PUSH_UNRELATED,
            Some(&sig),
            Some("s3cret"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::InvalidSignature));
        assert!(service.is_cached());
    }

    #[tokio::test]
    async fn test_valid_signature_clears_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (service, hits) = populated_service(dir.path()).await;
        let sig = signature::sign("s3cret", PUSH_UNRELATED);

        let response = handle(
            &service,
            "push",
            PUSH_UNRELATED,
            Some(&sig),
            Some("s3cret"),
        )
        .await
        .unwrap();

        assert!(response.cache_cleared);
        assert!(response.podcast_files_updated.is_none());
        assert!(!service.is_cached());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_signature_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = populated_service(dir.path()).await;

        let response = handle(&service, "ping", b"{}", None, Some("s3cret"))
            .await
            .unwrap();
        assert_eq!(response.message, "Webhook processed for event: ping");
        assert!(!service.is_cached());
    }

    #[tokio::test]
    async fn test_podcast_push_refreshes_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (service, hits) = populated_service(dir.path()).await;

        let response = handle(&service, "push", PUSH, None, None).await.unwrap();

        assert_eq!(
            response.podcast_files_updated,
            Some(vec!["podcast_index.json".to_string()])
        );
        assert_eq!(response.data_refreshed, Some(true));
        assert!(service.is_cached());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(
            &unreachable_url("index.json"),
            &unreachable_url("backup.json"),
            "http://base",
            dir.path(),
        );
        let service = PodcastService::new(&config).unwrap();

        let response = handle(&service, "push", PUSH, None, None).await.unwrap();

        assert!(response.success);
        assert!(response.data_refreshed.is_none());
        assert!(response.data_refresh_error.is_some());
        assert!(!service.is_cached());
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = populated_service(dir.path()).await;

        let err = handle(&service, "push", b"{not json", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_empty_body() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = populated_service(dir.path()).await;

        let response = handle(&service, "push", b"", None, None).await.unwrap();
        assert!(response.cache_cleared);
        assert!(response.podcast_files_updated.is_none());
    }
}
