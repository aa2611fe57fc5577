//! Route handlers
//!
//! Every handler error is an `AppError`, rendered as a JSON error body.
//! Webhook responses always carry a permissive CORS allow-origin header.

use std::sync::Arc;

use anyhow::anyhow;
use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::handler::HandlerWithoutStateExt;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::services::ServeDir;
use tracing::info;

use super::AppState;
use crate::cache::janitor::{DEFAULT_MAX_AGE_DAYS, HIGH_WATER_PERCENT};
use crate::cache::mirror::SERVED_PREFIX;
use crate::cache::AssetClass;
use crate::error::AppError;
use crate::upstream::PodcastIndex;
use crate::webhook::{self, protocol::UNKNOWN_EVENT, EVENT_HEADER, SIGNATURE_HEADER};

/// Build the application router
pub fn router(state: AppState) -> Router {
    let mirror_root = state.service.mirror().root().to_path_buf();
    let public_dir = state.config.public_dir.clone();

    let mut router = Router::new()
        .route("/api/podcasts", get(get_podcasts))
        .route(
            "/api/webhook",
            get(webhook_alive)
                .post(webhook_event)
                .options(webhook_preflight),
        )
        .route("/api/status", get(status))
        .route("/api/files/status", get(files_status))
        .route("/api/files/refresh", get(files_refresh))
        .route("/api/files/cleanup", post(files_cleanup))
        .route("/api/files/storage", get(files_storage));

    for class in [AssetClass::Audio, AssetClass::Transcript] {
        router = router.nest_service(
            &format!("{}/{}", SERVED_PREFIX, class.dir_name()),
            ServeDir::new(mirror_root.join(class.dir_name()))
                .not_found_service(asset_not_found.into_service()),
        );
    }

    router
        .fallback_service(ServeDir::new(public_dir))
        .with_state(state)
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Run blocking filesystem work off the executor
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(anyhow!("Blocking task failed: {}", e)))
}

async fn asset_not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}

async fn get_podcasts(State(state): State<AppState>) -> Result<Json<Arc<PodcastIndex>>, AppError> {
    Ok(Json(state.service.get_index().await?))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let (data_source, backup_data_source) = state.service.sources();
    let (hits, misses) = state.service.cache().stats();
    Json(json!({
        "status": "healthy",
        "timestamp": now(),
        "cache_status": if state.service.is_cached() { "active" } else { "empty" },
        "cached_at": state.service.cached_at().map(|t| t.to_rfc3339()),
        "cache_stats": { "hits": hits, "misses": misses },
        "config": {
            "data_source": data_source,
            "backup_data_source": backup_data_source,
            "base_url": state.config.base_url,
        }
    }))
}

fn with_cors(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

async fn webhook_preflight() -> Response {
    let mut response = with_cors(Json(json!({ "status": "ok" })).into_response());
    let headers = response.headers_mut();
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type,X-Hub-Signature-256"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    response
}

async fn webhook_alive(State(state): State<AppState>) -> Response {
    with_cors(
        Json(json!({
            "message": "Webhook endpoint is working",
            "timestamp": now(),
            "data_source": state.config.data_source,
            "base_url": state.config.base_url,
        }))
        .into_response(),
    )
}

async fn webhook_event(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let event = header(EVENT_HEADER).unwrap_or(UNKNOWN_EVENT);

    let result = webhook::handle(
        &state.service,
        event,
        &body,
        header(SIGNATURE_HEADER),
        state.config.webhook_secret.as_deref(),
    )
    .await;

    let response = match result {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    };
    with_cors(response)
}

async fn files_status(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let mirror = Arc::clone(state.service.mirror());
    let stats = blocking(move || mirror.stats()).await?;

    Ok(Json(json!({
        "audio_files": stats.audio_files,
        "transcript_files": stats.transcript_files,
        "total_size": stats.total_size,
        "downloading": stats.downloading,
        "storage_path": state.config.storage_root.display().to_string(),
        "persistent_storage": state.config.persistent_storage,
        "timestamp": now(),
    })))
}

async fn files_refresh(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let outcome = state.service.refresh().await?;
    info!(
        podcasts = outcome.podcasts,
        downloads_queued = outcome.downloads_queued,
        "Manual refresh"
    );

    Ok(Json(json!({
        "success": true,
        "podcasts": outcome.podcasts,
        "downloads_queued": outcome.downloads_queued,
        "timestamp": now(),
    })))
}

#[derive(Debug, Default, Deserialize)]
struct CleanupRequest {
    max_age_days: Option<u64>,
}

async fn files_cleanup(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, AppError> {
    let request: CleanupRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CleanupRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::MalformedPayload(e.to_string()))?
    };
    let max_age_days = request.max_age_days.unwrap_or(DEFAULT_MAX_AGE_DAYS);

    let janitor = Arc::clone(state.service.janitor());
    let removed = blocking(move || janitor.cleanup(max_age_days)).await?;

    Ok(Json(json!({
        "success": true,
        "removed": removed,
        "max_age_days": max_age_days,
        "timestamp": now(),
    })))
}

async fn files_storage(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let janitor = Arc::clone(state.service.janitor());
    let usage = blocking(move || janitor.disk_usage()).await??;

    Ok(Json(json!({
        "total": usage.total,
        "used": usage.used,
        "free": usage.free,
        "usage_percent": usage.usage_percent,
        "high_water_percent": HIGH_WATER_PERCENT,
        "cleanup_needed": usage.usage_percent > HIGH_WATER_PERCENT,
        "storage_path": state.config.storage_root.display().to_string(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::service::PodcastService;
    use crate::test_support::{counted_route, spawn_server, test_config, unreachable_url};
    use crate::webhook::signature;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    const INDEX: &str = r#"{"podcasts":[{"id":"ep1","audio_path":"./audio/ep1/ep1.mp3"}]}"#;
    const AUDIO: &str = "ID3-mirrored-bytes";

    fn app(config: Config) -> Router {
        let service = PodcastService::new(&config).unwrap();
        router(AppState {
            service: Arc::new(service),
            config: Arc::new(config),
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json_body(bytes: &Bytes) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    async fn upstream(audio_delay: Duration) -> (String, Arc<AtomicUsize>) {
        let index_hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/podcast_index.json",
                counted_route(Arc::clone(&index_hits), StatusCode::OK, INDEX, Duration::ZERO),
            )
            .route(
                "/audio/ep1/ep1.mp3",
                counted_route(
                    Arc::new(AtomicUsize::new(0)),
                    StatusCode::OK,
                    AUDIO,
                    audio_delay,
                ),
            );
        (spawn_server(router).await, index_hits)
    }

    #[tokio::test]
    async fn test_index_then_mirrored_file() {
        let (base, _) = upstream(Duration::from_millis(500)).await;
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_config(
            &format!("{}/podcast_index.json", base),
            &unreachable_url("backup.json"),
            &base,
            dir.path(),
        ));

        let (status, _, body) = send(&app, get_req("/api/podcasts")).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["podcasts"][0]["id"], "ep1");
        assert_eq!(
            body["podcasts"][0]["local_audio_path"],
            "/files/audio/ep1/ep1.mp3"
        );

        // Download still in flight
        let (status, _, body) = send(&app, get_req("/files/audio/ep1/ep1.mp3")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(&body)["error"],
            "Not found: /files/audio/ep1/ep1.mp3"
        );

        let mut mirrored = None;
        for _ in 0..100 {
            let (status, _, body) = send(&app, get_req("/files/audio/ep1/ep1.mp3")).await;
            if status == StatusCode::OK {
                mirrored = Some(body);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(mirrored.as_deref(), Some(AUDIO.as_bytes()));
    }

    #[tokio::test]
    async fn test_podcasts_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_config(
            &unreachable_url("index.json"),
            &unreachable_url("backup.json"),
            "http://base",
            dir.path(),
        ));

        let (status, _, body) = send(&app, get_req("/api/podcasts")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(&body);
        assert!(body["error"].as_str().unwrap().contains("Unable to fetch"));
    }

    #[tokio::test]
    async fn test_index_without_episode_list_is_served() {
        let router = Router::new().route(
            "/podcast_index.json",
            counted_route(
                Arc::new(AtomicUsize::new(0)),
                StatusCode::OK,
                r#"{"podcasts":null,"updated":"2025-01-01"}"#,
                Duration::ZERO,
            ),
        );
        let base = spawn_server(router).await;
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_config(
            &format!("{}/podcast_index.json", base),
            &unreachable_url("backup.json"),
            &base,
            dir.path(),
        ));

        let (status, _, body) = send(&app, get_req("/api/podcasts")).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["updated"], "2025-01-01");
        assert_eq!(body["podcasts"], json!([]));
    }

    #[tokio::test]
    async fn test_status_reports_cache() {
        let (base, _) = upstream(Duration::ZERO).await;
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_config(
            &format!("{}/podcast_index.json", base),
            &unreachable_url("backup.json"),
            &base,
            dir.path(),
        ));

        let (_, _, body) = send(&app, get_req("/api/status")).await;
        let body = json_body(&body);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["cache_status"], "empty");
        assert_eq!(body["config"]["base_url"], base.as_str());

        send(&app, get_req("/api/podcasts")).await;
        let (_, _, body) = send(&app, get_req("/api/status")).await;
        assert_eq!(json_body(&body)["cache_status"], "active");
    }

    #[tokio::test]
    async fn test_webhook_preflight_and_alive() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_config("http://p", "http://b", "http://base", dir.path()));

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/webhook")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            headers[ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type,X-Hub-Signature-256"
        );
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "GET,POST,OPTIONS");

        let (status, headers, body) = send(&app, get_req("/api/webhook")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(json_body(&body)["message"], "Webhook endpoint is working");
    }

    #[tokio::test]
    async fn test_webhook_signature_over_http() {
        let (base, index_hits) = upstream(Duration::ZERO).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(
            &format!("{}/podcast_index.json", base),
            &unreachable_url("backup.json"),
            &base,
            dir.path(),
        );
        config.webhook_secret = Some("s3cret".to_string());
        let app = app(config);
        send(&app, get_req("/api/podcasts")).await;

        let body = r#"{"commits":[{"added":["notes.txt"]}]}"#;
        let post = |signature: String| {
            Request::builder()
                .method(Method::POST)
                .uri("/api/webhook")
                .header("X-GitHub-Event", "push")
                .header("X-Hub-Signature-256", signature)
                .header("Content-Type", "application/json")
                .body(Body::from(body))
                .unwrap()
        };

        let (status, headers, resp) = send(&app, post(signature::sign("wrong", body.as_bytes()))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(json_body(&resp)["error"], "Invalid signature");
        let (_, _, status_body) = send(&app, get_req("/api/status")).await;
        assert_eq!(json_body(&status_body)["cache_status"], "active");

        let (status, _, resp) = send(&app, post(signature::sign("s3cret", body.as_bytes()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&resp)["cache_cleared"], true);
        let (_, _, status_body) = send(&app, get_req("/api/status")).await;
        assert_eq!(json_body(&status_body)["cache_status"], "empty");
        assert_eq!(index_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_files_maintenance_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("audio/ep1/ep1.mp3");
        std::fs::create_dir_all(audio.parent().unwrap()).unwrap();
        std::fs::write(&audio, AUDIO).unwrap();
        let transcript = dir.path().join("transcripts/ep1/ep1.html");
        std::fs::create_dir_all(transcript.parent().unwrap()).unwrap();
        std::fs::write(&transcript, "<p>hi</p>").unwrap();

        let app = app(test_config("http://p", "http://b", "http://base", dir.path()));

        let (status, _, body) = send(&app, get_req("/api/files/status")).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["audio_files"], 1);
        assert_eq!(body["transcript_files"], 1);
        assert_eq!(body["total_size"], (AUDIO.len() + "<p>hi</p>".len()) as u64);
        assert_eq!(body["downloading"], 0);

        let (status, _, body) = send(&app, get_req("/files/transcripts/ep1/ep1.html")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"<p>hi</p>");

        let cleanup = Request::builder()
            .method(Method::POST)
            .uri("/api/files/cleanup")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, cleanup).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert_eq!(body["removed"], 0);
        assert_eq!(body["max_age_days"], 30);
        assert!(audio.exists());

        let bad_cleanup = Request::builder()
            .method(Method::POST)
            .uri("/api/files/cleanup")
            .body(Body::from("{oops"))
            .unwrap();
        let (status, _, _) = send(&app, bad_cleanup).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = send(&app, get_req("/api/files/storage")).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&body);
        assert!(body["total"].as_u64().unwrap() > 0);
        assert_eq!(body["high_water_percent"], 90.0);
    }

    #[tokio::test]
    async fn test_files_refresh() {
        let (base, index_hits) = upstream(Duration::ZERO).await;
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_config(
            &format!("{}/podcast_index.json", base),
            &unreachable_url("backup.json"),
            &base,
            dir.path(),
        ));

        send(&app, get_req("/api/podcasts")).await;
        let (status, _, body) = send(&app, get_req("/api/files/refresh")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body)["podcasts"], 1);
        assert_eq!(index_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_front_end() {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        std::fs::create_dir_all(&public).unwrap();
        std::fs::write(public.join("index.html"), "<h1>pody</h1>").unwrap();
        std::fs::write(public.join("script.js"), "console.log(1)").unwrap();

        let app = app(test_config("http://p", "http://b", "http://base", dir.path()));

        let (status, _, body) = send(&app, get_req("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"<h1>pody</h1>");

        let (status, _, _) = send(&app, get_req("/script.js")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) = send(&app, get_req("/missing.css")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
