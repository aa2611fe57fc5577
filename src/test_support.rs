//! Helpers shared by tests: local fake upstreams and throwaway configs.

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::config::Config;

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A URL nothing listens on
pub fn unreachable_url(path: &str) -> String {
    format!("http://127.0.0.1:9/{}", path.trim_start_matches('/'))
}

/// Route answering every GET with a fixed status and body, counting hits
pub fn counted_route(
    hits: Arc<AtomicUsize>,
    status: StatusCode,
    body: &'static str,
    delay: Duration,
) -> axum::routing::MethodRouter {
    get(move || {
        let hits = Arc::clone(&hits);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            (status, body)
        }
    })
}

/// Config pointing at the given sources with the mirror rooted at `root`
pub fn test_config(primary: &str, backup: &str, base_url: &str, root: &Path) -> Config {
    Config {
        data_source: primary.to_string(),
        backup_data_source: backup.to_string(),
        base_url: base_url.to_string(),
        webhook_secret: None,
        port: 0,
        storage_root: root.to_path_buf(),
        persistent_storage: true,
        public_dir: root.join("public"),
        cache_duration: Duration::from_secs(3600),
    }
}

/// Poll `check` until it returns true or the timeout elapses
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
