//! Test utilities: stub sidecar daemons served over Unix sockets.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use serde_json::json;
use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

/// Serve a router on a Unix socket until the returned handle is aborted.
pub fn serve_unix(router: Router, socket: &Path) -> JoinHandle<()> {
    let listener = UnixListener::bind(socket).expect("binding stub socket");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    })
}

/// A stub daemon plus the tempdir its socket lives in.
pub struct StubDaemon {
    pub socket: PathBuf,
    _dir: TempDir,
    handle: JoinHandle<()>,
}

impl StubDaemon {
    pub fn start(router: Router) -> Self {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("stub.sock");
        let handle = serve_unix(router, &socket);
        Self {
            socket,
            _dir: dir,
            handle,
        }
    }
}

impl Drop for StubDaemon {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Minimal daemon: healthy, canned read result, one short bash stream.
pub fn stub_router() -> Router {
    Router::new()
        .route("/health", get(|| async { axum::Json(json!({"ok": true})) }))
        .route(
            "/read",
            post(|| async {
                axum::Json(json!({
                    "ok": true,
                    "result": {"type": "text", "content": "stub content"}
                }))
            }),
        )
        .route(
            "/bash",
            post(|| async {
                ndjson_response(concat!(
                    "{\"type\":\"delta\",\"data\":\"a\"}\n",
                    "{\"type\":\"delta\",\"data\":\"b\"}\n",
                    "{\"type\":\"done\",\"exitCode\":0}\n",
                ))
            }),
        )
}

/// Respond with a fixed NDJSON body.
pub fn ndjson_response(body: &'static str) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from(body))
        .unwrap()
}

/// `/bash` route that emits a delta then keeps the stream open forever;
/// used to observe client-side cancellation.
pub fn endless_bash_router() -> Router {
    Router::new().route(
        "/bash",
        post(|| async {
            let interval = tokio::time::interval(Duration::from_millis(50));
            let stream = tokio_stream::wrappers::IntervalStream::new(interval)
                .map(|_| Ok::<_, Infallible>("{\"type\":\"delta\",\"data\":\"tick\"}\n"));
            Response::builder()
                .header(header::CONTENT_TYPE, "application/x-ndjson")
                .body(Body::from_stream(stream))
                .unwrap()
        }),
    )
}

/// Router that requires `Authorization: Bearer <token>` on every request.
pub fn auth_router(token: &'static str) -> Router {
    Router::new().route(
        "/ls",
        post(move |headers: axum::http::HeaderMap| async move {
            let authorized = headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(|got| got == token)
                .unwrap_or(false);
            if authorized {
                axum::Json(json!({"ok": true, "result": {"output": "secret.txt"}}))
                    .into_response()
            } else {
                StatusCode::UNAUTHORIZED.into_response()
            }
        }),
    )
}
