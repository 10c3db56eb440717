//! Protocol endpoint handlers.
//!
//! Non-streaming operations answer with the JSON envelope; `/bash` answers
//! with a newline-delimited JSON stream that always ends in a `done` or
//! `error` record.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use burrow::{BashOptions, ExecutionTarget, Executor, GrepOptions};
use burrow_protocol::{
    BashEvent, BashRequest, EditRequest, Envelope, FindRequest, GrepRequest, HealthResult,
    LsRequest, ReadRequest, WriteRequest,
};

use crate::AppState;

fn target_of(target: &Option<String>) -> ExecutionTarget {
    target
        .as_deref()
        .map(ExecutionTarget::new)
        .unwrap_or_default()
}

fn envelope<T: Serialize>(result: Result<T, burrow::ExecError>) -> Json<Envelope<T>> {
    match result {
        Ok(value) => Json(Envelope::success(value)),
        Err(e) => {
            debug!("operation failed: {e}");
            Json(Envelope::failure(e.to_string()))
        }
    }
}

/// `GET /health` — the body is the bare health object, not an envelope.
pub async fn health() -> Json<HealthResult> {
    Json(HealthResult {
        ok: true,
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    })
}

/// `POST /bash` — NDJSON stream of delta records followed by one terminal
/// record.
pub async fn bash(State(state): State<AppState>, Json(request): Json<BashRequest>) -> Response {
    let target = target_of(&request.target);
    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
    let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();

    let mut opts = BashOptions::default().with_output(chunk_tx);
    if let Some(seconds) = request.timeout_seconds {
        opts = opts.with_timeout(Duration::from_secs(seconds));
    }

    let backend = state.backend.clone();
    let delta_tx = line_tx.clone();
    tokio::spawn(async move {
        // Deltas flow as they arrive; the terminal record is appended only
        // after the chunk channel drains so ordering is preserved.
        let forward = tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                let event = BashEvent::Delta {
                    data: chunk.data,
                    stream: chunk.source,
                };
                // A send failure means the client went away; keep draining
                // so the command is not blocked on a full pipe.
                let _ = delta_tx.send(ndjson_line(&event));
            }
        });

        let result = backend
            .run_shell_command(
                &target,
                &request.command,
                opts,
                CancellationToken::new(),
            )
            .await;
        let _ = forward.await;

        let terminal = match result {
            Ok(result) => BashEvent::Done {
                exit_code: result.exit_code,
                timed_out: result.timed_out,
            },
            Err(e) => {
                warn!("bash failed before completion: {e}");
                BashEvent::Error {
                    message: e.to_string(),
                }
            }
        };
        let _ = line_tx.send(ndjson_line(&terminal));
    });

    let stream = UnboundedReceiverStream::new(line_rx).map(Ok::<_, Infallible>);
    Response::builder()
        .header("content-type", "application/x-ndjson")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| ().into_response())
}

fn ndjson_line<T: Serialize>(event: &T) -> String {
    let mut line = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    line
}

pub async fn read(
    State(state): State<AppState>,
    Json(request): Json<ReadRequest>,
) -> impl IntoResponse {
    let target = target_of(&request.target);
    envelope(
        state
            .backend
            .read_file(
                &target,
                &request.path,
                request.offset,
                request.limit,
                CancellationToken::new(),
            )
            .await,
    )
}

pub async fn write(
    State(state): State<AppState>,
    Json(request): Json<WriteRequest>,
) -> impl IntoResponse {
    let target = target_of(&request.target);
    envelope(
        state
            .backend
            .write_file(
                &target,
                &request.path,
                &request.content,
                CancellationToken::new(),
            )
            .await,
    )
}

pub async fn edit(
    State(state): State<AppState>,
    Json(request): Json<EditRequest>,
) -> impl IntoResponse {
    let target = target_of(&request.target);
    envelope(
        state
            .backend
            .edit_file(
                &target,
                &request.path,
                &request.old_text,
                &request.new_text,
                CancellationToken::new(),
            )
            .await,
    )
}

pub async fn ls(
    State(state): State<AppState>,
    Json(request): Json<LsRequest>,
) -> impl IntoResponse {
    let target = target_of(&request.target);
    envelope(
        state
            .backend
            .list_directory(
                &target,
                request.path.as_deref(),
                request.limit,
                CancellationToken::new(),
            )
            .await,
    )
}

pub async fn find(
    State(state): State<AppState>,
    Json(request): Json<FindRequest>,
) -> impl IntoResponse {
    let target = target_of(&request.target);
    envelope(
        state
            .backend
            .find_files(
                &target,
                &request.pattern,
                request.path.as_deref(),
                request.limit,
                CancellationToken::new(),
            )
            .await,
    )
}

pub async fn grep(
    State(state): State<AppState>,
    Json(request): Json<GrepRequest>,
) -> impl IntoResponse {
    let target = target_of(&request.target);
    let query = GrepOptions {
        pattern: request.pattern,
        path: request.path,
        glob: request.glob,
        ignore_case: request.ignore_case,
        literal: request.literal,
        context: request.context,
        limit: request.limit,
    };
    envelope(
        state
            .backend
            .search_content(&target, &query, CancellationToken::new())
            .await,
    )
}
