//! Sidecar protocol client behavior against scripted daemons.

mod common;

use std::time::Duration;

use axum::Router;
use axum::routing::post;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use burrow::{ExecError, SidecarClient};
use burrow_protocol::{BashRequest, LsRequest};
use common::{StubDaemon, ndjson_response};

fn bash_request(command: &str) -> BashRequest {
    BashRequest {
        command: command.to_string(),
        timeout_seconds: None,
        target: None,
    }
}

#[tokio::test]
async fn test_streaming_bash_accumulates_and_forwards() {
    let daemon = StubDaemon::start(common::stub_router());
    let client = SidecarClient::unix(&daemon.socket, None);
    let cancel = CancellationToken::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = client
        .bash(&bash_request("anything"), Some(&tx), &cancel)
        .await
        .unwrap();
    drop(tx);

    assert!(result.ok);
    assert_eq!(result.output, "ab");
    assert_eq!(result.exit_code, 0);

    // The streaming callback saw both fragments, in order.
    let mut fragments = Vec::new();
    while let Some(chunk) = rx.recv().await {
        fragments.push(chunk.data);
    }
    assert_eq!(fragments, vec!["a", "b"]);
}

#[tokio::test]
async fn test_stream_without_done_is_a_protocol_violation() {
    let router = Router::new().route(
        "/bash",
        post(|| async {
            ndjson_response("{\"type\":\"delta\",\"data\":\"partial output\"}\n")
        }),
    );
    let daemon = StubDaemon::start(router);
    let client = SidecarClient::unix(&daemon.socket, None);

    let err = client
        .bash(&bash_request("x"), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::UnexpectedStreamEnd));
}

#[tokio::test]
async fn test_terminal_error_record_carries_message() {
    let router = Router::new().route(
        "/bash",
        post(|| async {
            ndjson_response("{\"type\":\"error\",\"message\":\"spawn failed: sh not found\"}\n")
        }),
    );
    let daemon = StubDaemon::start(router);
    let client = SidecarClient::unix(&daemon.socket, None);

    let err = client
        .bash(&bash_request("x"), None, &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        ExecError::Remote(message) => assert!(message.contains("sh not found")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_lines_surface_as_deferred_error() {
    let router = Router::new().route(
        "/bash",
        post(|| async { ndjson_response("this is not json\n{\"also\":\"wrong\"}\n") }),
    );
    let daemon = StubDaemon::start(router);
    let client = SidecarClient::unix(&daemon.socket, None);

    let err = client
        .bash(&bash_request("x"), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Protocol(_)));
}

#[tokio::test]
async fn test_cancellation_mid_stream_aborts_promptly() {
    let daemon = StubDaemon::start(common::endless_bash_router());
    let client = SidecarClient::unix(&daemon.socket, None);
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel_clone.cancel();
    });

    let started = std::time::Instant::now();
    let err = client
        .bash(&bash_request("x"), None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Aborted));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_pre_dispatch_cancellation_is_aborted() {
    let daemon = StubDaemon::start(common::stub_router());
    let client = SidecarClient::unix(&daemon.socket, None);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client
        .bash(&bash_request("x"), None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Aborted));
}

#[tokio::test]
async fn test_connect_failure_against_missing_socket() {
    let dir = tempfile::TempDir::new().unwrap();
    let client = SidecarClient::unix(dir.path().join("nobody-home.sock"), None);

    let err = client
        .bash(&bash_request("x"), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::ConnectFailed(_)));
}

#[tokio::test]
async fn test_bearer_token_is_sent_and_required() {
    let daemon = StubDaemon::start(common::auth_router("sesame"));
    let request = LsRequest {
        path: None,
        limit: None,
        target: None,
    };

    // Without the token the server answers 401 and the client reports the
    // request failure.
    let client = SidecarClient::unix(&daemon.socket, None);
    let err = client
        .ls(&request, &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        ExecError::Remote(message) => assert!(message.contains("401")),
        other => panic!("unexpected error: {other:?}"),
    }

    // With the token the call goes through.
    let client = SidecarClient::unix(&daemon.socket, Some("sesame".to_string()));
    let result = client.ls(&request, &CancellationToken::new()).await.unwrap();
    assert_eq!(result.output, "secret.txt");
}

#[tokio::test]
async fn test_envelope_failure_and_missing_result() {
    let router = Router::new()
        .route(
            "/ls",
            post(|| async {
                axum::Json(serde_json::json!({"ok": false, "error": {"message": "workspace gone"}}))
            }),
        )
        .route(
            "/read",
            post(|| async { axum::Json(serde_json::json!({"ok": true})) }),
        );
    let daemon = StubDaemon::start(router);
    let client = SidecarClient::unix(&daemon.socket, None);

    let err = client
        .ls(
            &LsRequest {
                path: None,
                limit: None,
                target: None,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    match err {
        ExecError::Remote(message) => assert_eq!(message, "workspace gone"),
        other => panic!("unexpected error: {other:?}"),
    }

    // ok:true without a result is a protocol error, not a silent success.
    let err = client
        .read(
            &burrow_protocol::ReadRequest {
                path: "f".to_string(),
                offset: None,
                limit: None,
                target: None,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Protocol(_)));
}
