//! Local backend behavior through the executor contract.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use burrow::{
    BashOptions, ExecConfig, ExecError, ExecMode, ExecutionTarget, Executor, GrepOptions,
    LocalBackendConfig, backend_from_config,
};
use tempfile::TempDir;

fn local_config(dir: &TempDir) -> ExecConfig {
    ExecConfig {
        mode: ExecMode::Local,
        local: LocalBackendConfig {
            workspace_root: dir.path().to_path_buf(),
            shared_workspace: true,
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_write_then_read_returns_content_verbatim() {
    let dir = TempDir::new().unwrap();
    let backend = backend_from_config(&local_config(&dir)).unwrap();
    let target = ExecutionTarget::default();

    let content = "line one\nline two\nspecial: äöü €\n";
    backend
        .write_file(&target, "deep/nested/file.txt", content, CancellationToken::new())
        .await
        .unwrap();

    let read = backend
        .read_file(&target, "deep/nested/file.txt", None, None, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(read.content, content.trim_end_matches('\n'));
    assert_eq!(read.total_lines, Some(3));
}

#[tokio::test]
async fn test_escaping_paths_fail_for_read_and_write() {
    let dir = TempDir::new().unwrap();
    let backend = backend_from_config(&local_config(&dir)).unwrap();
    let target = ExecutionTarget::default();

    for path in ["../outside.txt", "ok/../../outside.txt", "/etc/hosts"] {
        let err = backend
            .read_file(&target, path, None, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ExecError::PathOutsideWorkspace(_)),
            "read {path} gave {err:?}"
        );

        let err = backend
            .write_file(&target, path, "x", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ExecError::PathOutsideWorkspace(_)),
            "write {path} gave {err:?}"
        );
    }
}

#[tokio::test]
async fn test_edit_match_cardinality() {
    let dir = TempDir::new().unwrap();
    let backend = backend_from_config(&local_config(&dir)).unwrap();
    let target = ExecutionTarget::default();
    let cancel = CancellationToken::new();

    backend
        .write_file(&target, "a.txt", "dup\nunique\ndup\n", cancel.clone())
        .await
        .unwrap();

    let err = backend
        .edit_file(&target, "a.txt", "dup", "x", cancel.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::AmbiguousOrMissingMatch { found: 2 }));

    let err = backend
        .edit_file(&target, "a.txt", "absent", "x", cancel.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::AmbiguousOrMissingMatch { found: 0 }));

    let result = backend
        .edit_file(&target, "a.txt", "unique", "replaced", cancel.clone())
        .await
        .unwrap();
    let diff = result.diff.unwrap();
    assert!(diff.contains("-unique"));
    assert!(diff.contains("+replaced"));
    assert!(!diff.contains("-dup"));
}

#[tokio::test]
async fn test_bash_streams_fragments_in_order() {
    let dir = TempDir::new().unwrap();
    let backend = backend_from_config(&local_config(&dir)).unwrap();
    let target = ExecutionTarget::default();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = backend
        .run_shell_command(
            &target,
            "printf a; sleep 0.1; printf b",
            BashOptions::default().with_output(tx),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(result.ok);
    assert_eq!(result.output, "ab");

    let mut fragments = Vec::new();
    while let Some(chunk) = rx.recv().await {
        fragments.push(chunk.data);
    }
    assert_eq!(fragments, vec!["a", "b"]);
}

#[tokio::test]
async fn test_cancelling_long_command_returns_within_grace() {
    let dir = TempDir::new().unwrap();
    let backend = backend_from_config(&local_config(&dir)).unwrap();
    let target = ExecutionTarget::default();
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel_clone.cancel();
    });

    let started = std::time::Instant::now();
    let result = backend
        .run_shell_command(&target, "sleep 30", BashOptions::default(), cancel)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5), "cancel must not hang");
    assert!(!result.ok);
    assert_ne!(result.exit_code, 0);
}

#[tokio::test]
async fn test_timeout_reports_timed_out_not_error() {
    let dir = TempDir::new().unwrap();
    let backend = backend_from_config(&local_config(&dir)).unwrap();
    let target = ExecutionTarget::default();

    let result = backend
        .run_shell_command(
            &target,
            "sleep 30",
            BashOptions::default().with_timeout(Duration::from_millis(300)),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(result.timed_out);
    assert!(!result.ok);
    assert_ne!(result.exit_code, 0);
}

#[tokio::test]
async fn test_find_and_grep_share_ordering_contract() {
    let dir = TempDir::new().unwrap();
    let backend = backend_from_config(&local_config(&dir)).unwrap();
    let target = ExecutionTarget::default();
    let cancel = CancellationToken::new();

    for (path, body) in [
        ("src/b.rs", "fn beta() {}\n"),
        ("src/a.rs", "fn alpha() {}\n"),
        ("docs/a.md", "alpha docs\n"),
    ] {
        backend
            .write_file(&target, path, body, cancel.clone())
            .await
            .unwrap();
    }

    let found = backend
        .find_files(&target, "*.rs", None, None, cancel.clone())
        .await
        .unwrap();
    assert_eq!(found.files, vec!["src/a.rs", "src/b.rs"]);

    let grep = backend
        .search_content(&target, &GrepOptions::new("alpha"), cancel)
        .await
        .unwrap();
    assert_eq!(
        grep.content,
        "docs/a.md:1: alpha docs\nsrc/a.rs:1: fn alpha() {}"
    );
}
