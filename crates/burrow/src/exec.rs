//! The executor contract shared by every backend.
//!
//! A backend is one implementation of [`Executor`]: in-process against the
//! local filesystem, a managed container hosting a sidecar daemon, or a
//! pre-existing sidecar daemon reached over a socket. Callers obtain one
//! configured backend at startup and issue every operation through this
//! trait, so the deployment mode never leaks into calling code.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ExecResult;
use burrow_protocol::{
    BashResult, EditResult, FindResult, GrepResult, LsResult, ReadResult, StreamSource,
    WriteResult,
};

/// Logical identifier scoping operations to one caller/session.
///
/// A single backend instance can serve multiple concurrent logical
/// workspaces; every operation names the one it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionTarget(String);

impl ExecutionTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionTarget {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl std::fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One fragment of command output, tagged with its source when known.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub data: String,
    pub source: Option<StreamSource>,
}

/// Channel end that receives output fragments as they arrive.
///
/// Unbounded so that a slow (or absent) consumer can never stall the
/// command; the backend computes the aggregate [`BashResult`] either way.
pub type OutputSink = mpsc::UnboundedSender<OutputChunk>;

/// Options for a shell command.
#[derive(Debug, Default)]
pub struct BashOptions {
    /// Kill the process tree and report `timed_out: true` once elapsed.
    pub timeout: Option<Duration>,
    /// Receives output fragments in arrival order, one send per fragment.
    pub output: Option<OutputSink>,
}

impl BashOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_output(mut self, sink: OutputSink) -> Self {
        self.output = Some(sink);
        self
    }
}

/// Options for a content search.
#[derive(Debug, Clone, Default)]
pub struct GrepOptions {
    pub pattern: String,
    /// Search root relative to the workspace; defaults to the workspace root.
    pub path: Option<String>,
    /// Restrict matches to files whose relative path matches this glob.
    pub glob: Option<String>,
    pub ignore_case: bool,
    /// Treat the pattern as a literal string instead of a regex.
    pub literal: bool,
    /// Lines of surrounding context to include per match.
    pub context: Option<usize>,
    /// Maximum number of matches reported.
    pub limit: Option<usize>,
}

impl GrepOptions {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }
}

/// The capability surface every backend satisfies.
///
/// Contract, uniform across backends:
/// - cancellation observed before dispatch short-circuits with
///   [`ExecError::Aborted`](crate::ExecError::Aborted) and has no side
///   effect; observed during dispatch it best-effort terminates the
///   underlying work and returns promptly; observed after completion it is
///   a no-op;
/// - `run_shell_command` never raises on timeout — the result carries
///   `timed_out: true` and a non-zero exit code;
/// - partial results are never returned as success.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a shell command in the target's workspace, streaming output
    /// fragments into `opts.output` when provided.
    async fn run_shell_command(
        &self,
        target: &ExecutionTarget,
        command: &str,
        opts: BashOptions,
        cancel: CancellationToken,
    ) -> ExecResult<BashResult>;

    /// Read a file, windowed by 1-indexed `offset`/`limit` lines.
    async fn read_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<ReadResult>;

    /// Write a file, creating parent directories as needed.
    async fn write_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        content: &str,
        cancel: CancellationToken,
    ) -> ExecResult<WriteResult>;

    /// Replace `old_text` (which must occur exactly once) with `new_text`.
    async fn edit_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        old_text: &str,
        new_text: &str,
        cancel: CancellationToken,
    ) -> ExecResult<EditResult>;

    /// List a directory, lexically sorted, directories suffixed with `/`.
    async fn list_directory(
        &self,
        target: &ExecutionTarget,
        path: Option<&str>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<LsResult>;

    /// Find files whose workspace-relative path matches a glob pattern.
    async fn find_files(
        &self,
        target: &ExecutionTarget,
        pattern: &str,
        path: Option<&str>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<FindResult>;

    /// Search file contents for a literal string or regex.
    async fn search_content(
        &self,
        target: &ExecutionTarget,
        query: &GrepOptions,
        cancel: CancellationToken,
    ) -> ExecResult<GrepResult>;

    /// Release backend resources. Idempotent; never raises for cleanup
    /// failures.
    async fn shutdown(&self) -> ExecResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_target() {
        assert_eq!(ExecutionTarget::default().as_str(), "default");
    }

    #[test]
    fn test_bash_options_builder() {
        let opts = BashOptions::default().with_timeout(Duration::from_secs(5));
        assert_eq!(opts.timeout, Some(Duration::from_secs(5)));
        assert!(opts.output.is_none());
    }
}
