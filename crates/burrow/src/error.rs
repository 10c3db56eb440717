//! Backend error types.

use thiserror::Error;

pub use crate::container::ContainerError;

/// Result type for executor operations.
pub type ExecResult<T> = Result<T, ExecError>;

/// Errors surfaced by every backend, with the same taxonomy regardless of
/// which backend produced them.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The backend configuration is unusable. Raised at construction, never
    /// deferred to first use.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An operation was issued against a backend that is not ready (for
    /// example, after `shutdown`).
    #[error("backend is not initialized")]
    NotInitialized,

    /// The caller cancelled the operation before it produced a result.
    #[error("operation aborted")]
    Aborted,

    /// The requested path resolves outside the workspace root.
    #[error("path escapes the workspace root: {0}")]
    PathOutsideWorkspace(String),

    /// An edit's old text must appear exactly once in the file.
    #[error("old text must match exactly once, found {found} matches")]
    AmbiguousOrMissingMatch { found: usize },

    /// A search pattern failed to compile.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// The sidecar connection could not be established or broke mid-request.
    #[error("failed to reach sidecar: {0}")]
    ConnectFailed(String),

    /// The sidecar did not become ready within the bounded wait.
    #[error("sidecar did not become ready: {0}")]
    SidecarUnreachable(String),

    /// The sidecar sent a malformed or incomplete response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A streaming response closed without a terminal record.
    #[error("stream ended before a terminal record")]
    UnexpectedStreamEnd,

    /// The sidecar reported a failure of its own.
    #[error("remote error: {0}")]
    Remote(String),

    /// A container runtime operation failed.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
