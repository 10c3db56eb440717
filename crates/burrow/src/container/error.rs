//! Container runtime error types.

use thiserror::Error;

/// Result type for container runtime operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors from the container control plane.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The runtime command failed.
    #[error("container {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Container was not found.
    #[error("container not found: {0}")]
    NotFound(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
