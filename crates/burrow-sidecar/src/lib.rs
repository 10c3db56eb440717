//! Sidecar daemon library: the HTTP surface of the burrow execution
//! protocol, backed by a [`burrow::LocalBackend`] rooted at the daemon's
//! workspace.
//!
//! The binary in this crate is what runs inside a managed container (or
//! standalone); the `burrow` crate's sidecar client is its counterpart.

pub mod handlers;
pub mod routes;

use std::sync::Arc;

use burrow::LocalBackend;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Executes every operation against the daemon workspace.
    pub backend: Arc<LocalBackend>,
    /// Bearer token required on every request when set.
    pub token: Option<String>,
}

impl AppState {
    pub fn new(backend: LocalBackend, token: Option<String>) -> Self {
        Self {
            backend: Arc::new(backend),
            token,
        }
    }
}
