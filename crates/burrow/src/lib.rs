//! Burrow — sandboxed execution backends for AI agents.
//!
//! One executor contract, three interchangeable backends:
//!
//! - [`LocalBackend`] runs operations in-process against a workspace root;
//! - [`ContainerBackend`] provisions a container hosting a sidecar daemon
//!   and forwards operations to it;
//! - [`SidecarBackend`] speaks the sidecar protocol to a daemon that is
//!   already running, over a Unix socket or TCP.
//!
//! All three produce the same structured results and the same error
//! taxonomy, so callers select a backend once at startup and never branch
//! on deployment mode again.

pub mod config;
pub mod container;
pub mod error;
pub mod exec;
pub mod local;
pub mod sidecar;

use std::sync::Arc;

pub use config::{
    ContainerBackendConfig, ExecConfig, ExecMode, LocalBackendConfig, SidecarBackendConfig,
};
pub use container::{ContainerBackend, ContainerLifecycleState};
pub use error::{ExecError, ExecResult};
pub use exec::{BashOptions, ExecutionTarget, Executor, GrepOptions, OutputChunk, OutputSink};
pub use local::LocalBackend;
pub use sidecar::{SidecarBackend, SidecarChannel, SidecarClient};

/// Construct the backend selected by the configuration.
///
/// Mode selection happens exactly once, here; configuration problems fail
/// now rather than on first use.
pub fn backend_from_config(config: &ExecConfig) -> ExecResult<Arc<dyn Executor>> {
    config.validate()?;
    match config.mode {
        ExecMode::Local => Ok(Arc::new(LocalBackend::new(config.local.clone())?)),
        ExecMode::Container => {
            let container = config.container.clone().ok_or_else(|| {
                ExecError::InvalidConfiguration(
                    "container mode requires a [container] section".to_string(),
                )
            })?;
            Ok(Arc::new(ContainerBackend::new(container)?))
        }
        ExecMode::Sidecar => Ok(Arc::new(SidecarBackend::new(config.sidecar.clone())?)),
    }
}
