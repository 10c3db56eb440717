//! Container backend and the container control plane it drives.

mod backend;
mod error;
mod limits;
mod runtime;

pub use backend::{ContainerBackend, ContainerLifecycleState};
pub use error::{ContainerError, ContainerResult};
pub use limits::{cpu_nanos, parse_memory_limit};
pub use runtime::{ContainerRuntime, ContainerRuntimeApi, ContainerSpec, RuntimeType};
