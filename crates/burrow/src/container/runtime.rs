//! Container control-plane access via the Docker or Podman CLI.
//!
//! The [`ContainerRuntimeApi`] trait is the seam the backend is tested
//! through; the production implementation shells out to the runtime binary.
//! Which runtime is selected changes only the binary invoked, never the
//! lifecycle logic built on top.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::error::{ContainerError, ContainerResult};
use super::limits;

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime.
    #[default]
    Docker,
    /// Podman, Docker-compatible.
    Podman,
}

impl RuntimeType {
    /// Get the control-plane binary for this runtime.
    pub fn binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }

    /// Whether this runtime requires SELinux volume labels (:Z suffix).
    pub fn needs_selinux_labels(&self) -> bool {
        match self {
            RuntimeType::Docker => false,
            RuntimeType::Podman => true,
        }
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "docker"),
            RuntimeType::Podman => write!(f, "podman"),
        }
    }
}

/// Validate a container ID or name before it lands in an argv.
fn validate_container_id_or_name(id: &str) -> ContainerResult<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(ContainerError::InvalidInput(format!(
            "invalid container ID or name '{id}'"
        )));
    }
    let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !id.chars().all(valid) {
        return Err(ContainerError::InvalidInput(format!(
            "container ID or name '{id}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Validate an image reference.
fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() || image.len() > 256 {
        return Err(ContainerError::InvalidInput(format!(
            "invalid image name '{image}'"
        )));
    }
    let valid = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':' | '@')
    };
    if !image.chars().all(valid) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{image}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Everything needed to create one sidecar container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Image to run.
    pub image: String,
    /// Container name.
    pub name: String,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Host bind mounts as (host path, container path).
    pub binds: Vec<(String, String)>,
    /// Working directory inside the container.
    pub workdir: Option<String>,
    /// Command override; empty keeps the image entrypoint.
    pub command: Vec<String>,
    /// CPU limit in fractional cores.
    pub cpus: Option<f64>,
    /// Memory limit as a human string.
    pub memory: Option<String>,
}

impl ContainerSpec {
    /// Validate all inputs before they reach the runtime CLI.
    pub fn validate(&self) -> ContainerResult<()> {
        validate_image_name(&self.image)?;
        validate_container_id_or_name(&self.name)?;
        for (key, _) in &self.env {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(ContainerError::InvalidInput(format!(
                    "invalid environment variable name '{key}'"
                )));
            }
        }
        for (host, container) in &self.binds {
            if host.contains(':') || container.contains(':') {
                return Err(ContainerError::InvalidInput(
                    "bind mount paths cannot contain ':'".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Control-plane operations the container backend depends on.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    /// Create and start a container; returns its ID.
    async fn create_container(&self, spec: &ContainerSpec) -> ContainerResult<String>;
    /// Start a stopped container in place.
    async fn start_container(&self, container_id: &str) -> ContainerResult<()>;
    /// Stop a running container.
    async fn stop_container(
        &self,
        container_id: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()>;
    /// Remove a container.
    async fn remove_container(&self, container_id: &str, force: bool) -> ContainerResult<()>;
    /// Container state string ("running", "exited", ...); `None` when the
    /// container does not exist.
    async fn container_state_status(&self, id_or_name: &str) -> ContainerResult<Option<String>>;
}

/// CLI-backed container runtime.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    runtime_type: RuntimeType,
    binary: String,
}

impl ContainerRuntime {
    pub fn new(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.binary().to_string(),
            runtime_type,
        }
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    async fn exec(&self, command: &str, args: &[String]) -> ContainerResult<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::CommandFailed {
                command: command.to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerRuntimeApi for ContainerRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> ContainerResult<String> {
        spec.validate()?;

        let mut args: Vec<String> = vec!["run".to_string(), "-d".to_string()];

        args.push("--name".to_string());
        args.push(spec.name.clone());

        for (host, container) in &spec.binds {
            args.push("-v".to_string());
            if self.runtime_type.needs_selinux_labels() {
                args.push(format!("{host}:{container}:Z"));
            } else {
                args.push(format!("{host}:{container}"));
            }
        }

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        if let Some(workdir) = &spec.workdir {
            args.push("-w".to_string());
            args.push(workdir.clone());
        }

        if let Some(cpus) = spec.cpus.and_then(limits::cpus_arg) {
            args.push("--cpus".to_string());
            args.push(cpus);
        }

        if let Some(bytes) = spec.memory.as_deref().and_then(limits::parse_memory_limit) {
            args.push("--memory".to_string());
            args.push(bytes.to_string());
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        let stdout = self.exec("run", &args).await?;
        Ok(stdout.trim().to_string())
    }

    async fn start_container(&self, container_id: &str) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;
        self.exec("start", &["start".to_string(), container_id.to_string()])
            .await?;
        Ok(())
    }

    async fn stop_container(
        &self,
        container_id: &str,
        timeout_seconds: Option<u32>,
    ) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;

        let mut args = vec!["stop".to_string()];
        if let Some(timeout) = timeout_seconds {
            args.push("-t".to_string());
            args.push(timeout.to_string());
        }
        args.push(container_id.to_string());

        self.exec("stop", &args).await?;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, force: bool) -> ContainerResult<()> {
        validate_container_id_or_name(container_id)?;

        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(container_id.to_string());

        self.exec("rm", &args).await?;
        Ok(())
    }

    async fn container_state_status(&self, id_or_name: &str) -> ContainerResult<Option<String>> {
        validate_container_id_or_name(id_or_name)?;

        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}}".to_string(),
            id_or_name.to_string(),
        ];

        // Container not found is not an error; callers treat it as missing.
        match self.exec("inspect", &args).await {
            Ok(stdout) => {
                let status = stdout.trim().trim_matches('"').to_string();
                Ok(if status.is_empty() { None } else { Some(status) })
            }
            Err(ContainerError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
