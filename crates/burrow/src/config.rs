//! Backend configuration.
//!
//! One [`ExecConfig`] selects the execution mode and carries the per-mode
//! settings. Validation happens eagerly: a backend constructor rejects an
//! unusable configuration with `InvalidConfiguration` before any operation
//! runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::container::RuntimeType;
use crate::error::{ExecError, ExecResult};
use crate::sidecar::SidecarChannel;

/// Execution mode selector. Chosen once at startup; never re-selected at
/// call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Operations run in-process against the local filesystem.
    #[default]
    Local,
    /// Operations run inside a managed container hosting a sidecar daemon.
    Container,
    /// Operations run against a pre-existing sidecar daemon.
    Sidecar,
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecMode::Local => write!(f, "local"),
            ExecMode::Container => write!(f, "container"),
            ExecMode::Sidecar => write!(f, "sidecar"),
        }
    }
}

/// Settings for the local backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    /// Directory all relative paths are resolved and sandboxed against.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// When false, each execution target gets its own subdirectory under the
    /// workspace root.
    #[serde(default = "default_true")]
    pub shared_workspace: bool,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            shared_workspace: true,
        }
    }
}

/// Settings for the container backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerBackendConfig {
    /// Container image hosting the sidecar daemon. Required.
    pub image: String,
    /// Container runtime (docker or podman).
    #[serde(default)]
    pub runtime: RuntimeType,
    /// Host directory bind-mounted into the container for the daemon socket.
    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,
    /// Fixed container name; derived from the image when absent.
    #[serde(default)]
    pub container_name: Option<String>,
    /// Host directory mounted at the container workspace, when the caller
    /// wants the workspace to outlive the container.
    #[serde(default)]
    pub workspace_volume: Option<PathBuf>,
    /// Forwarded to the daemon: share one workspace across targets or
    /// namespace per target.
    #[serde(default = "default_true")]
    pub shared_workspace: bool,
    /// CPU limit in fractional cores; non-positive means no limit.
    #[serde(default)]
    pub cpus: Option<f64>,
    /// Memory limit as a human string ("512m", "2g", bare bytes);
    /// unparseable or non-positive means no limit.
    #[serde(default)]
    pub memory: Option<String>,
    /// Extra environment variables for the container.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Bound on the wait for the daemon socket to appear.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl ContainerBackendConfig {
    /// Minimal config for an image, defaults everywhere else.
    pub fn for_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            runtime: RuntimeType::default(),
            socket_dir: default_socket_dir(),
            container_name: None,
            workspace_volume: None,
            shared_workspace: true,
            cpus: None,
            memory: None,
            env: HashMap::new(),
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }

    pub fn validate(&self) -> ExecResult<()> {
        if self.image.trim().is_empty() {
            return Err(ExecError::InvalidConfiguration(
                "container mode requires an image".to_string(),
            ));
        }
        if self.socket_dir.as_os_str().is_empty() {
            return Err(ExecError::InvalidConfiguration(
                "socket_dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for the sidecar client backend.
///
/// Exactly one transport must be configured: a Unix socket path, or a host
/// plus port. Both or neither is a configuration error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SidecarBackendConfig {
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Sent as `Authorization: Bearer <token>` on every request.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// When set, the first operation polls `/health` up to this bound before
    /// dispatching.
    #[serde(default)]
    pub ready_timeout_secs: Option<u64>,
}

impl SidecarBackendConfig {
    pub fn unix(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: Some(socket_path.into()),
            ..Self::default()
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            ..Self::default()
        }
    }

    /// Resolve the configured transport, enforcing mutual exclusion.
    pub fn channel(&self) -> ExecResult<SidecarChannel> {
        match (&self.socket_path, &self.host) {
            (Some(_), Some(_)) => Err(ExecError::InvalidConfiguration(
                "socket_path and host are mutually exclusive".to_string(),
            )),
            (None, None) => Err(ExecError::InvalidConfiguration(
                "sidecar mode requires socket_path or host+port".to_string(),
            )),
            (Some(socket), None) => {
                let expanded = shellexpand::tilde(&socket.to_string_lossy()).into_owned();
                Ok(SidecarChannel::Unix {
                    socket: PathBuf::from(expanded),
                })
            }
            (None, Some(host)) => {
                let port = self.port.ok_or_else(|| {
                    ExecError::InvalidConfiguration(
                        "sidecar host requires a port".to_string(),
                    )
                })?;
                Ok(SidecarChannel::Tcp {
                    host: host.clone(),
                    port,
                })
            }
        }
    }
}

/// Top-level backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default)]
    pub mode: ExecMode,
    #[serde(default)]
    pub local: LocalBackendConfig,
    #[serde(default)]
    pub container: Option<ContainerBackendConfig>,
    #[serde(default)]
    pub sidecar: SidecarBackendConfig,
}

impl ExecConfig {
    /// Load config from a TOML file.
    pub fn from_file(path: &Path) -> ExecResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ExecConfig = toml::from_str(&content)
            .map_err(|e| ExecError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the settings of the selected mode.
    pub fn validate(&self) -> ExecResult<()> {
        match self.mode {
            ExecMode::Local => Ok(()),
            ExecMode::Container => match &self.container {
                Some(container) => container.validate(),
                None => Err(ExecError::InvalidConfiguration(
                    "container mode requires a [container] section".to_string(),
                )),
            },
            ExecMode::Sidecar => self.sidecar.channel().map(|_| ()),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_socket_dir() -> PathBuf {
    std::env::temp_dir().join("burrow")
}

fn default_true() -> bool {
    true
}

fn default_ready_timeout_secs() -> u64 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_requires_exactly_one_transport() {
        let neither = SidecarBackendConfig::default();
        assert!(matches!(
            neither.channel(),
            Err(ExecError::InvalidConfiguration(_))
        ));

        let both = SidecarBackendConfig {
            socket_path: Some(PathBuf::from("/tmp/s.sock")),
            host: Some("localhost".to_string()),
            port: Some(4410),
            ..Default::default()
        };
        assert!(matches!(
            both.channel(),
            Err(ExecError::InvalidConfiguration(_))
        ));

        let unix = SidecarBackendConfig::unix("/tmp/s.sock");
        assert!(matches!(
            unix.channel().unwrap(),
            SidecarChannel::Unix { .. }
        ));

        let tcp = SidecarBackendConfig::tcp("localhost", 4410);
        match tcp.channel().unwrap() {
            SidecarChannel::Tcp { host, port } => {
                assert_eq!(host, "localhost");
                assert_eq!(port, 4410);
            }
            _ => panic!("wrong channel"),
        }
    }

    #[test]
    fn test_host_without_port_is_invalid() {
        let config = SidecarBackendConfig {
            host: Some("localhost".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.channel(),
            Err(ExecError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_container_mode_requires_image() {
        let config = ExecConfig {
            mode: ExecMode::Container,
            container: Some(ContainerBackendConfig::for_image("")),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ExecConfig {
            mode: ExecMode::Container,
            container: None,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml_config() {
        let toml_str = r#"
            mode = "sidecar"

            [sidecar]
            socket_path = "/run/burrow/sidecar.sock"
            auth_token = "secret"
        "#;
        let config: ExecConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.mode, ExecMode::Sidecar);
        assert!(config.validate().is_ok());
        assert_eq!(config.sidecar.auth_token.as_deref(), Some("secret"));
    }
}
