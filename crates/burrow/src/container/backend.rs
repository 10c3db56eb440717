//! Container backend: makes a remote sidecar look like a zero-configuration
//! local one by owning the container that runs it.
//!
//! Lifecycle: `Absent → Starting → Ready → Stopped`. Provisioning is
//! serialized behind a mutex (one `ensure_ready` sequence at a time);
//! operation dispatch is not serialized once ready. The daemon socket is
//! bind-mounted out of the container, and one pooled sidecar client bound
//! to it serves all subsequent operations.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use super::runtime::{ContainerRuntime, ContainerRuntimeApi, ContainerSpec};
use crate::config::ContainerBackendConfig;
use crate::error::{ExecError, ExecResult};
use crate::exec::{BashOptions, ExecutionTarget, Executor, GrepOptions};
use crate::sidecar::{SidecarBackend, SidecarClient};
use burrow_protocol::{
    BashResult, EditResult, FindResult, GrepResult, LsResult, ReadResult, WriteResult,
};

/// Socket directory mount point inside the container.
const CONTAINER_SOCKET_DIR: &str = "/burrow";
/// Daemon socket path inside the container.
const CONTAINER_SOCKET_PATH: &str = "/burrow/sidecar.sock";
/// Workspace mount point inside the container.
const CONTAINER_WORKSPACE: &str = "/workspace";
/// Socket file name on the host side of the bind mount.
const SOCKET_FILE_NAME: &str = "sidecar.sock";

/// Interval between host-side socket existence probes.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Grace given to the daemon on `stop` before the runtime kills it.
const STOP_TIMEOUT_SECS: u32 = 5;

/// Externally observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerLifecycleState {
    Absent,
    Starting,
    Ready,
    Stopped,
}

#[derive(Debug)]
enum Lifecycle {
    Absent,
    Starting,
    Ready { container_id: String },
    Stopped,
}

/// Backend that provisions and reuses one sidecar container.
pub struct ContainerBackend {
    config: ContainerBackendConfig,
    runtime: Arc<dyn ContainerRuntimeApi>,
    lifecycle: Mutex<Lifecycle>,
    inner: OnceCell<Arc<SidecarBackend>>,
}

impl ContainerBackend {
    /// Validate the configuration and bind to the configured runtime.
    /// The container itself is created lazily on first use.
    pub fn new(config: ContainerBackendConfig) -> ExecResult<Self> {
        let runtime = Arc::new(ContainerRuntime::new(config.runtime));
        Self::with_runtime(config, runtime)
    }

    /// Construct against any control plane; the seam the tests use.
    pub fn with_runtime(
        config: ContainerBackendConfig,
        runtime: Arc<dyn ContainerRuntimeApi>,
    ) -> ExecResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            runtime,
            lifecycle: Mutex::new(Lifecycle::Absent),
            inner: OnceCell::new(),
        })
    }

    /// Host path of the daemon socket.
    pub fn socket_path(&self) -> PathBuf {
        self.config.socket_dir.join(SOCKET_FILE_NAME)
    }

    /// Current lifecycle state, for observation only.
    pub async fn lifecycle_state(&self) -> ContainerLifecycleState {
        match &*self.lifecycle.lock().await {
            Lifecycle::Absent => ContainerLifecycleState::Absent,
            Lifecycle::Starting => ContainerLifecycleState::Starting,
            Lifecycle::Ready { .. } => ContainerLifecycleState::Ready,
            Lifecycle::Stopped => ContainerLifecycleState::Stopped,
        }
    }

    fn container_name(&self) -> String {
        if let Some(name) = &self.config.container_name {
            return name.clone();
        }
        // Derive a stable name from the image reference.
        let base = self
            .config
            .image
            .rsplit('/')
            .next()
            .unwrap_or(&self.config.image)
            .split(':')
            .next()
            .unwrap_or("sidecar");
        let sanitized: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        format!("burrow-{sanitized}")
    }

    fn container_spec(&self) -> ContainerSpec {
        let mut env: Vec<(String, String)> = self
            .config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();
        env.push(("BURROW_SOCKET".to_string(), CONTAINER_SOCKET_PATH.to_string()));
        env.push(("BURROW_WORKSPACE".to_string(), CONTAINER_WORKSPACE.to_string()));
        env.push((
            "BURROW_SHARED_WORKSPACE".to_string(),
            self.config.shared_workspace.to_string(),
        ));

        let mut binds = vec![(
            self.config.socket_dir.to_string_lossy().into_owned(),
            CONTAINER_SOCKET_DIR.to_string(),
        )];
        if let Some(volume) = &self.config.workspace_volume {
            binds.push((
                volume.to_string_lossy().into_owned(),
                CONTAINER_WORKSPACE.to_string(),
            ));
        }

        ContainerSpec {
            image: self.config.image.clone(),
            name: self.container_name(),
            env,
            binds,
            workdir: Some(CONTAINER_WORKSPACE.to_string()),
            command: Vec::new(),
            cpus: self.config.cpus,
            memory: self.config.memory.clone(),
        }
    }

    /// Remove a socket file left behind by a previous run. A path that
    /// exists but is not a socket is refused outright.
    fn cleanup_stale_socket(&self) -> ExecResult<()> {
        let path = self.socket_path();
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileTypeExt;
                    if meta.file_type().is_socket() {
                        debug!("removing stale socket {}", path.display());
                        std::fs::remove_file(&path)?;
                        return Ok(());
                    }
                }
                let _ = meta;
                Err(ExecError::InvalidConfiguration(format!(
                    "{} exists and is not a socket",
                    path.display()
                )))
            }
            Err(_) => Ok(()),
        }
    }

    /// Poll until the daemon socket appears on the host, bounded by the
    /// configured readiness timeout.
    async fn wait_for_socket(&self) -> ExecResult<()> {
        let path = self.socket_path();
        let timeout = Duration::from_secs(self.config.ready_timeout_secs);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Ok(meta) = std::fs::symlink_metadata(&path) {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileTypeExt;
                    if meta.file_type().is_socket() {
                        return Ok(());
                    }
                }
                let _ = meta;
                return Err(ExecError::SidecarUnreachable(format!(
                    "{} exists but is not a socket",
                    path.display()
                )));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ExecError::SidecarUnreachable(format!(
                    "socket {} did not appear within {}s",
                    path.display(),
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }
    }

    /// Create and start the container, then wait for its socket.
    async fn provision(&self) -> ExecResult<String> {
        std::fs::create_dir_all(&self.config.socket_dir)?;
        self.cleanup_stale_socket()?;

        let spec = self.container_spec();
        debug!("creating container {} from image {}", spec.name, spec.image);
        let container_id = self.runtime.create_container(&spec).await?;

        if let Err(e) = self.wait_for_socket().await {
            // Do not leave a half-provisioned container squatting on the
            // name; removal failure is secondary to the readiness error.
            if let Err(remove_err) = self.runtime.remove_container(&container_id, true).await {
                warn!("failed to remove unready container {container_id}: {remove_err}");
            }
            return Err(e);
        }

        info!(
            "container {} ready, socket at {}",
            container_id,
            self.socket_path().display()
        );
        Ok(container_id)
    }

    /// Bring the container to `Ready` and hand out the pooled client
    /// backend. Only one provisioning sequence runs at a time.
    async fn ensure_ready(&self, cancel: &CancellationToken) -> ExecResult<Arc<SidecarBackend>> {
        if cancel.is_cancelled() {
            return Err(ExecError::Aborted);
        }

        let mut lifecycle = self.lifecycle.lock().await;
        loop {
            match &*lifecycle {
                Lifecycle::Stopped => return Err(ExecError::NotInitialized),
                Lifecycle::Ready { container_id } => {
                    match self.runtime.container_state_status(container_id).await? {
                        Some(status) if status == "running" => {}
                        Some(status) => {
                            info!("container {container_id} is {status}, restarting in place");
                            self.runtime.start_container(container_id).await?;
                            self.wait_for_socket().await?;
                        }
                        None => {
                            warn!("container {container_id} no longer exists, recreating");
                            *lifecycle = Lifecycle::Absent;
                            continue;
                        }
                    }
                    let socket = self.socket_path();
                    let inner = self
                        .inner
                        .get_or_init(|| async move {
                            Arc::new(SidecarBackend::from_client(SidecarClient::unix(
                                socket, None,
                            )))
                        })
                        .await;
                    return Ok(inner.clone());
                }
                Lifecycle::Absent | Lifecycle::Starting => {
                    *lifecycle = Lifecycle::Starting;
                    match self.provision().await {
                        Ok(container_id) => {
                            *lifecycle = Lifecycle::Ready { container_id };
                        }
                        Err(e) => {
                            *lifecycle = Lifecycle::Absent;
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Executor for ContainerBackend {
    async fn run_shell_command(
        &self,
        target: &ExecutionTarget,
        command: &str,
        opts: BashOptions,
        cancel: CancellationToken,
    ) -> ExecResult<BashResult> {
        let inner = self.ensure_ready(&cancel).await?;
        inner.run_shell_command(target, command, opts, cancel).await
    }

    async fn read_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<ReadResult> {
        let inner = self.ensure_ready(&cancel).await?;
        inner.read_file(target, path, offset, limit, cancel).await
    }

    async fn write_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        content: &str,
        cancel: CancellationToken,
    ) -> ExecResult<WriteResult> {
        let inner = self.ensure_ready(&cancel).await?;
        inner.write_file(target, path, content, cancel).await
    }

    async fn edit_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        old_text: &str,
        new_text: &str,
        cancel: CancellationToken,
    ) -> ExecResult<EditResult> {
        let inner = self.ensure_ready(&cancel).await?;
        inner
            .edit_file(target, path, old_text, new_text, cancel)
            .await
    }

    async fn list_directory(
        &self,
        target: &ExecutionTarget,
        path: Option<&str>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<LsResult> {
        let inner = self.ensure_ready(&cancel).await?;
        inner.list_directory(target, path, limit, cancel).await
    }

    async fn find_files(
        &self,
        target: &ExecutionTarget,
        pattern: &str,
        path: Option<&str>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<FindResult> {
        let inner = self.ensure_ready(&cancel).await?;
        inner.find_files(target, pattern, path, limit, cancel).await
    }

    async fn search_content(
        &self,
        target: &ExecutionTarget,
        query: &GrepOptions,
        cancel: CancellationToken,
    ) -> ExecResult<GrepResult> {
        let inner = self.ensure_ready(&cancel).await?;
        inner.search_content(target, query, cancel).await
    }

    /// Best-effort teardown: stop, force-remove, unlink the socket. Each
    /// step's failure is logged and swallowed; shutdown always completes.
    async fn shutdown(&self) -> ExecResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;

        if let Lifecycle::Ready { container_id } = &*lifecycle {
            if let Err(e) = self
                .runtime
                .stop_container(container_id, Some(STOP_TIMEOUT_SECS))
                .await
            {
                warn!("failed to stop container {container_id}: {e}");
            }
            if let Err(e) = self.runtime.remove_container(container_id, true).await {
                warn!("failed to remove container {container_id}: {e}");
            }
        }

        let socket = self.socket_path();
        if socket.exists() {
            if let Err(e) = std::fs::remove_file(&socket) {
                warn!("failed to remove socket {}: {e}", socket.display());
            }
        }

        *lifecycle = Lifecycle::Stopped;
        Ok(())
    }
}

impl std::fmt::Debug for ContainerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerBackend")
            .field("image", &self.config.image)
            .field("socket_dir", &self.config.socket_dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ContainerBackendConfig {
        let mut config = ContainerBackendConfig::for_image("ghcr.io/acme/burrow-sidecar:v1");
        config.socket_dir = dir.path().to_path_buf();
        config
    }

    #[test]
    fn test_container_name_derived_from_image() {
        let dir = TempDir::new().unwrap();
        let backend = ContainerBackend::new(config(&dir)).unwrap();
        assert_eq!(backend.container_name(), "burrow-burrow-sidecar");
    }

    #[test]
    fn test_spec_carries_env_mounts_and_limits() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.cpus = Some(1.5);
        cfg.memory = Some("512m".to_string());
        cfg.workspace_volume = Some(PathBuf::from("/srv/work"));
        cfg.shared_workspace = false;

        let backend = ContainerBackend::new(cfg).unwrap();
        let spec = backend.container_spec();

        assert!(spec.env.iter().any(|(k, v)| {
            k == "BURROW_SOCKET" && v == "/burrow/sidecar.sock"
        }));
        assert!(spec.env.iter().any(|(k, v)| {
            k == "BURROW_SHARED_WORKSPACE" && v == "false"
        }));
        assert!(spec.binds.iter().any(|(_, c)| c == "/burrow"));
        assert!(
            spec.binds
                .iter()
                .any(|(h, c)| h == "/srv/work" && c == "/workspace")
        );
        assert_eq!(spec.cpus, Some(1.5));
        assert_eq!(spec.memory.as_deref(), Some("512m"));
    }

    #[test]
    fn test_stale_non_socket_path_is_refused() {
        let dir = TempDir::new().unwrap();
        let backend = ContainerBackend::new(config(&dir)).unwrap();
        std::fs::write(backend.socket_path(), "not a socket").unwrap();

        let err = backend.cleanup_stale_socket().unwrap_err();
        assert!(matches!(err, ExecError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_initial_state_is_absent() {
        let dir = TempDir::new().unwrap();
        let backend = ContainerBackend::new(config(&dir)).unwrap();
        assert_eq!(
            backend.lifecycle_state().await,
            ContainerLifecycleState::Absent
        );
    }
}
