//! Local backend: filesystem and process operations in-process, rooted at a
//! configured workspace directory.
//!
//! The workspace is either shared across execution targets or namespaced
//! per target (`<root>/<target>`); every requested path is contained to the
//! target's root before anything touches the filesystem.

mod diff;
mod files;
mod paths;
mod shell;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::config::LocalBackendConfig;
use crate::error::{ExecError, ExecResult};
use crate::exec::{BashOptions, ExecutionTarget, Executor, GrepOptions};
use burrow_protocol::{
    BashResult, EditResult, FindResult, GrepResult, LsResult, ReadResult, WriteResult,
};

/// Availability of the external search binaries, probed once per backend.
#[derive(Debug, Clone, Copy, Default)]
struct SearchTools {
    fd: bool,
    rg: bool,
}

/// Backend that performs every operation directly on the local machine.
#[derive(Debug)]
pub struct LocalBackend {
    config: LocalBackendConfig,
    tools: SearchTools,
}

impl LocalBackend {
    /// Create a backend rooted at the configured workspace directory,
    /// creating the directory if needed.
    pub fn new(config: LocalBackendConfig) -> ExecResult<Self> {
        if config.workspace_root.as_os_str().is_empty() {
            return Err(ExecError::InvalidConfiguration(
                "workspace_root cannot be empty".to_string(),
            ));
        }
        std::fs::create_dir_all(&config.workspace_root)?;

        let tools = SearchTools {
            fd: binary_available("fd"),
            rg: binary_available("rg"),
        };
        Ok(Self { config, tools })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.config.workspace_root
    }

    /// Root directory for one execution target, created on demand.
    async fn target_root(&self, target: &ExecutionTarget) -> ExecResult<PathBuf> {
        if self.config.shared_workspace {
            return Ok(self.config.workspace_root.clone());
        }
        paths::validate_target(target.as_str())?;
        let root = self.config.workspace_root.join(target.as_str());
        fs::create_dir_all(&root).await?;
        Ok(root)
    }

    /// Resolve a requested path inside the target's workspace.
    async fn resolve(&self, target: &ExecutionTarget, requested: &str) -> ExecResult<PathBuf> {
        let root = self.target_root(target).await?;
        paths::resolve_path(&root, requested)
    }

    /// Resolve an optional search root, defaulting to the target's root.
    async fn resolve_base(
        &self,
        target: &ExecutionTarget,
        requested: Option<&str>,
    ) -> ExecResult<PathBuf> {
        match requested {
            Some(path) => self.resolve(target, path).await,
            None => self.target_root(target).await,
        }
    }
}

fn binary_available(name: &str) -> bool {
    std::process::Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[async_trait]
impl Executor for LocalBackend {
    async fn run_shell_command(
        &self,
        target: &ExecutionTarget,
        command: &str,
        opts: BashOptions,
        cancel: CancellationToken,
    ) -> ExecResult<BashResult> {
        if cancel.is_cancelled() {
            return Err(ExecError::Aborted);
        }
        let cwd = self.target_root(target).await?;
        shell::run(&cwd, command, opts, &cancel).await
    }

    async fn read_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<ReadResult> {
        if cancel.is_cancelled() {
            return Err(ExecError::Aborted);
        }
        let path = self.resolve(target, path).await?;
        files::read_file(&path, offset, limit).await
    }

    async fn write_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        content: &str,
        cancel: CancellationToken,
    ) -> ExecResult<WriteResult> {
        if cancel.is_cancelled() {
            return Err(ExecError::Aborted);
        }
        let path = self.resolve(target, path).await?;
        files::write_file(&path, content).await
    }

    async fn edit_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        old_text: &str,
        new_text: &str,
        cancel: CancellationToken,
    ) -> ExecResult<EditResult> {
        if cancel.is_cancelled() {
            return Err(ExecError::Aborted);
        }
        let path = self.resolve(target, path).await?;
        files::edit_file(&path, old_text, new_text).await
    }

    async fn list_directory(
        &self,
        target: &ExecutionTarget,
        path: Option<&str>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<LsResult> {
        if cancel.is_cancelled() {
            return Err(ExecError::Aborted);
        }
        let path = self.resolve_base(target, path).await?;
        files::list_directory(&path, limit).await
    }

    async fn find_files(
        &self,
        target: &ExecutionTarget,
        pattern: &str,
        path: Option<&str>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<FindResult> {
        if cancel.is_cancelled() {
            return Err(ExecError::Aborted);
        }
        let base = self.resolve_base(target, path).await?;
        files::find_files(&base, pattern, limit, self.tools.fd).await
    }

    async fn search_content(
        &self,
        target: &ExecutionTarget,
        query: &GrepOptions,
        cancel: CancellationToken,
    ) -> ExecResult<GrepResult> {
        if cancel.is_cancelled() {
            return Err(ExecError::Aborted);
        }
        let base = self.resolve_base(target, query.path.as_deref()).await?;
        files::search_content(&base, query, self.tools.rg).await
    }
}
