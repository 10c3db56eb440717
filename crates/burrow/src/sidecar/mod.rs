//! Sidecar client backend: a thin executor that speaks the sidecar protocol
//! over one configured transport.
//!
//! Used directly when a daemon is already running (standalone sidecar mode);
//! the container backend reuses the same machinery against the socket of the
//! container it manages.

mod client;

pub use client::SidecarClient;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::SidecarBackendConfig;
use crate::error::{ExecError, ExecResult};
use crate::exec::{BashOptions, ExecutionTarget, Executor, GrepOptions};
use burrow_protocol::{
    BashRequest, BashResult, EditRequest, EditResult, FindRequest, FindResult, GrepRequest,
    GrepResult, LsRequest, LsResult, ReadRequest, ReadResult, WriteRequest, WriteResult,
};

/// Transport binding for a sidecar daemon. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidecarChannel {
    Unix { socket: PathBuf },
    Tcp { host: String, port: u16 },
}

/// Backend that forwards every operation to a sidecar daemon.
#[derive(Debug)]
pub struct SidecarBackend {
    client: SidecarClient,
    ready_wait: Option<Duration>,
    verified: AtomicBool,
    closed: AtomicBool,
}

impl SidecarBackend {
    /// Validate the transport configuration and bind a client to it.
    /// No connection is attempted here.
    pub fn new(config: SidecarBackendConfig) -> ExecResult<Self> {
        let channel = config.channel()?;
        let client = SidecarClient::from_channel(channel, config.auth_token.clone());
        Ok(Self {
            client,
            ready_wait: config.ready_timeout_secs.map(Duration::from_secs),
            verified: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Wrap an already-verified client (used by the container backend once
    /// its socket is ready).
    pub(crate) fn from_client(client: SidecarClient) -> Self {
        Self {
            client,
            ready_wait: None,
            verified: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    async fn ensure_ready(&self, cancel: &CancellationToken) -> ExecResult<&SidecarClient> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecError::NotInitialized);
        }
        if cancel.is_cancelled() {
            return Err(ExecError::Aborted);
        }
        if let Some(wait) = self.ready_wait {
            if !self.verified.load(Ordering::Acquire) {
                self.client.wait_ready(wait, cancel).await?;
                self.verified.store(true, Ordering::Release);
            }
        }
        Ok(&self.client)
    }
}

#[async_trait]
impl Executor for SidecarBackend {
    async fn run_shell_command(
        &self,
        target: &ExecutionTarget,
        command: &str,
        opts: BashOptions,
        cancel: CancellationToken,
    ) -> ExecResult<BashResult> {
        let client = self.ensure_ready(&cancel).await?;
        let request = BashRequest {
            command: command.to_string(),
            timeout_seconds: opts.timeout.map(|d| d.as_secs()),
            target: Some(target.to_string()),
        };
        client.bash(&request, opts.output.as_ref(), &cancel).await
    }

    async fn read_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        offset: Option<usize>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<ReadResult> {
        let client = self.ensure_ready(&cancel).await?;
        let request = ReadRequest {
            path: path.to_string(),
            offset,
            limit,
            target: Some(target.to_string()),
        };
        client.read(&request, &cancel).await
    }

    async fn write_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        content: &str,
        cancel: CancellationToken,
    ) -> ExecResult<WriteResult> {
        let client = self.ensure_ready(&cancel).await?;
        let request = WriteRequest {
            path: path.to_string(),
            content: content.to_string(),
            target: Some(target.to_string()),
        };
        client.write(&request, &cancel).await
    }

    async fn edit_file(
        &self,
        target: &ExecutionTarget,
        path: &str,
        old_text: &str,
        new_text: &str,
        cancel: CancellationToken,
    ) -> ExecResult<EditResult> {
        let client = self.ensure_ready(&cancel).await?;
        let request = EditRequest {
            path: path.to_string(),
            old_text: old_text.to_string(),
            new_text: new_text.to_string(),
            target: Some(target.to_string()),
        };
        client.edit(&request, &cancel).await
    }

    async fn list_directory(
        &self,
        target: &ExecutionTarget,
        path: Option<&str>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<LsResult> {
        let client = self.ensure_ready(&cancel).await?;
        let request = LsRequest {
            path: path.map(str::to_string),
            limit,
            target: Some(target.to_string()),
        };
        client.ls(&request, &cancel).await
    }

    async fn find_files(
        &self,
        target: &ExecutionTarget,
        pattern: &str,
        path: Option<&str>,
        limit: Option<usize>,
        cancel: CancellationToken,
    ) -> ExecResult<FindResult> {
        let client = self.ensure_ready(&cancel).await?;
        let request = FindRequest {
            pattern: pattern.to_string(),
            path: path.map(str::to_string),
            limit,
            target: Some(target.to_string()),
        };
        client.find(&request, &cancel).await
    }

    async fn search_content(
        &self,
        target: &ExecutionTarget,
        query: &GrepOptions,
        cancel: CancellationToken,
    ) -> ExecResult<GrepResult> {
        let client = self.ensure_ready(&cancel).await?;
        let request = GrepRequest {
            pattern: query.pattern.clone(),
            path: query.path.clone(),
            glob: query.glob.clone(),
            ignore_case: query.ignore_case,
            literal: query.literal,
            context: query.context,
            limit: query.limit,
            target: Some(target.to_string()),
        };
        client.grep(&request, &cancel).await
    }

    async fn shutdown(&self) -> ExecResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
