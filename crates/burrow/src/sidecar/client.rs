//! HTTP client for the sidecar protocol.
//!
//! One client is bound to one transport (Unix socket or TCP) for its whole
//! life. Non-streaming operations are a single request/response with the
//! JSON envelope; `bash` consumes a newline-delimited JSON stream, pushing
//! each delta to the caller's output channel the moment it arrives.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use hyperlocal::UnixConnector;
use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::SidecarChannel;
use crate::error::{ExecError, ExecResult};
use crate::exec::{OutputChunk, OutputSink};
use burrow_protocol::{
    BashEvent, BashRequest, BashResult, EditRequest, EditResult, Envelope, FindRequest,
    FindResult, GrepRequest, GrepResult, HealthResult, LsRequest, LsResult, ReadRequest,
    ReadResult, WriteRequest, WriteResult,
};

/// Interval between readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone)]
enum Transport {
    Unix {
        client: Client<UnixConnector, Full<Bytes>>,
        socket: PathBuf,
    },
    Tcp {
        client: Client<HttpConnector, Full<Bytes>>,
        authority: String,
    },
}

/// Protocol client bound to one sidecar transport.
#[derive(Clone)]
pub struct SidecarClient {
    transport: Transport,
    token: Option<String>,
}

impl SidecarClient {
    /// Client for a daemon listening on a Unix socket.
    pub fn unix(socket: impl Into<PathBuf>, token: Option<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(UnixConnector);
        Self {
            transport: Transport::Unix {
                client,
                socket: socket.into(),
            },
            token,
        }
    }

    /// Client for a daemon listening on TCP.
    pub fn tcp(host: &str, port: u16, token: Option<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            transport: Transport::Tcp {
                client,
                authority: format!("{host}:{port}"),
            },
            token,
        }
    }

    pub fn from_channel(channel: SidecarChannel, token: Option<String>) -> Self {
        match channel {
            SidecarChannel::Unix { socket } => Self::unix(socket, token),
            SidecarChannel::Tcp { host, port } => Self::tcp(&host, port, token),
        }
    }

    fn uri(&self, path: &str) -> ExecResult<Uri> {
        match &self.transport {
            Transport::Unix { socket, .. } => Ok(hyperlocal::Uri::new(socket, path).into()),
            Transport::Tcp { authority, .. } => format!("http://{authority}{path}")
                .parse()
                .map_err(|e| ExecError::Protocol(format!("invalid request uri: {e}"))),
        }
    }

    /// Issue one request. Cancellation destroys the in-flight connection and
    /// surfaces `Aborted`.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Bytes,
        cancel: &CancellationToken,
    ) -> ExecResult<Response<Incoming>> {
        let mut builder = Request::builder()
            .method(method)
            .uri(self.uri(path)?)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder
            .body(Full::new(body))
            .map_err(|e| ExecError::Protocol(format!("invalid request: {e}")))?;

        let pending = match &self.transport {
            Transport::Unix { client, .. } => client.request(request),
            Transport::Tcp { client, .. } => client.request(request),
        };

        tokio::select! {
            response = pending => response.map_err(|e| ExecError::ConnectFailed(e.to_string())),
            _ = cancel.cancelled() => Err(ExecError::Aborted),
        }
    }

    async fn collect_body(
        response: Response<Incoming>,
        cancel: &CancellationToken,
    ) -> ExecResult<(StatusCode, Bytes)> {
        let status = response.status();
        let body = tokio::select! {
            collected = response.into_body().collect() => collected
                .map_err(|e| ExecError::ConnectFailed(e.to_string()))?
                .to_bytes(),
            _ = cancel.cancelled() => return Err(ExecError::Aborted),
        };
        Ok((status, body))
    }

    /// One enveloped request/response round trip.
    ///
    /// A non-2xx status, `ok: false`, or `ok: true` without a result are all
    /// a single failure carrying the most specific message available.
    async fn call<Req: Serialize, Res: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
        cancel: &CancellationToken,
    ) -> ExecResult<Res> {
        if cancel.is_cancelled() {
            return Err(ExecError::Aborted);
        }
        let body = serde_json::to_vec(request)
            .map_err(|e| ExecError::Protocol(format!("encoding request: {e}")))?;
        let response = self.send(Method::POST, path, Bytes::from(body), cancel).await?;
        let (status, body) = Self::collect_body(response, cancel).await?;

        match serde_json::from_slice::<Envelope<Res>>(&body) {
            Ok(envelope) if envelope.ok => envelope.result.ok_or_else(|| {
                ExecError::Protocol("successful response without a result".to_string())
            }),
            Ok(envelope) => {
                let message = envelope
                    .error
                    .map(|e| e.message().to_string())
                    .unwrap_or_else(|| format!("server returned {status}"));
                Err(ExecError::Remote(message))
            }
            Err(_) if !status.is_success() => {
                Err(ExecError::Remote(format!("server returned {status}")))
            }
            Err(e) => Err(ExecError::Protocol(format!("malformed response: {e}"))),
        }
    }

    /// `GET /health`. The body is the bare health object, not an envelope.
    pub async fn health(&self, cancel: &CancellationToken) -> ExecResult<HealthResult> {
        let response = self
            .send(Method::GET, "/health", Bytes::new(), cancel)
            .await?;
        let (status, body) = Self::collect_body(response, cancel).await?;
        if !status.is_success() {
            return Err(ExecError::Remote(format!("server returned {status}")));
        }
        serde_json::from_slice(&body)
            .map_err(|e| ExecError::Protocol(format!("malformed health response: {e}")))
    }

    /// Poll `/health` until the daemon answers, up to `timeout`.
    pub async fn wait_ready(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.health(cancel).await {
                Ok(health) if health.ok => return Ok(()),
                Ok(_) => {}
                Err(ExecError::Aborted) => return Err(ExecError::Aborted),
                Err(e) => debug!("sidecar not ready yet: {e}"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ExecError::SidecarUnreachable(format!(
                    "no healthy response within {timeout:?}"
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// `POST /bash`: stream NDJSON records until a terminal record.
    pub async fn bash(
        &self,
        request: &BashRequest,
        sink: Option<&OutputSink>,
        cancel: &CancellationToken,
    ) -> ExecResult<BashResult> {
        if cancel.is_cancelled() {
            return Err(ExecError::Aborted);
        }
        let body = serde_json::to_vec(request)
            .map_err(|e| ExecError::Protocol(format!("encoding request: {e}")))?;
        let response = self
            .send(Method::POST, "/bash", Bytes::from(body), cancel)
            .await?;

        if !response.status().is_success() {
            let (status, body) = Self::collect_body(response, cancel).await?;
            let message = serde_json::from_slice::<Envelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message().to_string())
                .unwrap_or_else(|| format!("server returned {status}"));
            return Err(ExecError::Remote(message));
        }

        let mut body = response.into_body();
        let mut pending = PendingBashStream::default();

        loop {
            tokio::select! {
                // Dropping the body tears down the connection.
                _ = cancel.cancelled() => return Err(ExecError::Aborted),
                frame = body.frame() => match frame {
                    None => break,
                    Some(Err(e)) => return Err(ExecError::ConnectFailed(e.to_string())),
                    Some(Ok(frame)) => {
                        if let Some(data) = frame.data_ref() {
                            if let Some(result) = pending.feed(data, sink)? {
                                return Ok(result);
                            }
                        }
                    }
                },
            }
        }

        pending.finish(sink)
    }

    pub async fn read(
        &self,
        request: &ReadRequest,
        cancel: &CancellationToken,
    ) -> ExecResult<ReadResult> {
        self.call("/read", request, cancel).await
    }

    pub async fn write(
        &self,
        request: &WriteRequest,
        cancel: &CancellationToken,
    ) -> ExecResult<WriteResult> {
        self.call("/write", request, cancel).await
    }

    pub async fn edit(
        &self,
        request: &EditRequest,
        cancel: &CancellationToken,
    ) -> ExecResult<EditResult> {
        self.call("/edit", request, cancel).await
    }

    pub async fn ls(&self, request: &LsRequest, cancel: &CancellationToken) -> ExecResult<LsResult> {
        self.call("/ls", request, cancel).await
    }

    pub async fn find(
        &self,
        request: &FindRequest,
        cancel: &CancellationToken,
    ) -> ExecResult<FindResult> {
        self.call("/find", request, cancel).await
    }

    pub async fn grep(
        &self,
        request: &GrepRequest,
        cancel: &CancellationToken,
    ) -> ExecResult<GrepResult> {
        self.call("/grep", request, cancel).await
    }
}

impl std::fmt::Debug for SidecarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.transport {
            Transport::Unix { socket, .. } => f
                .debug_struct("SidecarClient")
                .field("socket", socket)
                .finish(),
            Transport::Tcp { authority, .. } => f
                .debug_struct("SidecarClient")
                .field("authority", authority)
                .finish(),
        }
    }
}

/// In-flight state for one streaming bash call: the buffered partial line,
/// the accumulated output, and any deferred decode error. Lives for the
/// duration of one call.
#[derive(Default)]
struct PendingBashStream {
    partial: String,
    output: String,
    deferred_error: Option<String>,
}

impl PendingBashStream {
    /// Feed raw bytes; returns the final result once a `done` record arrives.
    fn feed(&mut self, bytes: &[u8], sink: Option<&OutputSink>) -> ExecResult<Option<BashResult>> {
        self.partial.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            if let Some(result) = self.handle_line(line.trim(), sink)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    fn handle_line(
        &mut self,
        line: &str,
        sink: Option<&OutputSink>,
    ) -> ExecResult<Option<BashResult>> {
        if line.is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<BashEvent>(line) {
            Ok(BashEvent::Delta { data, stream }) => {
                self.output.push_str(&data);
                if let Some(sink) = sink {
                    let _ = sink.send(OutputChunk {
                        data,
                        source: stream,
                    });
                }
                Ok(None)
            }
            Ok(BashEvent::Done {
                exit_code,
                timed_out,
            }) => Ok(Some(BashResult::new(
                std::mem::take(&mut self.output),
                exit_code,
                timed_out,
            ))),
            Ok(BashEvent::Error { message }) => Err(ExecError::Remote(message)),
            Err(e) => {
                // Skip the malformed record, but remember it in case the
                // stream never reaches a terminal record.
                self.deferred_error = Some(format!("malformed stream record: {e}"));
                Ok(None)
            }
        }
    }

    /// The stream closed. A final unterminated line may still hold the
    /// terminal record; otherwise the partial output is discarded.
    fn finish(mut self, sink: Option<&OutputSink>) -> ExecResult<BashResult> {
        let partial = std::mem::take(&mut self.partial);
        let line = partial.trim().to_string();
        if !line.is_empty() {
            if let Some(result) = self.handle_line(&line, sink)? {
                return Ok(result);
            }
        }
        Err(match self.deferred_error {
            Some(message) => ExecError::Protocol(message),
            None => ExecError::UnexpectedStreamEnd,
        })
    }
}
