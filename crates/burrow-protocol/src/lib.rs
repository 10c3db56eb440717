//! Sidecar wire protocol types.
//!
//! Defines the request bodies, response envelope, and streaming bash records
//! exchanged between a backend client and a sidecar daemon. The transport is
//! HTTP over a Unix socket or TCP; non-streaming operations use a single
//! JSON request and a single JSON [`Envelope`] response, while `POST /bash`
//! answers with newline-delimited JSON [`BashEvent`] records.
//!
//! Field names on the wire are camelCase; both ends of the protocol share
//! these types, so the daemon and every client stay in lockstep.

use serde::{Deserialize, Serialize};

/// Literal content returned by a content search with zero matches.
pub const NO_MATCHES: &str = "No matches found";

// ============================================================================
// Envelope
// ============================================================================

/// Response envelope for all non-streaming operations.
///
/// A conforming server always sends the envelope form: `ok: true` with a
/// `result`, or `ok: false` with an `error`. Clients treat `ok: true`
/// without a `result` as a protocol violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteFailure>,
}

impl<T> Envelope<T> {
    /// Envelope for a successful result.
    pub fn success(result: T) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Envelope for a failed operation.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(RemoteFailure::Message(message.into())),
        }
    }
}

/// Server-reported failure, either a bare string or `{ "message": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteFailure {
    Message(String),
    Detailed { message: String },
}

impl RemoteFailure {
    /// The human-readable message, whichever shape the server used.
    pub fn message(&self) -> &str {
        match self {
            RemoteFailure::Message(m) => m,
            RemoteFailure::Detailed { message } => message,
        }
    }
}

// ============================================================================
// Streaming bash records
// ============================================================================

/// Origin of an output fragment, when the daemon can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One newline-delimited record in a `POST /bash` response body.
///
/// A well-formed stream is zero or more `delta` records followed by exactly
/// one terminal record (`done` or `error`). A stream that closes without a
/// terminal record is a protocol violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BashEvent {
    /// A fragment of command output, in arrival order.
    Delta {
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stream: Option<StreamSource>,
    },
    /// Terminal record: the command finished (or was stopped).
    #[serde(rename_all = "camelCase")]
    Done {
        exit_code: i32,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        timed_out: bool,
    },
    /// Terminal record: the daemon failed to run the command.
    Error { message: String },
}

// ============================================================================
// Request bodies
// ============================================================================

/// `POST /bash`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BashRequest {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// `POST /read` — `offset`/`limit` are a 1-indexed line window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// `POST /write`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    pub path: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// `POST /edit` — `old_text` must match exactly one location in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub path: String,
    pub old_text: String,
    pub new_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// `POST /ls`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// `POST /find`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindRequest {
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// `POST /grep`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepRequest {
    pub pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore_case: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub literal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

// ============================================================================
// Result payloads
// ============================================================================

/// Final result of a shell command, streaming or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BashResult {
    /// True iff `exit_code == 0`.
    pub ok: bool,
    /// Interleaved stdout/stderr in arrival order.
    pub output: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl BashResult {
    pub fn new(output: String, exit_code: i32, timed_out: bool) -> Self {
        Self {
            ok: exit_code == 0,
            output,
            exit_code,
            timed_out,
        }
    }
}

/// Content kind of a file read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadKind {
    Text,
    /// Base64-encoded raw bytes.
    Image,
}

/// Result of a (possibly windowed) file read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResult {
    #[serde(rename = "type")]
    pub kind: ReadKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

/// Result of a file write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Result of a single-match text edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Result of a directory listing: newline-joined entries, directories
/// suffixed with `/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LsResult {
    pub output: String,
}

/// Result of a glob file search; paths are relative to the search root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindResult {
    pub files: Vec<String>,
    pub truncated: bool,
    pub limit: usize,
}

/// Result of a content search in `path:line: text` form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrepResult {
    pub content: String,
}

impl GrepResult {
    /// The empty-search result.
    pub fn no_matches() -> Self {
        Self {
            content: NO_MATCHES.to_string(),
        }
    }
}

/// `GET /health` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_event_delta_roundtrip() {
        let json = r#"{"type":"delta","data":"hello","stream":"stdout"}"#;
        let event: BashEvent = serde_json::from_str(json).unwrap();
        match &event {
            BashEvent::Delta { data, stream } => {
                assert_eq!(data, "hello");
                assert_eq!(*stream, Some(StreamSource::Stdout));
            }
            _ => panic!("wrong variant"),
        }

        let encoded = serde_json::to_string(&event).unwrap();
        assert_eq!(encoded, json);
    }

    #[test]
    fn test_bash_event_delta_without_stream() {
        let event: BashEvent = serde_json::from_str(r#"{"type":"delta","data":"x"}"#).unwrap();
        match event {
            BashEvent::Delta { stream, .. } => assert!(stream.is_none()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_bash_event_done_camel_case() {
        let event: BashEvent =
            serde_json::from_str(r#"{"type":"done","exitCode":0}"#).unwrap();
        match event {
            BashEvent::Done {
                exit_code,
                timed_out,
            } => {
                assert_eq!(exit_code, 0);
                assert!(!timed_out);
            }
            _ => panic!("wrong variant"),
        }

        let timed: BashEvent =
            serde_json::from_str(r#"{"type":"done","exitCode":124,"timedOut":true}"#).unwrap();
        match timed {
            BashEvent::Done { timed_out, .. } => assert!(timed_out),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_bash_event_error() {
        let json = serde_json::to_string(&BashEvent::Error {
            message: "spawn failed".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("spawn failed"));
    }

    #[test]
    fn test_envelope_success() {
        let envelope = Envelope::success(LsResult {
            output: "src/\nmain.rs".to_string(),
        });
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""ok":true"#));
        assert!(!json.contains("error"));

        let parsed: Envelope<LsResult> = serde_json::from_str(&json).unwrap();
        assert!(parsed.ok);
        assert_eq!(parsed.result.unwrap().output, "src/\nmain.rs");
    }

    #[test]
    fn test_envelope_error_shapes() {
        // Bare string error
        let parsed: Envelope<LsResult> =
            serde_json::from_str(r#"{"ok":false,"error":"no such file"}"#).unwrap();
        assert_eq!(parsed.error.unwrap().message(), "no such file");

        // Object error
        let parsed: Envelope<LsResult> =
            serde_json::from_str(r#"{"ok":false,"error":{"message":"denied"}}"#).unwrap();
        assert_eq!(parsed.error.unwrap().message(), "denied");
    }

    #[test]
    fn test_bash_result_ok_tracks_exit_code() {
        assert!(BashResult::new(String::new(), 0, false).ok);
        assert!(!BashResult::new(String::new(), 1, false).ok);
        assert!(!BashResult::new(String::new(), 124, true).ok);
    }

    #[test]
    fn test_read_result_wire_names() {
        let result = ReadResult {
            kind: ReadKind::Text,
            content: "line".to_string(),
            total_lines: Some(10),
            has_more: Some(true),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""type":"text""#));
        assert!(json.contains(r#""totalLines":10"#));
        assert!(json.contains(r#""hasMore":true"#));
    }

    #[test]
    fn test_edit_request_wire_names() {
        let json = r#"{"path":"a.txt","oldText":"foo","newText":"bar"}"#;
        let req: EditRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.old_text, "foo");
        assert_eq!(req.new_text, "bar");
        assert!(req.target.is_none());
    }

    #[test]
    fn test_grep_request_defaults() {
        let req: GrepRequest = serde_json::from_str(r#"{"pattern":"fn main"}"#).unwrap();
        assert!(!req.ignore_case);
        assert!(!req.literal);
        assert!(req.glob.is_none());
        assert!(req.context.is_none());
    }
}
