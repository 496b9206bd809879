#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
//! Shared wire DTOs for the Cordon execution API.
//!
//! These types are re-used by the remote client for request/response encoding
//! so the contract stays a single source of truth: the flat execution request
//! body, the bounded aggregate response, the NDJSON stream events, and the
//! JSON error body returned for every pre-stream rejection.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

/// Content type of the streaming execution response.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Flat execution request accepted by both the aggregate and streaming
/// endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecRequest {
    /// Executable token: a bare command name resolved on `PATH`, or a path.
    pub executable: String,
    /// Arguments passed verbatim, never shell-interpreted.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child; server default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Environment entries forwarded with the request; subject to policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

/// Bounded aggregate response: full capture with per-stream 1 MiB caps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecResponse {
    /// Captured stdout, lossily decoded, possibly truncated.
    pub stdout: String,
    /// Captured stderr, lossily decoded, possibly truncated.
    pub stderr: String,
    /// Exit code; `None` when the process was killed by a signal.
    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,
}

/// JSON body carried by every non-success, non-stream response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Human-readable reason for the rejection.
    pub error: String,
}

/// One line of the NDJSON execution stream.
///
/// Sequence invariant: exactly one `start` first, zero or more
/// `stdout`/`stderr` in between, exactly one terminal `exit` or `error`
/// last. Payload bytes are base64-encoded so the stream is binary-safe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    /// The process spawned and output may follow.
    Start {},
    /// A chunk of the child's stdout.
    Stdout {
        /// Raw chunk bytes, base64 (STANDARD alphabet).
        data_b64: String,
    },
    /// A chunk of the child's stderr.
    Stderr {
        /// Raw chunk bytes, base64 (STANDARD alphabet).
        data_b64: String,
    },
    /// Terminal event: the process exited.
    Exit {
        /// Exit code; `None` when killed by a signal.
        #[serde(rename = "exitCode")]
        exit_code: Option<i32>,
    },
    /// Terminal event: the server failed after the stream started.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

impl StreamEvent {
    /// Wrap a stdout chunk, encoding the bytes for the wire.
    #[must_use]
    pub fn stdout_chunk(bytes: &[u8]) -> Self {
        Self::Stdout {
            data_b64: general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Wrap a stderr chunk, encoding the bytes for the wire.
    #[must_use]
    pub fn stderr_chunk(bytes: &[u8]) -> Self {
        Self::Stderr {
            data_b64: general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Whether this event ends the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Exit { .. } | Self::Error { .. })
    }
}

/// Decode a base64 payload from a `stdout`/`stderr` event.
///
/// # Errors
///
/// Returns an error when the payload is not valid STANDARD-alphabet base64.
pub fn decode_payload(data_b64: &str) -> Result<Vec<u8>, base64::DecodeError> {
    general_purpose::STANDARD.decode(data_b64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_request_defaults_optional_fields() {
        let request: ExecRequest =
            serde_json::from_str(r#"{"executable":"curl"}"#).expect("minimal request");
        assert_eq!(request.executable, "curl");
        assert!(request.args.is_empty());
        assert!(request.cwd.is_none());
        assert!(request.env.is_none());
    }

    #[test]
    fn stream_event_wire_tags_are_lowercase() {
        let line = serde_json::to_string(&StreamEvent::Exit { exit_code: Some(3) })
            .expect("serialize exit");
        assert_eq!(line, r#"{"event":"exit","exitCode":3}"#);

        let line = serde_json::to_string(&StreamEvent::Start {}).expect("serialize start");
        assert_eq!(line, r#"{"event":"start"}"#);
    }

    #[test]
    fn payload_round_trips_arbitrary_bytes() {
        let bytes = [0u8, 255, 10, 13, 65];
        let event = StreamEvent::stdout_chunk(&bytes);
        let StreamEvent::Stdout { data_b64 } = &event else {
            panic!("expected stdout event");
        };
        assert_eq!(decode_payload(data_b64).expect("decode"), bytes);
    }

    #[test]
    fn terminal_classification() {
        assert!(StreamEvent::Exit { exit_code: None }.is_terminal());
        assert!(
            StreamEvent::Error {
                message: "boom".into()
            }
            .is_terminal()
        );
        assert!(!StreamEvent::Start {}.is_terminal());
        assert!(!StreamEvent::stdout_chunk(b"x").is_terminal());
    }

    #[test]
    fn exit_code_uses_camel_case_on_the_wire() {
        let response = ExecResponse {
            stdout: "ok".into(),
            stderr: String::new(),
            exit_code: Some(0),
        };
        let json = serde_json::to_value(&response).expect("serialize");
        assert!(json.get("exitCode").is_some());
        assert!(json.get("exit_code").is_none());
    }
}
