//! Streaming protocol client: request, incremental NDJSON parse, replay.

use std::collections::BTreeMap;
use std::io::Write;

use cordon_api_models::{ErrorBody, ExecRequest, StreamEvent, decode_payload};
use futures_util::StreamExt;
use reqwest::StatusCode;
use thiserror::Error;

/// Exit code for every failure that happens on this side of the wire, kept
/// disjoint from remote exit codes by convention.
pub const LOCAL_FAILURE_EXIT_CODE: i32 = 125;

/// Exit code used when the remote process died without one (signal kill).
const REMOTE_EXIT_CODE_UNAVAILABLE: i32 = 1;

/// Client-side failures; all of them map to [`LOCAL_FAILURE_EXIT_CODE`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// `--keep-env` named variables that are not set locally.
    #[error("local environment variable(s) are not set: {names}")]
    MissingLocalEnv {
        /// Sorted, comma-separated missing names.
        names: String,
    },
    /// No executable followed the `--` delimiter.
    #[error("missing remote executable after `--`")]
    MissingExecutable,
    /// The client's working directory could not be resolved.
    #[error("failed to determine current working directory: {source}")]
    CurrentDir {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The HTTP request itself failed.
    #[error("request failed: {source}")]
    Transport {
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with a non-success status before streaming.
    #[error("server rejected request ({status}): {message}")]
    ServerRejected {
        /// HTTP status the server returned.
        status: StatusCode,
        /// Error message from the JSON body, or the raw body.
        message: String,
    },
    /// The stream violated the event protocol.
    #[error("stream protocol error: {0}")]
    Protocol(String),
    /// Replaying bytes to local stdout/stderr failed.
    #[error("failed to write output: {source}")]
    OutputWrite {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The server reported a runtime failure after the stream started.
    #[error("remote runtime error: {0}")]
    RemoteRuntime(String),
}

/// Resolve every `--keep-env` name locally, reporting all missing names in
/// one error rather than the first.
///
/// # Errors
///
/// Returns [`ClientError::MissingLocalEnv`] listing every unset name.
pub fn collect_forwarded_env<F>(
    keep_env: &[String],
    mut lookup: F,
) -> Result<BTreeMap<String, String>, ClientError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut env = BTreeMap::new();
    let mut missing = Vec::new();

    for name in keep_env {
        match lookup(name) {
            Some(value) => {
                env.insert(name.clone(), value);
            }
            None => missing.push(name.clone()),
        }
    }

    if missing.is_empty() {
        return Ok(env);
    }

    missing.sort();
    missing.dedup();
    Err(ClientError::MissingLocalEnv {
        names: missing.join(", "),
    })
}

/// Send the request and replay the stream, returning the exit code to use
/// for this process.
///
/// # Errors
///
/// Returns a [`ClientError`] for transport failures, server rejections,
/// protocol violations, remote runtime errors, and local write failures.
pub async fn run_remote_request<WOut: Write, WErr: Write>(
    server_url: &str,
    payload: ExecRequest,
    stdout: &mut WOut,
    stderr: &mut WErr,
) -> Result<i32, ClientError> {
    let client = reqwest::Client::new();
    let response = client
        .post(server_url)
        .json(&payload)
        .send()
        .await
        .map_err(|source| ClientError::Transport { source })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ClientError::Transport { source })?;
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map_or_else(|_| body.trim().to_string(), |decoded| decoded.error);
        return Err(ClientError::ServerRejected { status, message });
    }

    process_stream(response, stdout, stderr).await
}

async fn process_stream<WOut: Write, WErr: Write>(
    response: reqwest::Response,
    stdout: &mut WOut,
    stderr: &mut WErr,
) -> Result<i32, ClientError> {
    let mut buffer = Vec::new();
    let mut stream = response.bytes_stream();
    let mut saw_start = false;
    let mut exit_code: Option<i32> = None;

    while let Some(next_chunk) = stream.next().await {
        let chunk = next_chunk.map_err(|source| ClientError::Transport { source })?;
        buffer.extend_from_slice(&chunk);

        // Chunks split lines arbitrarily; hold the partial trailing line.
        while let Some(newline_index) = buffer.iter().position(|byte| *byte == b'\n') {
            let line = buffer.drain(..=newline_index).collect::<Vec<u8>>();
            let line = &line[..line.len().saturating_sub(1)];
            if line.is_empty() {
                continue;
            }

            handle_event_line(line, stdout, stderr, &mut saw_start, &mut exit_code)?;
            if let Some(code) = exit_code {
                return Ok(code);
            }
        }
    }

    if !buffer.is_empty() {
        handle_event_line(&buffer, stdout, stderr, &mut saw_start, &mut exit_code)?;
    }

    exit_code.ok_or_else(|| ClientError::Protocol("stream ended before exit event".to_string()))
}

fn handle_event_line<WOut: Write, WErr: Write>(
    line: &[u8],
    stdout: &mut WOut,
    stderr: &mut WErr,
    saw_start: &mut bool,
    exit_code: &mut Option<i32>,
) -> Result<(), ClientError> {
    let event: StreamEvent = serde_json::from_slice(line)
        .map_err(|error| ClientError::Protocol(format!("invalid event JSON: {error}")))?;

    match event {
        StreamEvent::Start {} => {
            *saw_start = true;
            Ok(())
        }
        StreamEvent::Stdout { data_b64 } => {
            let bytes = decode_payload(&data_b64).map_err(|error| {
                ClientError::Protocol(format!("invalid stdout base64 payload: {error}"))
            })?;
            stdout
                .write_all(&bytes)
                .and_then(|()| stdout.flush())
                .map_err(|source| ClientError::OutputWrite { source })
        }
        StreamEvent::Stderr { data_b64 } => {
            let bytes = decode_payload(&data_b64).map_err(|error| {
                ClientError::Protocol(format!("invalid stderr base64 payload: {error}"))
            })?;
            stderr
                .write_all(&bytes)
                .and_then(|()| stderr.flush())
                .map_err(|source| ClientError::OutputWrite { source })
        }
        StreamEvent::Exit { exit_code: remote } => {
            if !*saw_start {
                return Err(ClientError::Protocol(
                    "received exit event before start event".to_string(),
                ));
            }
            *exit_code = Some(remote.unwrap_or(REMOTE_EXIT_CODE_UNAVAILABLE));
            Ok(())
        }
        StreamEvent::Error { message } => Err(ClientError::RemoteRuntime(message)),
    }
}
