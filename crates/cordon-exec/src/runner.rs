//! No-shell process runner.
//!
//! The runner only accepts an [`Invocation`], spawns the resolved path
//! directly, and rebuilds the child environment from scratch so request
//! variables can never hijack `PATH` or the proxy settings.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error::RunError;
use crate::gate::Invocation;

/// Per-stream capture cap for aggregate mode.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Appended to a capture exactly when the cap was exceeded.
pub const TRUNCATION_MARKER: &str = "\n...truncated...";

const READ_BUFFER_BYTES: usize = 8192;
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Aggregate outcome: both captures complete (subject to the cap) and the
/// exit code, `None` when the child was killed by a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Captured stdout, lossily decoded, marker appended if truncated.
    pub stdout: String,
    /// Captured stderr, lossily decoded, marker appended if truncated.
    pub stderr: String,
    /// Exit code of the child.
    pub exit_code: Option<i32>,
}

/// Which child output stream an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStreamKind {
    /// The child's standard output.
    Stdout,
    /// The child's standard error.
    Stderr,
}

impl OutputStreamKind {
    /// Wire/log name of the stream.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One message from a streaming reader task. Chunks arrive in read order
/// per stream; each stream ends with exactly one `Done` or `ReadError`.
#[derive(Debug)]
pub enum ReaderEvent {
    /// A chunk of raw bytes read from the child.
    Chunk {
        /// Stream the bytes came from.
        stream: OutputStreamKind,
        /// The bytes, exactly as read.
        data: Vec<u8>,
    },
    /// The stream reached EOF.
    Done {
        /// Stream that ended.
        stream: OutputStreamKind,
    },
    /// Reading the stream failed.
    ReadError {
        /// Stream that failed.
        stream: OutputStreamKind,
        /// Description of the failure.
        message: String,
    },
}

/// Spawn the approved invocation: resolved path, verbatim args, null stdin,
/// piped output, `kill_on_drop` so an abandoned handler leaves no orphan.
///
/// # Errors
///
/// Returns [`RunError::Spawn`] when the child cannot be started.
pub fn spawn_invocation(invocation: &Invocation, default_cwd: &Path) -> Result<Child, RunError> {
    let mut command = Command::new(&invocation.path);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    command.current_dir(invocation.cwd.as_deref().unwrap_or(default_cwd));

    let child_env = build_command_env(&invocation.env);
    command.env_clear();
    command.envs(
        child_env
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str())),
    );

    command.spawn().map_err(|source| RunError::Spawn { source })
}

/// Run the invocation to completion with capped captures.
///
/// Each stream buffers at most [`MAX_OUTPUT_BYTES`]; past the cap the pipe
/// is still drained so the child never blocks on a full pipe.
///
/// # Errors
///
/// Returns a [`RunError`] when the child cannot be spawned, waited on, or
/// its output read.
pub async fn run_aggregate(
    invocation: &Invocation,
    default_cwd: &Path,
) -> Result<ExecutionResult, RunError> {
    let mut child = spawn_invocation(invocation, default_cwd)?;

    let stdout = child
        .stdout
        .take()
        .ok_or(RunError::PipeMissing { stream: "stdout" })?;
    let stderr = child
        .stderr
        .take()
        .ok_or(RunError::PipeMissing { stream: "stderr" })?;

    let stdout_task = tokio::spawn(read_limited(stdout));
    let stderr_task = tokio::spawn(read_limited(stderr));

    let status = child
        .wait()
        .await
        .map_err(|source| RunError::Wait { source })?;

    let (stdout_bytes, stdout_truncated) = stdout_task
        .await
        .map_err(|source| RunError::ReaderJoin {
            stream: "stdout",
            source,
        })?
        .map_err(|source| RunError::StreamRead {
            stream: "stdout",
            source,
        })?;
    let (stderr_bytes, stderr_truncated) = stderr_task
        .await
        .map_err(|source| RunError::ReaderJoin {
            stream: "stderr",
            source,
        })?
        .map_err(|source| RunError::StreamRead {
            stream: "stderr",
            source,
        })?;

    Ok(ExecutionResult {
        stdout: finalize_capture(&stdout_bytes, stdout_truncated),
        stderr: finalize_capture(&stderr_bytes, stderr_truncated),
        exit_code: status.code(),
    })
}

/// Detach both output pipes into reader tasks feeding one bounded channel.
///
/// The bound paces child reads to however fast the consumer drains the
/// channel; dropping the receiver stops the readers.
///
/// # Errors
///
/// Returns [`RunError::PipeMissing`] when a pipe was not attached; the
/// caller still owns the child and should terminate it.
pub fn spawn_stream_readers(child: &mut Child) -> Result<mpsc::Receiver<ReaderEvent>, RunError> {
    let stdout = child
        .stdout
        .take()
        .ok_or(RunError::PipeMissing { stream: "stdout" })?;
    let stderr = child
        .stderr
        .take()
        .ok_or(RunError::PipeMissing { stream: "stderr" })?;

    let (tx, rx) = mpsc::channel::<ReaderEvent>(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(read_output_stream(
        stdout,
        OutputStreamKind::Stdout,
        tx.clone(),
    ));
    tokio::spawn(read_output_stream(stderr, OutputStreamKind::Stderr, tx));
    Ok(rx)
}

/// Kill the child and reap it. Used when the consumer disappears or a
/// post-start failure aborts the stream.
pub async fn terminate_child(child: &mut Child) {
    tracing::debug!("terminating child process");
    let _ = child.start_kill();
    let _ = child.wait().await;
}

async fn read_output_stream<R>(
    mut reader: R,
    stream: OutputStreamKind,
    tx: mpsc::Sender<ReaderEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = [0u8; READ_BUFFER_BYTES];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => {
                let _ = tx.send(ReaderEvent::Done { stream }).await;
                return;
            }
            Ok(bytes_read) => {
                if tx
                    .send(ReaderEvent::Chunk {
                        stream,
                        data: buffer[..bytes_read].to_vec(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(error) => {
                let _ = tx
                    .send(ReaderEvent::ReadError {
                        stream,
                        message: error.to_string(),
                    })
                    .await;
                return;
            }
        }
    }
}

async fn read_limited<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
) -> Result<(Vec<u8>, bool), std::io::Error> {
    let mut output = Vec::new();
    let mut buffer = [0u8; READ_BUFFER_BYTES];
    let mut truncated = false;

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }

        // Past the cap, keep draining so the child never blocks on a full
        // pipe.
        if truncated {
            continue;
        }

        let remaining = MAX_OUTPUT_BYTES.saturating_sub(output.len());
        if bytes_read <= remaining {
            output.extend_from_slice(&buffer[..bytes_read]);
        } else {
            if remaining > 0 {
                output.extend_from_slice(&buffer[..remaining]);
            }
            truncated = true;
        }
    }

    Ok((output, truncated))
}

fn finalize_capture(bytes: &[u8], truncated: bool) -> String {
    let mut value = String::from_utf8_lossy(bytes).into_owned();
    if truncated {
        value.push_str(TRUNCATION_MARKER);
    }
    value
}

fn build_command_env(request_env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut child_env = BTreeMap::new();

    for key in ["HOME", "LANG"] {
        if let Ok(value) = std::env::var(key) {
            child_env.insert(key.to_string(), value);
        }
    }

    child_env.extend(
        request_env
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );

    // Request values for these never survive; the server's own values win.
    for key in [
        "PATH",
        "http_proxy",
        "https_proxy",
        "no_proxy",
        "HTTP_PROXY",
        "HTTPS_PROXY",
        "NO_PROXY",
    ] {
        child_env.remove(key);
    }

    if let Ok(path) = std::env::var("PATH") {
        child_env.insert("PATH".to_string(), path);
    }

    for (lower, upper) in [
        ("http_proxy", "HTTP_PROXY"),
        ("https_proxy", "HTTPS_PROXY"),
        ("no_proxy", "NO_PROXY"),
    ] {
        if let Ok(value) = std::env::var(lower) {
            child_env.insert(lower.to_string(), value.clone());
            child_env.insert(upper.to_string(), value);
        }
    }

    child_env
}
