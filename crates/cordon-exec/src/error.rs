//! Error types for the gate and the runner.

use cordon_policy::PolicyError;
use thiserror::Error;

/// Rejection raised before any process exists. Policy denials pass through
/// transparently so callers can distinguish deny-all, a plain deny, and an
/// evaluation failure.
#[derive(Debug, Error)]
pub enum GateError {
    /// The executable token did not resolve to an executable file.
    #[error("failed to resolve executable path for '{command}': {details}")]
    PathResolution {
        /// Command token from the request.
        command: String,
        /// What went wrong during resolution.
        details: String,
    },
    /// The resolved file could not be hashed.
    #[error("failed to compute executable hash for '{command}': {source}")]
    HashComputation {
        /// Command token from the request.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The policy snapshot did not allow the invocation.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Failure while running an approved invocation.
#[derive(Debug, Error)]
pub enum RunError {
    /// The child process could not be started.
    #[error("failed to start subprocess: {source}")]
    Spawn {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Waiting on the child failed.
    #[error("failed to wait for subprocess: {source}")]
    Wait {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A piped output stream was missing on the spawned child.
    #[error("{stream} pipe missing")]
    PipeMissing {
        /// Which stream lacked its pipe.
        stream: &'static str,
    },
    /// Reading a child output stream failed.
    #[error("failed reading {stream}: {source}")]
    StreamRead {
        /// Which stream failed.
        stream: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A capture task panicked or was cancelled.
    #[error("failed joining {stream} reader: {source}")]
    ReaderJoin {
        /// Which stream's reader failed to join.
        stream: &'static str,
        /// Underlying join error.
        #[source]
        source: tokio::task::JoinError,
    },
}
