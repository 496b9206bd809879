//! Error types for policy loading and decisions.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to build a compiled decision set from its source.
#[derive(Debug, Error)]
pub enum PolicyLoadError {
    /// No policy source was configured; the store starts in deny-all.
    #[error("no policy source is configured")]
    NoSource,
    /// Walking the policy directory failed.
    #[error("failed reading policy directory '{path}': {source}")]
    DirectoryRead {
        /// Directory that was being traversed.
        path: PathBuf,
        /// Underlying traversal error.
        #[source]
        source: walkdir::Error,
    },
    /// The source contained no `.rego` modules.
    #[error("no .rego modules found under '{path}'")]
    EmptyBundle {
        /// Directory that turned out to be empty.
        path: PathBuf,
    },
    /// A module file could not be read.
    #[error("failed reading policy module '{path}': {source}")]
    ModuleRead {
        /// Module file that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A module failed to compile; the whole load fails with it.
    #[error("failed compiling policy module '{path}': {details}")]
    ModuleCompile {
        /// Module file that failed to compile.
        path: PathBuf,
        /// Compiler diagnostics.
        details: String,
    },
}

/// Outcome of a denied or failed policy decision.
///
/// A decision failure never changes store state; only load and reload
/// failures degrade the store to deny-all.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The store holds no valid decision set; everything is denied.
    #[error("policy deny-all is active: {reason}")]
    DenyAll {
        /// Reason recorded when the deny-all snapshot was published.
        reason: String,
    },
    /// The decision set evaluated the invocation to `false`.
    #[error("command not allowed: {command}")]
    Denied {
        /// Command token that was denied.
        command: String,
    },
    /// Evaluation itself failed; the single request is denied.
    #[error("policy evaluation failed for '{command}': {details}")]
    Evaluation {
        /// Command token under evaluation.
        command: String,
        /// Evaluator diagnostics.
        details: String,
    },
}

/// Opaque evaluator failure reported through the [`crate::DecisionEvaluator`]
/// seam.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EvalError(pub String);
