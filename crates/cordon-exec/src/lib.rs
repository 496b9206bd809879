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

//! Execution gate and process runner.
//!
//! Layout: `gate.rs` (path resolution, content hashing, the policy decision;
//! a denied invocation never reaches a spawn), `runner.rs` (no-shell spawn
//! with a rebuilt environment, capped aggregate capture, unbounded streaming
//! readers), `error.rs`.

pub mod error;
pub mod gate;
pub mod runner;

pub use error::{GateError, RunError};
pub use gate::{Invocation, authorize, resolve_executable_path, sha256_hex};
pub use runner::{
    ExecutionResult, MAX_OUTPUT_BYTES, OutputStreamKind, ReaderEvent, TRUNCATION_MARKER,
    run_aggregate, spawn_invocation, spawn_stream_readers, terminate_child,
};
