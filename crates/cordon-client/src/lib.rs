//! `cordon-run`: execute a command on a Cordon server and replay its
//! output locally, byte for byte, with exit-code parity.
//!
//! Every local failure (usage, preflight, transport, protocol) exits with
//! the dedicated local failure code so callers can tell it apart from any
//! remote exit code.

pub mod cli;
pub mod client;

pub use cli::run;
pub use client::{ClientError, LOCAL_FAILURE_EXIT_CODE, run_remote_request};
