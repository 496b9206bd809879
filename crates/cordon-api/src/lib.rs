//! HTTP surface for policy-gated command execution.
//!
//! Routes: `POST /v1/exec` (bounded aggregate capture),
//! `POST /v1/exec/stream` (NDJSON event stream), `GET /health`.
//! Everything that can fail before a stream starts is a plain JSON error
//! response; once the `start` event is on the wire, failures become exactly
//! one terminal `error` event.

pub(crate) mod errors;
pub(crate) mod exec;
pub(crate) mod health;
pub mod router;
pub(crate) mod state;
pub(crate) mod stream;

pub use router::ApiServer;
pub use state::ApiState;
