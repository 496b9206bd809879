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

//! Policy store and watcher for the Cordon execution gate.
//!
//! Layout: `engine.rs` (Rego compilation and the [`DecisionEvaluator`] seam),
//! `store.rs` (the atomically swapped [`PolicyState`] plus the debounced
//! filesystem watcher), `error.rs` (load and decision errors).
//!
//! The store is fail-closed: any load or reload failure swaps in a
//! [`PolicyState::DenyAll`] snapshot carrying the failure reason, and a later
//! successful reload recovers without a restart.

pub mod engine;
pub mod error;
pub mod store;

pub use engine::{ALLOW_QUERY, CompiledPolicy, DecisionEvaluator, DecisionInput};
pub use error::{EvalError, PolicyError, PolicyLoadError};
pub use store::{PolicySource, PolicyState, PolicyStore};
