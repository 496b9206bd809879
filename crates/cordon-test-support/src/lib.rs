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

//! Shared test fixtures used across the workspace test suites.
//! Layout: fixtures.rs (policy bundles and executable lookup).

pub mod fixtures;

pub use fixtures::{
    ROUTER_MODULE, command_module, find_executable, write_broken_module, write_command_module,
    write_policy_bundle,
};
