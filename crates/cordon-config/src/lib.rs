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

//! Environment-driven configuration for the `cordond` server.
//!
//! A directory source enables live policy reload and takes precedence over
//! the legacy single-file source. A missing source is not an error: the
//! server starts anyway, with the store in deny-all.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use cordon_policy::PolicySource;
use thiserror::Error;

/// Directory of `.rego` modules, watched for live reload.
pub const ENV_POLICY_DIR: &str = "CORDON_POLICY_DIR";
/// Legacy single policy module, loaded once at startup.
pub const ENV_POLICY_FILE: &str = "CORDON_POLICY_FILE";
/// Socket address the server binds to.
pub const ENV_BIND_ADDR: &str = "CORDON_BIND_ADDR";

const DEFAULT_BIND_PORT: u16 = 8000;

/// Configuration errors raised at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The bind address did not parse as `host:port`.
    #[error("invalid bind address '{value}': {source}")]
    InvalidBindAddr {
        /// Offending value from the environment.
        value: String,
        /// Underlying parse error.
        #[source]
        source: std::net::AddrParseError,
    },
    /// The server's current directory could not be resolved.
    #[error("failed resolving current directory: {source}")]
    CurrentDir {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Where the decision set comes from, if configured at all.
    pub policy_source: Option<PolicySource>,
    /// Working directory for children that do not request one.
    pub default_cwd: PathBuf,
}

impl AppConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when the bind address is malformed or the current directory
    /// cannot be resolved.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let policy_source = lookup(ENV_POLICY_DIR)
            .map(|dir| PolicySource::Directory(PathBuf::from(dir)))
            .or_else(|| lookup(ENV_POLICY_FILE).map(|file| PolicySource::File(PathBuf::from(file))));

        let bind_addr = match lookup(ENV_BIND_ADDR) {
            Some(value) => value
                .parse()
                .map_err(|source| ConfigError::InvalidBindAddr { value, source })?,
            None => SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_BIND_PORT)),
        };

        let default_cwd =
            std::env::current_dir().map_err(|source| ConfigError::CurrentDir { source })?;

        Ok(Self {
            bind_addr,
            policy_source,
            default_cwd,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(entries: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).expect("config");
        assert_eq!(config.bind_addr.port(), 8000);
        assert!(config.bind_addr.ip().is_loopback());
        assert!(config.policy_source.is_none());
    }

    #[test]
    fn directory_takes_precedence_over_file() {
        let config = config_from(&[
            (ENV_POLICY_DIR, "/etc/cordon/policies"),
            (ENV_POLICY_FILE, "/etc/cordon/policy.rego"),
        ])
        .expect("config");
        assert_eq!(
            config.policy_source,
            Some(PolicySource::Directory(PathBuf::from(
                "/etc/cordon/policies"
            )))
        );
    }

    #[test]
    fn file_source_used_when_no_directory_is_set() {
        let config =
            config_from(&[(ENV_POLICY_FILE, "/etc/cordon/policy.rego")]).expect("config");
        assert_eq!(
            config.policy_source,
            Some(PolicySource::File(PathBuf::from("/etc/cordon/policy.rego")))
        );
    }

    #[test]
    fn malformed_bind_address_is_rejected() {
        let err = config_from(&[(ENV_BIND_ADDR, "not-an-addr")]).expect_err("must fail");
        assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));
    }

    #[test]
    fn explicit_bind_address_is_honored() {
        let config = config_from(&[(ENV_BIND_ADDR, "0.0.0.0:9100")]).expect("config");
        assert_eq!(config.bind_addr.port(), 9100);
    }
}
