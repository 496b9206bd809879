//! Boot sequence for `cordond`.
//!
//! Policy load failures never abort startup: the store degrades to deny-all
//! and the watcher (when a directory source is configured) recovers it once
//! the bundle compiles again. Bind failures abort with a structured error.

use std::sync::Arc;

use cordon_api::ApiServer;
use cordon_config::AppConfig;
use cordon_policy::PolicyStore;
use cordon_telemetry::LoggingConfig;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Entry point for the `cordond` boot sequence.
///
/// # Errors
///
/// Returns an error when logging cannot be installed, the environment
/// configuration is invalid, or the listener cannot bind.
pub async fn run_app() -> AppResult<()> {
    let logging = LoggingConfig::default();
    cordon_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", &err))?;

    let config = AppConfig::from_env().map_err(|err| AppError::config("config.from_env", err))?;
    run_app_with(config).await
}

/// Boot sequence that relies entirely on an injected configuration to
/// simplify testing.
pub(crate) async fn run_app_with(config: AppConfig) -> AppResult<()> {
    info!(bind_addr = %config.bind_addr, "cordond starting");

    let store = Arc::new(PolicyStore::from_source(config.policy_source));
    if store.is_deny_all() {
        warn!("policy store is in deny-all posture; every invocation will be refused");
    }
    store.start_watcher();

    ApiServer::new(store, config.default_cwd)
        .serve(config.bind_addr)
        .await
        .map_err(|err| AppError::api_server("api.serve", &err))
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};
    use std::path::PathBuf;
    use std::time::Duration;

    use cordon_config::AppConfig;
    use cordon_policy::PolicySource;
    use cordon_test_support::fixtures::write_policy_bundle;

    use super::run_app_with;

    async fn wait_for_health(base_url: &str) -> serde_json::Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(response) = reqwest::get(format!("{base_url}/health")).await
                && response.status().is_success()
                && let Ok(body) = response.json::<serde_json::Value>().await
            {
                return body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "server did not come up in time"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn free_local_addr() -> SocketAddr {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("bind probe");
        listener.local_addr().expect("probe addr")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn boots_and_serves_health_with_a_valid_bundle() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_policy_bundle(dir.path(), "echo");

        let addr = free_local_addr();
        let config = AppConfig {
            bind_addr: addr,
            policy_source: Some(PolicySource::Directory(dir.path().to_path_buf())),
            default_cwd: PathBuf::from("."),
        };
        let server = tokio::spawn(run_app_with(config));

        let body = wait_for_health(&format!("http://{addr}")).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["policy"], "valid");

        server.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn boots_in_deny_all_when_no_policy_is_configured() {
        let addr = free_local_addr();
        let config = AppConfig {
            bind_addr: addr,
            policy_source: None,
            default_cwd: PathBuf::from("."),
        };
        let server = tokio::spawn(run_app_with(config));

        let body = wait_for_health(&format!("http://{addr}")).await;
        assert_eq!(body["policy"], "deny_all");

        server.abort();
    }
}
