//! Fail-closed policy store with atomic snapshot swaps and a debounced
//! directory watcher.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::engine::{ALLOW_QUERY, CompiledPolicy, DecisionEvaluator, DecisionInput};
use crate::error::{PolicyError, PolicyLoadError};

/// Reload debounce window; editor write-then-rename bursts collapse into a
/// single reload.
const WATCHER_DEBOUNCE: Duration = Duration::from_millis(250);

/// Where the decision set comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    /// Directory of `.rego` modules; watched for live reload.
    Directory(PathBuf),
    /// Legacy single module; loaded once at startup, never watched.
    File(PathBuf),
}

/// One live snapshot of the store. Requests capture an `Arc` of the current
/// snapshot at gate time and keep it for the whole invocation.
#[derive(Debug)]
pub enum PolicyState {
    /// A compiled decision set is active.
    Valid {
        /// The evaluator answering the allow query.
        evaluator: Box<dyn DecisionEvaluator>,
        /// Number of modules compiled into the set.
        module_count: usize,
        /// When this snapshot was published.
        loaded_at: DateTime<Utc>,
    },
    /// No valid decision set; every invocation is denied.
    DenyAll {
        /// Why the store degraded.
        reason: String,
        /// When the degraded snapshot was published.
        since: DateTime<Utc>,
    },
}

impl PolicyState {
    fn valid(policy: CompiledPolicy) -> Self {
        let module_count = policy.module_count();
        Self::Valid {
            evaluator: Box::new(policy),
            module_count,
            loaded_at: Utc::now(),
        }
    }

    /// Build the degraded snapshot carrying the failure reason.
    #[must_use]
    pub fn deny_all(reason: impl Into<String>) -> Self {
        Self::DenyAll {
            reason: reason.into(),
            since: Utc::now(),
        }
    }

    /// Whether this snapshot denies everything.
    #[must_use]
    pub const fn is_deny_all(&self) -> bool {
        matches!(self, Self::DenyAll { .. })
    }

    /// Decide one invocation against this snapshot. Deterministic: the same
    /// input against the same snapshot always yields the same outcome.
    ///
    /// # Errors
    ///
    /// Returns the applicable [`PolicyError`] when the invocation is not
    /// allowed; evaluation failures deny the single request without
    /// affecting the store.
    pub fn decide(&self, input: &DecisionInput<'_>) -> Result<(), PolicyError> {
        match self {
            Self::DenyAll { reason, .. } => Err(PolicyError::DenyAll {
                reason: reason.clone(),
            }),
            Self::Valid { evaluator, .. } => match evaluator.evaluate(input) {
                Ok(true) => Ok(()),
                Ok(false) => Err(PolicyError::Denied {
                    command: input.command.to_string(),
                }),
                Err(error) => Err(PolicyError::Evaluation {
                    command: input.command.to_string(),
                    details: error.to_string(),
                }),
            },
        }
    }
}

/// The store: readers clone the current snapshot `Arc`, writers publish a
/// whole replacement. A reload completing mid-request never affects a
/// request that already captured its snapshot.
#[derive(Debug)]
pub struct PolicyStore {
    state: RwLock<Arc<PolicyState>>,
    source: Option<PolicySource>,
    watcher_started: AtomicBool,
}

impl PolicyStore {
    /// Build the store from its configured source. A load failure (or a
    /// missing source) starts the store in deny-all rather than aborting.
    #[must_use]
    pub fn from_source(source: Option<PolicySource>) -> Self {
        let state = match load_state(source.as_ref()) {
            Ok(state) => {
                if let PolicyState::Valid { module_count, .. } = &state {
                    tracing::info!(
                        query = ALLOW_QUERY,
                        modules = *module_count,
                        "policy store initialized",
                    );
                }
                state
            }
            Err(error) => {
                tracing::warn!(error = %error, "policy store initialized in deny-all mode");
                PolicyState::deny_all(error.to_string())
            }
        };

        Self {
            state: RwLock::new(Arc::new(state)),
            source,
            watcher_started: AtomicBool::new(false),
        }
    }

    /// Build a store from in-memory modules. Test scaffolding for crates
    /// embedding a store without a filesystem source.
    ///
    /// # Errors
    ///
    /// Fails when any module does not compile.
    pub fn from_modules(modules: &[(&str, &str)]) -> Result<Self, PolicyLoadError> {
        let policy = CompiledPolicy::from_modules(modules)?;
        Ok(Self {
            state: RwLock::new(Arc::new(PolicyState::valid(policy))),
            source: None,
            watcher_started: AtomicBool::new(false),
        })
    }

    /// Capture the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PolicyState> {
        match self.state.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Decide one invocation against a freshly captured snapshot.
    ///
    /// # Errors
    ///
    /// See [`PolicyState::decide`].
    pub fn query(&self, input: &DecisionInput<'_>) -> Result<(), PolicyError> {
        self.snapshot().decide(input)
    }

    /// Whether the current snapshot denies everything.
    #[must_use]
    pub fn is_deny_all(&self) -> bool {
        self.snapshot().is_deny_all()
    }

    /// Reload from the configured source, swapping in either the new valid
    /// set or a deny-all snapshot carrying the failure reason.
    pub fn reload(&self) {
        match load_state(self.source.as_ref()) {
            Ok(state) => {
                if let PolicyState::Valid { module_count, .. } = &state {
                    tracing::info!(modules = *module_count, "policy reload succeeded");
                }
                self.swap(state);
            }
            Err(error) => {
                tracing::error!(error = %error, "policy reload failed; deny-all activated");
                self.swap(PolicyState::deny_all(error.to_string()));
            }
        }
    }

    fn swap(&self, next: PolicyState) {
        let next = Arc::new(next);
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Start the filesystem watcher for a directory source. No-op for file
    /// sources, a missing source, or a second call. Must run inside a tokio
    /// runtime; the notify callback lives on its own thread and pings a
    /// debounce task that collapses event bursts into one reload.
    pub fn start_watcher(self: &Arc<Self>) {
        let Some(PolicySource::Directory(policy_dir)) = self.source.clone() else {
            return;
        };

        if self
            .watcher_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let (reload_tx, mut reload_rx) = tokio::sync::mpsc::unbounded_channel();
        let store_for_reload = Arc::clone(self);
        tokio::spawn(async move {
            while reload_rx.recv().await.is_some() {
                tokio::time::sleep(WATCHER_DEBOUNCE).await;
                while reload_rx.try_recv().is_ok() {}
                store_for_reload.reload();
            }
        });

        let store_for_watcher = Arc::clone(self);
        std::thread::spawn(move || {
            let (event_tx, event_rx) =
                std::sync::mpsc::channel::<Result<notify::Event, notify::Error>>();
            let mut watcher = match RecommendedWatcher::new(event_tx, notify::Config::default()) {
                Ok(watcher) => watcher,
                Err(error) => {
                    tracing::error!(
                        error = %error,
                        policy_dir = %policy_dir.display(),
                        "failed to initialize policy watcher; deny-all activated",
                    );
                    store_for_watcher.swap(PolicyState::deny_all(format!(
                        "policy watcher unavailable: {error}"
                    )));
                    return;
                }
            };

            if let Err(error) = watcher.watch(&policy_dir, RecursiveMode::Recursive) {
                tracing::error!(
                    error = %error,
                    policy_dir = %policy_dir.display(),
                    "failed to watch policy directory; deny-all activated",
                );
                store_for_watcher.swap(PolicyState::deny_all(format!(
                    "policy watcher unavailable: {error}"
                )));
                return;
            }

            tracing::info!(policy_dir = %policy_dir.display(), "policy watcher started");

            while let Ok(event_result) = event_rx.recv() {
                match event_result {
                    Ok(event) => {
                        tracing::debug!(
                            kind = ?event.kind,
                            paths = ?event.paths,
                            "policy change detected",
                        );
                        let _ = reload_tx.send(());
                    }
                    Err(error) => {
                        tracing::error!(error = %error, "policy watcher event error");
                        let _ = reload_tx.send(());
                    }
                }
            }

            tracing::warn!("policy watcher channel closed");
        });
    }
}

fn load_state(source: Option<&PolicySource>) -> Result<PolicyState, PolicyLoadError> {
    let compiled = match source.ok_or(PolicyLoadError::NoSource)? {
        PolicySource::Directory(dir) => CompiledPolicy::from_directory(dir),
        PolicySource::File(path) => CompiledPolicy::from_file(path),
    }?;
    Ok(PolicyState::valid(compiled))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::time::Instant;

    use super::*;
    use cordon_test_support::{ROUTER_MODULE, write_broken_module, write_policy_bundle};
    use tempfile::tempdir;

    const HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

    fn echo_input<'a>(args: &'a [String], env: &'a BTreeMap<String, String>) -> DecisionInput<'a> {
        DecisionInput {
            command: "echo",
            path: "/usr/bin/echo",
            hash: HASH,
            args,
            env,
        }
    }

    fn directory_store(dir: &Path) -> PolicyStore {
        PolicyStore::from_source(Some(PolicySource::Directory(dir.to_path_buf())))
    }

    #[test]
    fn valid_directory_allows_configured_command() {
        let dir = tempdir().expect("temp policy dir");
        write_policy_bundle(dir.path(), "echo");

        let store = directory_store(dir.path());
        assert!(!store.is_deny_all());

        let env = BTreeMap::new();
        assert!(store.query(&echo_input(&[], &env)).is_ok());

        let denied = store
            .query(&DecisionInput {
                command: "curl",
                path: "/usr/bin/curl",
                hash: HASH,
                args: &[],
                env: &env,
            })
            .expect_err("unlisted command must be denied");
        assert!(matches!(denied, PolicyError::Denied { .. }));
    }

    #[test]
    fn broken_startup_bundle_is_deny_all() {
        let dir = tempdir().expect("temp policy dir");
        write_broken_module(dir.path());

        let store = directory_store(dir.path());
        assert!(store.is_deny_all());

        let env = BTreeMap::new();
        let err = store
            .query(&echo_input(&[], &env))
            .expect_err("deny-all expected");
        assert!(matches!(err, PolicyError::DenyAll { .. }));
    }

    #[test]
    fn missing_source_is_deny_all() {
        let store = PolicyStore::from_source(None);
        assert!(store.is_deny_all());
    }

    #[test]
    fn nonexistent_directory_is_deny_all() {
        let dir = tempdir().expect("temp policy dir");
        let missing = dir.path().join("nope");
        let store = directory_store(&missing);
        assert!(store.is_deny_all());
    }

    #[test]
    fn reload_degrades_on_syntax_error_and_recovers() {
        let dir = tempdir().expect("temp policy dir");
        write_policy_bundle(dir.path(), "echo");

        let store = directory_store(dir.path());
        let env = BTreeMap::new();
        assert!(store.query(&echo_input(&[], &env)).is_ok());

        write_broken_module(dir.path());
        store.reload();
        assert!(store.is_deny_all());
        assert!(matches!(
            store
                .query(&echo_input(&[], &env))
                .expect_err("deny-all expected"),
            PolicyError::DenyAll { .. }
        ));

        std::fs::remove_file(dir.path().join("broken.rego")).expect("remove broken module");
        store.reload();
        assert!(!store.is_deny_all());
        assert!(store.query(&echo_input(&[], &env)).is_ok());
    }

    #[test]
    fn captured_snapshot_is_unaffected_by_reload() {
        let dir = tempdir().expect("temp policy dir");
        write_policy_bundle(dir.path(), "echo");

        let store = directory_store(dir.path());
        let snapshot = store.snapshot();

        write_broken_module(dir.path());
        store.reload();
        assert!(store.is_deny_all());

        let env = BTreeMap::new();
        assert!(snapshot.decide(&echo_input(&[], &env)).is_ok());
    }

    #[test]
    fn decisions_are_deterministic_per_snapshot() {
        let dir = tempdir().expect("temp policy dir");
        write_policy_bundle(dir.path(), "echo");

        let store = directory_store(dir.path());
        let snapshot = store.snapshot();
        let env = BTreeMap::new();
        let args = vec!["hello".to_string()];
        let first = snapshot.decide(&echo_input(&args, &env)).is_ok();
        for _ in 0..10 {
            assert_eq!(snapshot.decide(&echo_input(&args, &env)).is_ok(), first);
        }
    }

    #[test]
    fn file_source_loads_single_module() {
        let dir = tempdir().expect("temp policy dir");
        let path = dir.path().join("router.rego");
        std::fs::write(&path, ROUTER_MODULE).expect("write router module");

        let store = PolicyStore::from_source(Some(PolicySource::File(path)));
        assert!(!store.is_deny_all());

        // No command entries exist, so everything evaluates to false.
        let env = BTreeMap::new();
        assert!(matches!(
            store
                .query(&echo_input(&[], &env))
                .expect_err("no entries configured"),
            PolicyError::Denied { .. }
        ));
    }

    async fn wait_for(store: &Arc<PolicyStore>, deny_all: bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if store.is_deny_all() == deny_all {
                return;
            }
            assert!(Instant::now() < deadline, "store never reached target state");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn watcher_reloads_on_change_and_self_heals() {
        let dir = tempdir().expect("temp policy dir");
        write_policy_bundle(dir.path(), "echo");

        let store = Arc::new(directory_store(dir.path()));
        store.start_watcher();
        assert!(!store.is_deny_all());

        write_broken_module(dir.path());
        wait_for(&store, true).await;

        std::fs::remove_file(dir.path().join("broken.rego")).expect("remove broken module");
        wait_for(&store, false).await;

        let env = BTreeMap::new();
        assert!(store.query(&echo_input(&[], &env)).is_ok());
    }
}
