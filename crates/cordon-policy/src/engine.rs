//! Rego compilation and evaluation behind the [`DecisionEvaluator`] seam.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use regorus::Engine as RegoEngine;
use walkdir::WalkDir;

use crate::error::{EvalError, PolicyLoadError};

/// Query evaluated for every invocation. The router module delegates to the
/// per-command entries under `data.cordon.commands`.
pub const ALLOW_QUERY: &str = "data.cordon.router.allow";

/// Input document built fresh for each invocation and handed to the
/// evaluator; never cached between requests.
#[derive(Debug)]
pub struct DecisionInput<'a> {
    /// Command token exactly as the caller sent it.
    pub command: &'a str,
    /// Resolved absolute path of the executable.
    pub path: &'a str,
    /// Lowercase hex SHA-256 of the resolved file's bytes.
    pub hash: &'a str,
    /// Arguments, verbatim.
    pub args: &'a [String],
    /// Requested environment entries, sorted by key.
    pub env: &'a BTreeMap<String, String>,
}

impl DecisionInput<'_> {
    fn to_document(&self) -> serde_json::Value {
        serde_json::json!({
            "command": self.command,
            "path": self.path,
            "hash": self.hash,
            "args": self.args,
            "env": self.env,
        })
    }
}

/// Boolean decision seam so the interpreter stays swappable.
pub trait DecisionEvaluator: fmt::Debug + Send + Sync {
    /// Evaluate the allow query against one invocation.
    ///
    /// # Errors
    ///
    /// Returns an [`EvalError`] when the query itself fails; the caller
    /// denies that single request without touching store state.
    fn evaluate(&self, input: &DecisionInput<'_>) -> Result<bool, EvalError>;
}

/// One immutable compiled decision set: every module of a source compiled
/// together as a unit.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    engine: RegoEngine,
    module_count: usize,
}

impl CompiledPolicy {
    /// Compile every `.rego` file under `dir` (recursively, sorted by path
    /// for determinism) as one unit.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be traversed, contains no `.rego`
    /// files, or any single module fails to read or compile.
    pub fn from_directory(dir: &Path) -> Result<Self, PolicyLoadError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir) {
            let entry = entry.map_err(|source| PolicyLoadError::DirectoryRead {
                path: dir.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("rego") {
                files.push(path);
            }
        }

        if files.is_empty() {
            return Err(PolicyLoadError::EmptyBundle {
                path: dir.to_path_buf(),
            });
        }

        files.sort();
        Self::compile(&files)
    }

    /// Compile a single module file (legacy single-file source, no reload).
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not compile.
    pub fn from_file(path: &Path) -> Result<Self, PolicyLoadError> {
        Self::compile(std::slice::from_ref(&path.to_path_buf()))
    }

    /// Compile in-memory `(name, source)` modules. Test scaffolding for the
    /// crates that embed a store without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Fails when any module does not compile.
    pub fn from_modules(modules: &[(&str, &str)]) -> Result<Self, PolicyLoadError> {
        let mut engine = RegoEngine::new();
        for (name, source) in modules {
            engine
                .add_policy((*name).to_string(), (*source).to_string())
                .map_err(|error| PolicyLoadError::ModuleCompile {
                    path: PathBuf::from(name),
                    details: error.to_string(),
                })?;
        }

        Ok(Self {
            engine,
            module_count: modules.len(),
        })
    }

    fn compile(files: &[PathBuf]) -> Result<Self, PolicyLoadError> {
        let mut engine = RegoEngine::new();
        for file in files {
            let source =
                std::fs::read_to_string(file).map_err(|source| PolicyLoadError::ModuleRead {
                    path: file.clone(),
                    source,
                })?;

            engine
                .add_policy(file.to_string_lossy().into_owned(), source)
                .map_err(|error| PolicyLoadError::ModuleCompile {
                    path: file.clone(),
                    details: error.to_string(),
                })?;
        }

        Ok(Self {
            engine,
            module_count: files.len(),
        })
    }

    /// Number of modules compiled into this set.
    #[must_use]
    pub const fn module_count(&self) -> usize {
        self.module_count
    }
}

impl DecisionEvaluator for CompiledPolicy {
    fn evaluate(&self, input: &DecisionInput<'_>) -> Result<bool, EvalError> {
        // set_input mutates the engine, so each evaluation works on a clone
        // and the compiled set itself stays immutable.
        let mut engine = self.engine.clone();
        engine.set_input(regorus::Value::from(input.to_document()));
        engine
            .eval_bool_query(ALLOW_QUERY.to_string(), false)
            .map_err(|error| EvalError(error.to_string()))
    }
}
