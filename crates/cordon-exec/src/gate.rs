//! The execution gate: resolve, hash, then ask the policy snapshot.
//!
//! `authorize` is the only way to obtain an [`Invocation`], so a denied
//! request can never reach the runner.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use cordon_policy::{DecisionInput, PolicyState};
use sha2::{Digest, Sha256};

use crate::error::GateError;

/// A validated request, owned by exactly one handler task.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Command token exactly as the caller sent it.
    pub command: String,
    /// Resolved absolute path of the executable.
    pub path: String,
    /// Lowercase hex SHA-256 of the resolved file.
    pub hash: String,
    /// Arguments, verbatim.
    pub args: Vec<String>,
    /// Policy-approved environment entries from the request.
    pub env: BTreeMap<String, String>,
    /// Requested working directory, if any.
    pub cwd: Option<PathBuf>,
}

/// Run the full gate for one request against a captured policy snapshot.
///
/// Resolution and hashing read the filesystem; nothing else has side
/// effects, and no process is spawned here.
///
/// # Errors
///
/// Returns a [`GateError`] when the token does not resolve to an executable
/// file, the file cannot be hashed, or the policy snapshot denies the
/// invocation.
pub fn authorize(
    snapshot: &PolicyState,
    command: &str,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
) -> Result<Invocation, GateError> {
    let path = resolve_executable_path(command).map_err(|details| GateError::PathResolution {
        command: command.to_string(),
        details,
    })?;

    let hash = sha256_hex(Path::new(&path)).map_err(|source| GateError::HashComputation {
        command: command.to_string(),
        source,
    })?;

    snapshot.decide(&DecisionInput {
        command,
        path: &path,
        hash: &hash,
        args: &args,
        env: &env,
    })?;

    Ok(Invocation {
        command: command.to_string(),
        path,
        hash,
        args,
        env,
        cwd,
    })
}

/// Resolve a command token to the absolute path that will be spawned.
///
/// Tokens containing `/` resolve directly (relative ones against the
/// server's cwd); bare tokens are searched on `PATH`. Candidates must be
/// regular files carrying an execute bit on unix.
///
/// # Errors
///
/// Returns a description of the failure when no executable file matches.
pub fn resolve_executable_path(command: &str) -> Result<String, String> {
    if command.contains('/') {
        let path = Path::new(command);
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|error| format!("failed resolving cwd: {error}"))?
                .join(path)
        };
        if !candidate.is_file() {
            return Err(format!("'{}' is not a file", candidate.display()));
        }
        if !has_execute_bit(&candidate)? {
            return Err(format!("'{}' is not executable", candidate.display()));
        }
        return Ok(candidate.to_string_lossy().into_owned());
    }

    let path = std::env::var_os("PATH").ok_or_else(|| "PATH is not set".to_string())?;
    for directory in std::env::split_paths(&path) {
        let candidate = directory.join(command);
        if !candidate.is_file() {
            continue;
        }
        if !has_execute_bit(&candidate)? {
            continue;
        }
        return Ok(candidate.to_string_lossy().into_owned());
    }

    Err(format!("'{command}' was not found on PATH"))
}

#[cfg(unix)]
fn has_execute_bit(candidate: &Path) -> Result<bool, String> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = candidate.metadata().map_err(|error| {
        format!(
            "failed reading metadata for '{}': {error}",
            candidate.display()
        )
    })?;
    Ok(metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn has_execute_bit(_candidate: &Path) -> Result<bool, String> {
    Ok(true)
}

/// SHA-256 of a file's bytes as lowercase hex, read in 8 KiB chunks.
///
/// # Errors
///
/// Propagates the underlying I/O error when the file cannot be read.
pub fn sha256_hex(path: &Path) -> Result<String, std::io::Error> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
