//! Command-line surface for `cordon-run`.
//!
//! Usage errors, preflight failures, and transport problems all exit with
//! [`LOCAL_FAILURE_EXIT_CODE`] so scripts can distinguish them from the
//! remote command's own exit code.

use std::io::Write;

use clap::Parser;
use cordon_api_models::ExecRequest;
use url::Url;

use crate::client::{
    ClientError, LOCAL_FAILURE_EXIT_CODE, collect_forwarded_env, run_remote_request,
};

/// Run a command on a Cordon server and replay its output locally.
#[derive(Debug, Parser)]
#[command(
    name = "cordon-run",
    about = "Execute a command on a Cordon server, replaying output byte for byte",
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Full http(s) URL of the streaming execution endpoint.
    #[arg(long, env = "CORDON_RUN_SERVER", value_parser = parse_server_url)]
    pub server: String,

    /// Local environment variables to forward, comma-separated, repeatable.
    #[arg(long = "keep-env", value_delimiter = ',', value_name = "NAMES")]
    pub keep_env: Vec<String>,

    /// Remote executable and its arguments, after `--`.
    #[arg(last = true, required = true, value_name = "EXECUTABLE [ARGS]...")]
    pub command: Vec<String>,
}

/// Parse arguments, run the remote request, and return the process exit
/// code: the remote code on success, [`LOCAL_FAILURE_EXIT_CODE`] for any
/// local failure.
pub async fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            // Usage errors are local failures; --help/--version are not.
            let code = if error.use_stderr() {
                LOCAL_FAILURE_EXIT_CODE
            } else {
                0
            };
            let _ = error.print();
            return code;
        }
    };

    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    let mut stdout = stdout.lock();
    let mut stderr = stderr.lock();

    match execute(&cli, &mut stdout, &mut stderr).await {
        Ok(code) => code,
        Err(error) => {
            let _ = writeln!(stderr, "error: {error}");
            LOCAL_FAILURE_EXIT_CODE
        }
    }
}

async fn execute<WOut: Write, WErr: Write>(
    cli: &Cli,
    stdout: &mut WOut,
    stderr: &mut WErr,
) -> Result<i32, ClientError> {
    let keep_env = normalize_keep_env(&cli.keep_env);
    let env = collect_forwarded_env(&keep_env, |name| std::env::var(name).ok())?;

    let cwd = std::env::current_dir().map_err(|source| ClientError::CurrentDir { source })?;

    let Some((executable, args)) = cli.command.split_first() else {
        return Err(ClientError::MissingExecutable);
    };

    let payload = ExecRequest {
        executable: executable.clone(),
        args: args.to_vec(),
        cwd: Some(cwd.to_string_lossy().into_owned()),
        env: Some(env),
    };

    run_remote_request(&cli.server, payload, stdout, stderr).await
}

/// Trim entries, drop empties, and deduplicate while preserving first-seen
/// order.
fn normalize_keep_env(raw: &[String]) -> Vec<String> {
    let mut names = Vec::new();
    for entry in raw {
        let trimmed = entry.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !names.iter().any(|existing: &String| existing == trimmed) {
            names.push(trimmed.to_string());
        }
    }
    names
}

/// Require a full absolute http(s) URL; reject `host:port` shorthand.
fn parse_server_url(value: &str) -> Result<String, String> {
    let url = Url::parse(value).map_err(|error| format!("invalid server URL: {error}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!(
            "server URL must use http or https, got `{}`",
            url.scheme()
        ));
    }
    if !url.has_host() {
        return Err("server URL must include a host".to_string());
    }
    Ok(value.to_string())
}
