//! Policy bundle fixtures and executable lookup for tests.

use std::path::{Path, PathBuf};

/// Router module enforcing the decision contract: delegate to the
/// per-command entry, and gate non-empty environments behind the entry's
/// `allow_env` opt-in.
pub const ROUTER_MODULE: &str = r"package cordon.router

default allow = false

allow if {
  data.cordon.commands[input.command].allow
  env_permitted
}

env_permitted if {
  count(object.keys(input.env)) == 0
}

env_permitted if {
  data.cordon.commands[input.command].allow_env
}
";

/// Render a per-command entry that allows absolute paths for `command`.
/// `command` must be a valid Rego identifier. With `allow_env` the entry
/// opts in to receiving caller-supplied environment variables.
#[must_use]
pub fn command_module(command: &str, allow_env: bool) -> String {
    let opt_in = if allow_env { "\nallow_env := true\n" } else { "" };
    format!(
        "package cordon.commands.{command}\n\n\
         default allow = false\n\n\
         allow if {{\n  startswith(input.path, \"/\")\n}}\n{opt_in}"
    )
}

/// Write a minimal valid bundle (router plus one command entry) into `dir`.
pub fn write_policy_bundle(dir: &Path, command: &str) {
    std::fs::write(dir.join("router.rego"), ROUTER_MODULE).expect("write router module");
    write_command_module(dir, command, false);
}

/// Write a single command entry module into `dir`.
pub fn write_command_module(dir: &Path, command: &str, allow_env: bool) {
    std::fs::write(
        dir.join(format!("{command}.rego")),
        command_module(command, allow_env),
    )
    .expect("write command module");
}

/// Write a module with a syntax error into `dir`, poisoning the bundle.
pub fn write_broken_module(dir: &Path) {
    std::fs::write(
        dir.join("broken.rego"),
        "package cordon.commands.broken\nallow if",
    )
    .expect("write broken module");
}

/// Locate an executable by probing every `PATH` entry.
#[must_use]
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
