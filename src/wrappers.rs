//! Transparent wrapper mode.
//!
//! `wrappers install` writes shim scripts named after the provider CLIs
//! into a directory meant to sit first in PATH. A shim forwards plain
//! invocations to `switchboard launch`, which picks an available provider
//! and execs that provider's real binary, so the native CLI experience is
//! unchanged while cooldown routing still applies. Every shim carries a
//! marker comment and embeds the real binary path it shadows; resolution
//! and removal recognize shims by the marker, never by location.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::provider::Provider;

/// Comment line identifying a shim written by this tool.
pub const WRAPPER_MARKER: &str = "SWITCHBOARD_WRAPPER";

/// Environment flag set before exec. A shim that is still reachable first
/// in PATH sees it and forwards straight to the real binary instead of
/// re-entering `launch`.
pub const INNER_CALL_ENV: &str = "SWITCHBOARD_INNER_PROVIDER_CALL";

/// Names shimmed by `wrappers install`. `claudecode` is an alternate name
/// some installs use for the claude CLI.
const WRAPPER_NAMES: [&str; 3] = ["claude", "claudecode", "codex"];

/// Default shim directory, `~/.switchboard/bin`.
pub fn default_wrapper_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".switchboard").join("bin"))
}

/// Shim script body for one provider name.
///
/// Option invocations (first argument starting with `-`, e.g. `--version`)
/// bypass routing and go straight to the real binary, as does any call made
/// while [`INNER_CALL_ENV`] is set.
fn wrapper_script(preferred: Provider, real_bin: &Path) -> Result<String> {
    let quoted = shlex::try_quote(&real_bin.to_string_lossy())
        .map_err(|_| {
            Error::Wrapper(format!(
                "cannot embed {} in a shim script",
                real_bin.display()
            ))
        })?
        .into_owned();
    let lines = [
        "#!/usr/bin/env sh".to_string(),
        format!("# {}", WRAPPER_MARKER),
        "set -e".to_string(),
        format!("REAL_PROVIDER_BIN={}", quoted),
        format!("if [ \"${{{}:-0}}\" = \"1\" ]; then", INNER_CALL_ENV),
        "  exec \"$REAL_PROVIDER_BIN\" \"$@\"".to_string(),
        "fi".to_string(),
        "if [ \"$#\" -gt 0 ] && [ \"${1#-}\" != \"$1\" ]; then".to_string(),
        "  exec \"$REAL_PROVIDER_BIN\" \"$@\"".to_string(),
        "fi".to_string(),
        format!(
            "exec switchboard launch --prefer-provider {} -- \"$@\"",
            preferred
        ),
    ];
    Ok(lines.join("\n") + "\n")
}

/// Whether `path` is a shim written by this tool.
pub fn is_wrapper(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(text) => text.contains(WRAPPER_MARKER),
        Err(_) => false,
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// `REAL_PROVIDER_BIN` from a shim script, when it names a usable binary.
/// A shim pointing back at itself yields nothing.
fn embedded_real_bin(wrapper: &Path) -> Option<PathBuf> {
    let text = fs::read_to_string(wrapper).ok()?;
    for line in text.lines() {
        let Some(raw) = line.strip_prefix("REAL_PROVIDER_BIN=") else {
            continue;
        };
        let Some(first) = shlex::split(raw.trim()).and_then(|parts| parts.into_iter().next())
        else {
            continue;
        };
        let real = PathBuf::from(first);
        let Ok(resolved) = real.canonicalize() else {
            continue;
        };
        if wrapper.canonicalize().ok().as_ref() == Some(&resolved) {
            continue;
        }
        if is_executable(&resolved) {
            return Some(real);
        }
    }
    None
}

/// Resolves an executable for `name` from PATH, never returning a shim:
/// a shim on the way is replaced by its embedded real binary when that
/// still exists, and skipped otherwise.
pub fn find_real_binary(name: &str) -> Option<PathBuf> {
    find_in_path(name, &std::env::var_os("PATH")?)
}

fn find_in_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    for dir in std::env::split_paths(path_var) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(name);
        if !is_executable(&candidate) {
            continue;
        }
        if is_wrapper(&candidate) {
            if let Some(real) = embedded_real_bin(&candidate) {
                return Some(real);
            }
            continue;
        }
        return Some(candidate);
    }
    None
}

/// Real binary for a provider, honoring the `claudecode` alternate name.
pub fn real_binary_for(provider: Provider) -> Option<PathBuf> {
    match provider {
        Provider::Codex => find_real_binary("codex"),
        Provider::Claude => {
            find_real_binary("claude").or_else(|| find_real_binary("claudecode"))
        }
    }
}

/// Writes the claude/claudecode/codex shims into `dir` and returns the
/// paths written. Fails before touching anything when a real provider
/// binary cannot be located, when a shim would land on top of the real
/// binary it points at, or when `dir` holds a foreign file of the same
/// name and `overwrite` is false.
pub fn install_wrappers(dir: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
    install_wrappers_with(dir, overwrite, find_real_binary)
}

fn install_wrappers_with(
    dir: &Path,
    overwrite: bool,
    find: impl Fn(&str) -> Option<PathBuf>,
) -> Result<Vec<PathBuf>> {
    let real_codex = find("codex").ok_or_else(|| {
        Error::Wrapper("could not locate a real codex binary in PATH".to_string())
    })?;
    let real_claude = find("claude").or_else(|| find("claudecode")).ok_or_else(|| {
        Error::Wrapper("could not locate a real claude or claudecode binary in PATH".to_string())
    })?;

    let targets = [
        ("claude", &real_claude, Provider::Claude),
        ("claudecode", &real_claude, Provider::Claude),
        ("codex", &real_codex, Provider::Codex),
    ];

    for (name, real, _) in &targets {
        if same_path(&dir.join(name), real) {
            return Err(Error::Wrapper(format!(
                "refusing to overwrite the real {} binary in place; use a dedicated shim directory",
                name
            )));
        }
    }
    for (name, _, _) in &targets {
        let path = dir.join(name);
        if path.exists() && !overwrite && !is_wrapper(&path) {
            return Err(Error::Wrapper(format!(
                "refusing to overwrite non-wrapper file {}; pass --overwrite to replace it",
                path.display()
            )));
        }
    }

    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (name, real, preferred) in targets {
        let path = dir.join(name);
        fs::write(&path, wrapper_script(preferred, real)?)?;
        let mut perms = fs::metadata(&path)?.permissions();
        perms.set_mode(perms.mode() | 0o111);
        fs::set_permissions(&path, perms)?;
        written.push(path);
    }
    Ok(written)
}

/// Path equality that tolerates missing files and symlinked directories.
fn same_path(a: &Path, b: &Path) -> bool {
    let left = a.canonicalize().unwrap_or_else(|_| a.to_path_buf());
    let right = b.canonicalize().unwrap_or_else(|_| b.to_path_buf());
    left == right
}

/// What `remove_wrappers` did to each candidate file.
#[derive(Debug, Default)]
pub struct RemovalReport {
    pub removed: Vec<PathBuf>,
    /// Files with a shimmed name but no marker; left untouched.
    pub skipped: Vec<PathBuf>,
}

/// Deletes the shims in `dir`, leaving any unmarked file alone.
pub fn remove_wrappers(dir: &Path) -> Result<RemovalReport> {
    let mut report = RemovalReport::default();
    for name in WRAPPER_NAMES {
        let path = dir.join(name);
        if !path.exists() {
            continue;
        }
        if !is_wrapper(&path) {
            report.skipped.push(path);
            continue;
        }
        fs::remove_file(&path)?;
        report.removed.push(path);
    }
    Ok(report)
}

/// Provider selection for one transparent launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub provider: Provider,
    pub binary: PathBuf,
    /// Set when a preferred provider was passed over for an alternate.
    pub switched_from: Option<Provider>,
}

/// Picks the first candidate whose real binary resolves. Candidates are
/// already filtered for availability and ordered by preference.
pub fn plan_launch(
    candidates: &[Provider],
    preferred: Option<Provider>,
    resolve: impl Fn(Provider) -> Option<PathBuf>,
) -> Option<LaunchPlan> {
    for &candidate in candidates {
        if let Some(binary) = resolve(candidate) {
            return Some(LaunchPlan {
                provider: candidate,
                binary,
                switched_from: preferred.filter(|p| *p != candidate),
            });
        }
    }
    None
}

/// Replaces this process with the provider CLI, with [`INNER_CALL_ENV`]
/// set so any shim still ahead in PATH stays out of the way. Returns only
/// when the exec itself failed.
pub fn exec_provider(binary: &Path, args: &[OsString]) -> Error {
    let error = Command::new(binary)
        .args(args)
        .env(INNER_CALL_ENV, "1")
        .exec();
    Error::Io(error)
}
