//! Shell resolution.
//!
//! Picks the first usable shell: `$SHELL` when it points at an executable,
//! otherwise the first executable entry of the configured fallback list.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors resolving a shell.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShellError {
    /// None of the candidates is an executable regular file.
    #[error("no usable shell found (checked: {})", display_paths(.checked))]
    NotFound {
        /// Candidates that were checked, in order.
        checked: Vec<PathBuf>,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Returns the shell named by `env_shell` if usable, else the first usable
/// fallback.
///
/// An empty `env_shell` is treated as unset.
pub fn resolve_shell(
    env_shell: Option<&str>,
    fallbacks: &[PathBuf],
) -> Result<PathBuf, ShellError> {
    let mut checked = Vec::with_capacity(fallbacks.len() + 1);

    let env_candidate = env_shell.filter(|s| !s.is_empty()).map(PathBuf::from);
    for candidate in env_candidate.into_iter().chain(fallbacks.iter().cloned()) {
        if is_executable(&candidate) {
            tracing::debug!(shell = %candidate.display(), "Resolved shell");
            return Ok(candidate);
        }
        tracing::trace!(shell = %candidate.display(), "Shell candidate not usable");
        checked.push(candidate);
    }

    Err(ShellError::NotFound { checked })
}

/// Resolves using the process's `$SHELL`.
pub fn resolve_from_env(fallbacks: &[PathBuf]) -> Result<PathBuf, ShellError> {
    let env_shell = std::env::var("SHELL").ok();
    resolve_shell(env_shell.as_deref(), fallbacks)
}

/// Whether `path` is a regular file with an execute bit that also
/// resolves as an executable.
pub fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
        return false;
    }
    which::which(path).is_ok()
}
