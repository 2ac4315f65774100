//! Centralized on-disk layout for projects and the user-global directory.
//!
//! Project layout (relative to the project root):
//! - `.agentic/project.yaml` - project config (name, workflow, governance mode)
//! - `.agentic/session.json` - persisted session state
//! - `.agentic/workflows/<name>/` - project-local workflow manifests
//! - `agent_log/{exchange,context}_log.{md,jsonl}` - ledger pairs
//! - `agent_log/ledger.lock` - writer lock
//!
//! User-global layout: `$AGENTIC_HOME` or `~/.agentic/`, with `workflows/<name>/`.

use crate::errors::{Result, WorkflowError};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Project metadata directory name.
pub const PROJECT_META_DIR: &str = ".agentic";

/// Ledger directory name.
pub const LEDGER_DIR: &str = "agent_log";

/// Environment variable overriding the user-global directory.
pub const HOME_ENV: &str = "AGENTIC_HOME";

pub fn meta_dir(root: &Path) -> PathBuf {
    root.join(PROJECT_META_DIR)
}

pub fn project_config_path(root: &Path) -> PathBuf {
    meta_dir(root).join("project.yaml")
}

pub fn session_state_path(root: &Path) -> PathBuf {
    meta_dir(root).join("session.json")
}

pub fn local_workflows_dir(root: &Path) -> PathBuf {
    meta_dir(root).join("workflows")
}

pub fn ledger_dir(root: &Path) -> PathBuf {
    root.join(LEDGER_DIR)
}

pub fn ledger_lock_path(root: &Path) -> PathBuf {
    ledger_dir(root).join("ledger.lock")
}

/// Returns the user-global directory without creating it.
///
/// `$AGENTIC_HOME` wins when set and non-empty; otherwise `~/.agentic`.
/// Returns `None` when no home directory can be determined.
pub fn user_home_dir() -> Option<PathBuf> {
    match std::env::var_os(HOME_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::home_dir().map(|home| home.join(PROJECT_META_DIR)),
    }
}

pub fn user_workflows_dir() -> Option<PathBuf> {
    user_home_dir().map(|dir| dir.join("workflows"))
}

/// Creates `dir` (and parents) if missing.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| WorkflowError::io("create directory", dir, e))
}

/// Resolves a project-relative path.
///
/// Returns `None` for absolute paths and for paths whose `..` components
/// climb above `root`.
pub fn resolve_in_project(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1)?,
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(root.join(relative))
}

/// Writes `content` to `path` atomically via a sibling temp file and rename.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);
    fs::write(&temp_path, content).map_err(|e| WorkflowError::io("write", &temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| WorkflowError::io("rename into", path, e))?;
    Ok(())
}
