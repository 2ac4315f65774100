//! Error types for the workflow ledger and governance gates.
//!
//! Every fallible library operation returns [`WorkflowError`]; nothing
//! untyped crosses the library boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// No resolution strategy located the named workflow.
    #[error("workflow '{workflow}' not found (searched: {})", .searched.join(", "))]
    ManifestNotFound {
        workflow: String,
        searched: Vec<String>,
    },

    /// Schema, cross-reference, or field validation failed. Carries every violation found.
    #[error("{context}: {} violation(s):\n{}", .violations.len(), bullet_list(.violations))]
    Validation {
        context: String,
        violations: Vec<String>,
    },

    /// The human log and its sidecar disagree.
    #[error("ledger desync in {log}: {detail}")]
    LedgerDesync { log: String, detail: String },

    /// Strict-mode gate refusal.
    #[error("gate refused {target}:\n{}", bullet_list(.violations))]
    GateViolation {
        target: String,
        violations: Vec<String>,
    },

    #[error("no active session")]
    NoActiveSession,

    #[error("agent {agent} is already active; end the session first")]
    SessionAlreadyActive { agent: String },

    /// A handoff referenced files that do not exist.
    #[error("handoff references missing artifact(s): {}", .paths.join(", "))]
    MissingArtifact { paths: Vec<String> },

    /// An id appeared twice. Fatal: the single-writer id scan was violated.
    #[error("duplicate ledger id {id} in {log}")]
    DuplicateId { id: String, log: String },

    #[error("unknown agent '{agent}' in workflow '{workflow}'")]
    UnknownAgent { agent: String, workflow: String },

    #[error("no project initialized at {}", .root.display())]
    ProjectNotFound { root: PathBuf },

    #[error("project already initialized at {}", .root.display())]
    ProjectAlreadyInitialized { root: PathBuf },

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

impl WorkflowError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Single-field validation failure, as raised by the facade's field checks.
    pub(crate) fn missing_field(context: &str, field: &str) -> Self {
        Self::Validation {
            context: context.to_string(),
            violations: vec![format!("missing required field '{}'", field)],
        }
    }

    /// Violations carried by this error, if any.
    pub fn violations(&self) -> &[String] {
        match self {
            Self::Validation { violations, .. } | Self::GateViolation { violations, .. } => {
                violations
            }
            _ => &[],
        }
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("  - {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}
