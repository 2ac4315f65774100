//! Checkpoint evaluation: required artifacts, required logs, validation command.

use super::command;
use super::ViolationKind;
use crate::manifest::Checkpoint;
use crate::paths;
use std::path::Path;

/// A checkpoint finding before enforcement mode is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub kind: ViolationKind,
    pub message: String,
}

/// Evaluates `checkpoint` against the project tree at `root`.
/// `run_command` is false when the effective mode would discard the result.
pub fn evaluate(root: &Path, checkpoint: &Checkpoint, run_command: bool) -> Vec<Finding> {
    let mut findings = Vec::new();

    for artifact in &checkpoint.required_artifacts {
        let present = paths::resolve_in_project(root, artifact).is_some_and(|path| path.is_file());
        if !present {
            findings.push(Finding {
                kind: ViolationKind::MissingCheckpointArtifact,
                message: format!(
                    "checkpoint {} requires artifact '{}' which does not exist",
                    checkpoint.id, artifact
                ),
            });
        }
    }

    for log in &checkpoint.required_logs {
        let present = paths::resolve_in_project(root, log)
            .and_then(|path| std::fs::metadata(path).ok())
            .is_some_and(|meta| meta.is_file() && meta.len() > 0);
        if !present {
            findings.push(Finding {
                kind: ViolationKind::MissingRequiredLog,
                message: format!(
                    "checkpoint {} requires log '{}' which is missing or empty",
                    checkpoint.id, log
                ),
            });
        }
    }

    if let Some(validation) = checkpoint.validation.as_ref().filter(|_| run_command) {
        let outcome = command::run_validation(root, validation);
        if !outcome.passed() {
            findings.push(Finding {
                kind: ViolationKind::ValidationCommandFailed,
                message: format!(
                    "checkpoint {} validation `{}` {}",
                    checkpoint.id,
                    validation.command.join(" "),
                    outcome.describe()
                ),
            });
        }
    }

    findings
}
