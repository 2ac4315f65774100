//! Project configuration: root directory, workflow name, governance mode.
//!
//! Stored once at `.agentic/project.yaml` by [`Project::init`] and re-read by
//! every invocation.

use crate::errors::{Result, WorkflowError};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Enforcement strictness for gate violations.
///
/// Ordered from least to most strict so the weaker of two modes is `min`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum GovernanceMode {
    None,
    Warn,
    #[default]
    Strict,
}

impl GovernanceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceMode::None => "none",
            GovernanceMode::Warn => "warn",
            GovernanceMode::Strict => "strict",
        }
    }
}

impl fmt::Display for GovernanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GovernanceMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(GovernanceMode::None),
            "warn" => Ok(GovernanceMode::Warn),
            "strict" => Ok(GovernanceMode::Strict),
            other => Err(format!(
                "invalid governance mode '{}' (expected strict, warn, or none)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub name: String,
    pub workflow: String,
    pub governance: GovernanceMode,
    pub created_at: DateTime<Utc>,
}

/// A loaded project: its root and immutable config.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    config: ProjectConfig,
}

impl Project {
    /// Writes the project config. Fails if one already exists.
    pub fn init(root: &Path, name: &str, workflow: &str, governance: GovernanceMode) -> Result<Self> {
        let config_path = paths::project_config_path(root);
        if config_path.exists() {
            return Err(WorkflowError::ProjectAlreadyInitialized {
                root: root.to_path_buf(),
            });
        }

        let config = ProjectConfig {
            name: name.trim().to_string(),
            workflow: workflow.trim().to_string(),
            governance,
            created_at: Utc::now(),
        };
        validate_config(&config_path, &config)?;

        let content =
            serde_yaml::to_string(&config).map_err(|e| WorkflowError::parse(&config_path, e))?;
        paths::write_atomic(&config_path, &content)?;
        paths::ensure_dir(&paths::ledger_dir(root))?;

        tracing::info!(
            project = %config.name,
            workflow = %config.workflow,
            governance = %config.governance,
            "initialized project"
        );
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn load(root: &Path) -> Result<Self> {
        let config_path = paths::project_config_path(root);
        let content = match std::fs::read_to_string(&config_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkflowError::ProjectNotFound {
                    root: root.to_path_buf(),
                })
            }
            Err(e) => return Err(WorkflowError::io("read", &config_path, e)),
        };
        let config: ProjectConfig =
            serde_yaml::from_str(&content).map_err(|e| WorkflowError::parse(&config_path, e))?;
        validate_config(&config_path, &config)?;

        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn workflow(&self) -> &str {
        &self.config.workflow
    }

    pub fn governance(&self) -> GovernanceMode {
        self.config.governance
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }
}

fn validate_config(path: &Path, config: &ProjectConfig) -> Result<()> {
    let mut violations = Vec::new();
    if config.name.is_empty() {
        violations.push("project name must not be empty".to_string());
    }
    if config.workflow.is_empty() {
        violations.push("workflow name must not be empty".to_string());
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(WorkflowError::Validation {
            context: format!("project config {}", path.display()),
            violations,
        })
    }
}
