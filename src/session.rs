//! Persisted session state: which agent, if any, is currently active.
//!
//! Loaded at the start of each invocation and written back atomically by
//! every operation that changes it. Stored at `.agentic/session.json`.

use crate::errors::{Result, WorkflowError};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Active {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        activated_at: DateTime<Utc>,
        /// Id of the Session-start entry.
        session_id: String,
    },
}

impl SessionState {
    /// Reads the state for the project at `root`. A missing file is `Idle`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::session_state_path(root);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| WorkflowError::parse(&path, e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::Idle),
            Err(e) => Err(WorkflowError::io("read", &path, e)),
        }
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::session_state_path(root);
        let content =
            serde_json::to_string_pretty(self).map_err(|e| WorkflowError::parse(&path, e))?;
        paths::write_atomic(&path, &content)?;
        tracing::debug!(path = %path.display(), "saved session state");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn active_agent(&self) -> Option<&str> {
        match self {
            Self::Active { agent, .. } => Some(agent),
            Self::Idle => None,
        }
    }

    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Active { stage, .. } => stage.as_deref(),
            Self::Idle => None,
        }
    }
}
