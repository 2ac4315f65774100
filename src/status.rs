//! Project status summary and stage listing, assembled from one ledger
//! snapshot.

use crate::ledger::{EntryKind, LedgerEntry, LedgerSnapshot};
use crate::manifest::Manifest;
use crate::project::{GovernanceMode, Project};
use crate::session::SessionState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Number of entries listed under recent activity.
pub const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub project: String,
    pub workflow: String,
    pub mode: GovernanceMode,
    pub session: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub counts: BTreeMap<EntryKind, usize>,
    pub open_feedback: usize,
    pub pending_handoffs: Vec<LedgerEntry>,
    pub active_blockers: Vec<LedgerEntry>,
    pub recent: Vec<LedgerEntry>,
}

impl StatusReport {
    pub fn build(
        project: &Project,
        manifest: &Manifest,
        session: &SessionState,
        snapshot: &LedgerSnapshot,
    ) -> Self {
        Self {
            project: project.name().to_string(),
            workflow: manifest.name().to_string(),
            mode: project.governance(),
            session: session.clone(),
            stage: session
                .stage()
                .or_else(|| snapshot.current_stage())
                .map(str::to_string),
            counts: snapshot.counts(),
            open_feedback: snapshot.open_feedback(None).len(),
            pending_handoffs: snapshot.pending_handoffs(None).into_iter().cloned().collect(),
            active_blockers: snapshot.active_blockers(None).into_iter().cloned().collect(),
            recent: snapshot.recent(RECENT_LIMIT).into_iter().cloned().collect(),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Project:  {}", self.project)?;
        writeln!(f, "Workflow: {}", self.workflow)?;
        writeln!(f, "Mode:     {}", self.mode)?;
        match self.session.active_agent() {
            Some(agent) => writeln!(
                f,
                "Session:  {} active (stage: {})",
                agent,
                self.stage.as_deref().unwrap_or("-")
            )?,
            None => writeln!(f, "Session:  idle")?,
        }
        if let (None, Some(stage)) = (self.session.active_agent(), &self.stage) {
            writeln!(f, "Stage:    {}", stage)?;
        }

        if !self.counts.is_empty() {
            let counts: Vec<String> = self
                .counts
                .iter()
                .map(|(kind, n)| format!("{} {}", kind, n))
                .collect();
            writeln!(f, "Entries:  {}", counts.join(", "))?;
        }
        writeln!(f, "Feedback: {} open", self.open_feedback)?;

        write_section(f, "Pending handoffs", &self.pending_handoffs)?;
        write_section(f, "Active blockers", &self.active_blockers)?;
        write_section(f, "Recent activity", &self.recent)
    }
}

/// One declared stage with its position relative to the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub agents: Vec<String>,
    pub current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageListing {
    pub workflow: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    pub stages: Vec<StageView>,
}

impl StageListing {
    pub fn build(manifest: &Manifest, current: Option<&str>) -> Self {
        Self {
            workflow: manifest.name().to_string(),
            current: current.map(str::to_string),
            stages: manifest
                .pipeline()
                .stages
                .iter()
                .map(|stage| StageView {
                    id: stage.id.clone(),
                    name: stage.name.clone(),
                    agents: stage.agents.clone(),
                    current: current == Some(stage.id.as_str()),
                })
                .collect(),
        }
    }
}

impl fmt::Display for StageListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stages.is_empty() {
            return writeln!(f, "Workflow {} declares no stages", self.workflow);
        }
        for stage in &self.stages {
            writeln!(
                f,
                "{} {:<14} {:<20} {}",
                if stage.current { "*" } else { " " },
                stage.id,
                stage.name.as_deref().unwrap_or(""),
                stage.agents.join(", ")
            )?;
        }
        Ok(())
    }
}

fn write_section(f: &mut fmt::Formatter<'_>, title: &str, entries: &[LedgerEntry]) -> fmt::Result {
    writeln!(f)?;
    if entries.is_empty() {
        return writeln!(f, "{}: none", title);
    }
    writeln!(f, "{}:", title)?;
    for entry in entries {
        writeln!(
            f,
            "  {:<10} {}  {:<6} {}",
            entry.id,
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.agent,
            entry.summary()
        )?;
    }
    Ok(())
}
