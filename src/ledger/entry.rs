//! Ledger entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Handoff,
    Decision,
    Feedback,
    Blocker,
    Iteration,
    Assumption,
    Session,
    Bypass,
    Stage,
}

impl EntryKind {
    pub const ALL: [EntryKind; 9] = [
        EntryKind::Handoff,
        EntryKind::Decision,
        EntryKind::Feedback,
        EntryKind::Blocker,
        EntryKind::Iteration,
        EntryKind::Assumption,
        EntryKind::Session,
        EntryKind::Bypass,
        EntryKind::Stage,
    ];

    /// Id prefix, e.g. `HO` in `HO-001`.
    pub fn prefix(&self) -> &'static str {
        match self {
            EntryKind::Handoff => "HO",
            EntryKind::Decision => "DEC",
            EntryKind::Feedback => "FB",
            EntryKind::Blocker => "BLK",
            EntryKind::Iteration => "ITER",
            EntryKind::Assumption => "ASSUMP",
            EntryKind::Session => "SESS",
            EntryKind::Bypass => "BYP",
            EntryKind::Stage => "STG",
        }
    }

    pub fn category(&self) -> LogCategory {
        match self {
            EntryKind::Handoff | EntryKind::Feedback | EntryKind::Iteration => LogCategory::Exchange,
            EntryKind::Decision
            | EntryKind::Assumption
            | EntryKind::Blocker
            | EntryKind::Session
            | EntryKind::Bypass
            | EntryKind::Stage => LogCategory::Context,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Handoff => "handoff",
            EntryKind::Decision => "decision",
            EntryKind::Feedback => "feedback",
            EntryKind::Blocker => "blocker",
            EntryKind::Iteration => "iteration",
            EntryKind::Assumption => "assumption",
            EntryKind::Session => "session",
            EntryKind::Bypass => "bypass",
            EntryKind::Stage => "stage",
        }
    }

    /// Label used in human-log entry markers.
    pub fn marker_label(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }

    /// Kinds whose entries start out pending.
    pub fn default_status(&self) -> Option<EntryStatus> {
        match self {
            EntryKind::Handoff | EntryKind::Feedback | EntryKind::Blocker => {
                Some(EntryStatus::Pending)
            }
            _ => None,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        EntryKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown entry kind '{}'", s.trim()))
    }
}

/// The two human-log / sidecar pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    Exchange,
    Context,
}

impl LogCategory {
    pub const ALL: [LogCategory; 2] = [LogCategory::Exchange, LogCategory::Context];

    pub fn file_stem(&self) -> &'static str {
        match self {
            LogCategory::Exchange => "exchange_log",
            LogCategory::Context => "context_log",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            LogCategory::Exchange => "Exchange Log",
            LogCategory::Context => "Context Log",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Resolved,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Resolved => "resolved",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        })
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!(
                "invalid severity '{}' (expected low, medium, high, or critical)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffPayload {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPayload {
    pub title: String,
    pub rationale: String,
    #[serde(default)]
    pub impacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    pub target: String,
    #[serde(default)]
    pub severity: Severity,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockerPayload {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub blocked_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationPayload {
    pub trigger: String,
    #[serde(default)]
    pub impacted_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_bump: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssumptionPayload {
    pub assumption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub event: SessionEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Pending handoffs this activation accepted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepted_handoffs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// An honored gate bypass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassPayload {
    pub target: String,
    pub checkpoint: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A move of the project's current pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    /// Ordering checks were skipped on request.
    #[serde(default)]
    pub forced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryPayload {
    Handoff(HandoffPayload),
    Decision(DecisionPayload),
    Feedback(FeedbackPayload),
    Blocker(BlockerPayload),
    Iteration(IterationPayload),
    Assumption(AssumptionPayload),
    Session(SessionPayload),
    Bypass(BypassPayload),
    Stage(StagePayload),
}

impl EntryPayload {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryPayload::Handoff(_) => EntryKind::Handoff,
            EntryPayload::Decision(_) => EntryKind::Decision,
            EntryPayload::Feedback(_) => EntryKind::Feedback,
            EntryPayload::Blocker(_) => EntryKind::Blocker,
            EntryPayload::Iteration(_) => EntryKind::Iteration,
            EntryPayload::Assumption(_) => EntryKind::Assumption,
            EntryPayload::Session(_) => EntryKind::Session,
            EntryPayload::Bypass(_) => EntryKind::Bypass,
            EntryPayload::Stage(_) => EntryKind::Stage,
        }
    }
}

/// One immutable ledger record, as stored in the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub project: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EntryStatus>,
    /// Id of an earlier entry of the same kind this one corrects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrects: Option<String>,
    #[serde(flatten)]
    pub payload: EntryPayload,
}

impl LedgerEntry {
    pub fn kind(&self) -> EntryKind {
        self.payload.kind()
    }

    pub fn as_handoff(&self) -> Option<&HandoffPayload> {
        match &self.payload {
            EntryPayload::Handoff(handoff) => Some(handoff),
            _ => None,
        }
    }

    pub fn as_blocker(&self) -> Option<&BlockerPayload> {
        match &self.payload {
            EntryPayload::Blocker(blocker) => Some(blocker),
            _ => None,
        }
    }

    pub fn as_feedback(&self) -> Option<&FeedbackPayload> {
        match &self.payload {
            EntryPayload::Feedback(feedback) => Some(feedback),
            _ => None,
        }
    }

    pub fn as_stage(&self) -> Option<&StagePayload> {
        match &self.payload {
            EntryPayload::Stage(stage) => Some(stage),
            _ => None,
        }
    }

    pub fn as_session(&self) -> Option<&SessionPayload> {
        match &self.payload {
            EntryPayload::Session(session) => Some(session),
            _ => None,
        }
    }

    /// One-line description for listings.
    pub fn summary(&self) -> String {
        match &self.payload {
            EntryPayload::Handoff(h) => format!("{} → {}", h.from, h.to),
            EntryPayload::Decision(d) => d.title.clone(),
            EntryPayload::Feedback(f) => format!("[{}] {}: {}", f.severity, f.target, f.summary),
            EntryPayload::Blocker(b) => b.title.clone(),
            EntryPayload::Iteration(i) => i.trigger.clone(),
            EntryPayload::Assumption(a) => a.assumption.clone(),
            EntryPayload::Session(s) => match s.event {
                SessionEvent::Start => format!("{} activated", self.agent),
                SessionEvent::End => format!("{} ended", self.agent),
            },
            EntryPayload::Bypass(b) => format!("{} bypassed {} for {}", b.role, b.checkpoint, b.target),
            EntryPayload::Stage(s) => format!(
                "stage {} → {}{}",
                s.from.as_deref().unwrap_or("(none)"),
                s.to,
                if s.forced { " (forced)" } else { "" }
            ),
        }
    }
}

/// An entry to be written; the store assigns id, timestamp and project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub agent: String,
    pub payload: EntryPayload,
    pub status: Option<EntryStatus>,
    pub corrects: Option<String>,
}

impl NewEntry {
    pub fn new(agent: impl Into<String>, payload: EntryPayload) -> Self {
        let status = payload.kind().default_status();
        Self {
            agent: agent.into(),
            payload,
            status,
            corrects: None,
        }
    }

    /// Marks this entry as a correction of `id` carrying `status`.
    pub fn correcting(mut self, id: impl Into<String>, status: EntryStatus) -> Self {
        self.corrects = Some(id.into());
        self.status = Some(status);
        self
    }
}
