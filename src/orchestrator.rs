//! Orchestration facade: the only component that mutates ledger or session
//! state.
//!
//! Each operation runs in a fixed order: gate check, ledger write, then
//! session update. [`SessionState`] is passed in explicitly and saved back
//! by the operations that change it.

use crate::errors::{Result, WorkflowError};
use crate::gate::{BypassRequest, GateEngine, GateResult, GateTarget};
use crate::ledger::{
    AgentContext, AssumptionPayload, BlockerPayload, DecisionPayload, EntryKind, EntryPayload, EntryStatus,
    FeedbackPayload, HandoffPayload, IterationPayload, LedgerEntry, LedgerStore, NewEntry,
    SessionEvent, SessionPayload, Severity, StagePayload,
};
use crate::manifest::{Manifest, ManifestStore};
use crate::project::{GovernanceMode, Project};
use crate::session::SessionState;
use crate::status::{StageListing, StatusReport};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Result of a successful activation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Activation {
    pub entry: LedgerEntry,
    /// Gate outcome, including any non-blocking violations to display.
    pub gate: GateResult,
}

/// Result of a recorded handoff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandoffRecord {
    pub entry: LedgerEntry,
    pub gate: GateResult,
}

/// Result of a recorded stage move.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTransition {
    pub entry: LedgerEntry,
    pub gate: GateResult,
}

/// A handoff request. `from` defaults to the active agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffRequest {
    pub from: Option<String>,
    pub to: String,
    pub artifacts: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Debug)]
pub struct Orchestrator {
    project: Project,
    manifest: Manifest,
    ledger: LedgerStore,
}

impl Orchestrator {
    /// Loads the project at `root` and validates its workflow manifest.
    pub fn open(root: &Path) -> Result<Self> {
        let project = Project::load(root)?;
        let manifest = Self::load_manifest(root, project.workflow())?;
        let ledger = LedgerStore::new(root, project.name());
        tracing::debug!(project = %project.name(), workflow = %manifest.name(), "opened project");
        Ok(Self {
            project,
            manifest,
            ledger,
        })
    }

    /// Creates a project at `root`. The workflow must load and validate
    /// first; without an explicit mode the workflow's enforcement default
    /// applies.
    pub fn init(
        root: &Path,
        name: &str,
        workflow: &str,
        governance: Option<GovernanceMode>,
    ) -> Result<Self> {
        let manifest = Self::load_manifest(root, workflow)?;
        let mode = governance
            .or_else(|| manifest.default_mode())
            .unwrap_or_default();
        let project = Project::init(root, name, workflow, mode)?;
        let ledger = LedgerStore::new(root, project.name());
        Ok(Self {
            project,
            manifest,
            ledger,
        })
    }

    /// Resolves and validates `workflow` as seen from the project at `root`.
    pub fn load_manifest(root: &Path, workflow: &str) -> Result<Manifest> {
        ManifestStore::for_project(root).load(workflow)
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn root(&self) -> &Path {
        self.project.root()
    }

    fn gate(&self) -> GateEngine<'_> {
        GateEngine::new(&self.project, &self.manifest, &self.ledger)
    }

    /// `Idle → Active(agent)`, guarded by the activation gate.
    ///
    /// Pending handoffs targeting `agent` are recorded as accepted on the
    /// Session-start entry.
    pub fn activate(
        &self,
        session: &mut SessionState,
        agent: &str,
        bypass: Option<&BypassRequest>,
    ) -> Result<Activation> {
        if let Some(active) = session.active_agent() {
            return Err(WorkflowError::SessionAlreadyActive {
                agent: active.to_string(),
            });
        }
        self.manifest.require_agent(agent)?;

        let target = GateTarget::Activation {
            agent: agent.to_string(),
        };
        let gate = self.gate().check_activation(agent, bypass)?.into_allowed(&target)?;

        let accepted_handoffs: Vec<String> = self
            .ledger
            .get_pending_handoffs(Some(agent))?
            .into_iter()
            .map(|e| e.id)
            .collect();
        let stage = self.manifest.stage_of(agent).map(str::to_string);
        let entry = self.ledger.write(NewEntry::new(
            agent,
            EntryPayload::Session(SessionPayload {
                event: SessionEvent::Start,
                stage: stage.clone(),
                accepted_handoffs,
                duration_secs: None,
                summary: None,
            }),
        ))?;

        *session = SessionState::Active {
            agent: agent.to_string(),
            stage,
            activated_at: entry.timestamp,
            session_id: entry.id.clone(),
        };
        session.save(self.root())?;
        tracing::info!(agent, session = %entry.id, "agent activated");
        Ok(Activation { entry, gate })
    }

    /// `Active → Idle`. Writes a Session-end entry with the session duration.
    pub fn end(&self, session: &mut SessionState, summary: Option<String>) -> Result<LedgerEntry> {
        let SessionState::Active {
            agent,
            stage,
            activated_at,
            ..
        } = &*session
        else {
            return Err(WorkflowError::NoActiveSession);
        };

        let elapsed = Utc::now().signed_duration_since(*activated_at).num_seconds();
        let entry = self.ledger.write(NewEntry::new(
            agent.clone(),
            EntryPayload::Session(SessionPayload {
                event: SessionEvent::End,
                stage: stage.clone(),
                accepted_handoffs: Vec::new(),
                duration_secs: Some(u64::try_from(elapsed).unwrap_or(0)),
                summary: non_empty(summary),
            }),
        ))?;

        *session = SessionState::Idle;
        session.save(self.root())?;
        tracing::info!(agent = %entry.agent, session = %entry.id, "session ended");
        Ok(entry)
    }

    /// Records a handoff. Referenced artifacts must exist now, in every
    /// governance mode; later deletion is not detected.
    pub fn handoff(&self, session: &SessionState, request: HandoffRequest) -> Result<HandoffRecord> {
        require("handoff", "to", &request.to)?;
        let from = self.acting_agent(session, request.from.as_deref())?;
        let to = request.to.trim().to_string();
        self.manifest.require_agent(&to)?;
        let artifacts: Vec<String> = request
            .artifacts
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();

        let gate = self.gate().check_handoff(&from, &to, &artifacts)?;
        let missing = gate.missing_artifacts();
        if !missing.is_empty() {
            return Err(WorkflowError::MissingArtifact { paths: missing });
        }
        let gate = gate.into_allowed(&GateTarget::Handoff {
            from: from.clone(),
            to: to.clone(),
            artifacts: artifacts.clone(),
        })?;

        let entry = self.ledger.write(NewEntry::new(
            from.clone(),
            EntryPayload::Handoff(HandoffPayload {
                from,
                to,
                artifacts,
                notes: non_empty(request.notes),
            }),
        ))?;
        Ok(HandoffRecord { entry, gate })
    }

    pub fn decision(
        &self,
        session: &SessionState,
        agent: Option<&str>,
        payload: DecisionPayload,
    ) -> Result<LedgerEntry> {
        require("decision", "title", &payload.title)?;
        require("decision", "rationale", &payload.rationale)?;
        self.record(session, agent, EntryPayload::Decision(payload))
    }

    pub fn feedback(
        &self,
        session: &SessionState,
        agent: Option<&str>,
        payload: FeedbackPayload,
    ) -> Result<LedgerEntry> {
        require("feedback", "target", &payload.target)?;
        require("feedback", "summary", &payload.summary)?;
        self.record(session, agent, EntryPayload::Feedback(payload))
    }

    pub fn blocker(
        &self,
        session: &SessionState,
        agent: Option<&str>,
        payload: BlockerPayload,
    ) -> Result<LedgerEntry> {
        require("blocker", "title", &payload.title)?;
        require("blocker", "description", &payload.description)?;
        for blocked in &payload.blocked_agents {
            self.manifest.require_agent(blocked)?;
        }
        self.record(session, agent, EntryPayload::Blocker(payload))
    }

    /// Resolves blocker or feedback `id` by appending a correcting entry of
    /// the same kind. A note replaces the description or summary.
    pub fn resolve(
        &self,
        session: &SessionState,
        agent: Option<&str>,
        id: &str,
        note: Option<String>,
    ) -> Result<LedgerEntry> {
        require("resolve", "id", id)?;
        let id = id.trim();
        let snapshot = self.ledger.snapshot()?;
        let Some(entry) = snapshot
            .entry(id)
            .filter(|e| e.corrects.is_none())
            .filter(|e| matches!(e.kind(), EntryKind::Blocker | EntryKind::Feedback))
        else {
            return Err(resolve_error(format!("no blocker or feedback with id {}", id)));
        };
        if snapshot.effective_status(entry) == Some(EntryStatus::Resolved) {
            return Err(resolve_error(format!("{} {} is already resolved", entry.kind(), entry.id)));
        }

        let note = non_empty(note);
        let payload = match (&entry.payload, note) {
            (EntryPayload::Blocker(b), Some(note)) => EntryPayload::Blocker(BlockerPayload {
                description: note,
                ..b.clone()
            }),
            (EntryPayload::Feedback(f), Some(note)) => EntryPayload::Feedback(FeedbackPayload {
                summary: note,
                ..f.clone()
            }),
            (payload, _) => payload.clone(),
        };
        let agent = self.acting_agent(session, agent)?;
        let resolved = self.ledger.write(
            NewEntry::new(agent, payload).correcting(entry.id.clone(), EntryStatus::Resolved),
        )?;
        tracing::info!(kind = %entry.kind(), original = %entry.id, by = %resolved.id, "entry resolved");
        Ok(resolved)
    }

    /// Moves the project's current stage to `to`, recording a Stage entry.
    /// `force` skips the ordering checks but never admits an undeclared stage.
    pub fn set_stage(
        &self,
        session: &mut SessionState,
        agent: Option<&str>,
        to: &str,
        force: bool,
    ) -> Result<StageTransition> {
        require("stage", "stage", to)?;
        let to = to.trim();
        let agent = self.acting_agent(session, agent)?;
        let gate = self
            .gate()
            .check_stage(to, force)?
            .into_allowed(&GateTarget::Stage { to: to.to_string() })?;

        let from = self.ledger.snapshot()?.current_stage().map(str::to_string);
        let entry = self.ledger.write(NewEntry::new(
            agent,
            EntryPayload::Stage(StagePayload {
                from,
                to: to.to_string(),
                forced: force,
            }),
        ))?;

        if let SessionState::Active { stage, .. } = &mut *session {
            *stage = Some(to.to_string());
            session.save(self.root())?;
        }
        tracing::info!(stage = to, forced = force, id = %entry.id, "stage changed");
        Ok(StageTransition { entry, gate })
    }

    pub fn iteration(
        &self,
        session: &SessionState,
        agent: Option<&str>,
        payload: IterationPayload,
    ) -> Result<LedgerEntry> {
        require("iteration", "trigger", &payload.trigger)?;
        self.record(session, agent, EntryPayload::Iteration(payload))
    }

    pub fn assumption(
        &self,
        session: &SessionState,
        agent: Option<&str>,
        payload: AssumptionPayload,
    ) -> Result<LedgerEntry> {
        require("assumption", "assumption", &payload.assumption)?;
        self.record(session, agent, EntryPayload::Assumption(payload))
    }

    /// Records an entry from a string field map. List fields are
    /// comma-separated; `agent` names the author when no session is active.
    pub fn record_entry(
        &self,
        session: &SessionState,
        kind: EntryKind,
        fields: &BTreeMap<String, String>,
    ) -> Result<LedgerEntry> {
        let fields = Fields::new(kind, fields)?;
        let agent = fields.optional("agent");
        let agent = agent.as_deref();
        match kind {
            EntryKind::Handoff => {
                let request = HandoffRequest {
                    from: fields.optional("from").or_else(|| agent.map(str::to_string)),
                    to: fields.required("to")?,
                    artifacts: fields.list("artifacts"),
                    notes: fields.optional("notes"),
                };
                self.handoff(session, request).map(|record| record.entry)
            }
            EntryKind::Decision => {
                let payload = DecisionPayload {
                    title: fields.required("title")?,
                    rationale: fields.required("rationale")?,
                    impacts: fields.list("impacts"),
                    scope: fields.optional("scope"),
                };
                self.decision(session, agent, payload)
            }
            EntryKind::Feedback => {
                let severity = match fields.optional("severity") {
                    Some(raw) => raw.parse::<Severity>().map_err(|e| WorkflowError::Validation {
                        context: "feedback".to_string(),
                        violations: vec![e],
                    })?,
                    None => Severity::default(),
                };
                let payload = FeedbackPayload {
                    target: fields.required("target")?,
                    severity,
                    summary: fields.required("summary")?,
                };
                self.feedback(session, agent, payload)
            }
            EntryKind::Blocker => {
                let payload = BlockerPayload {
                    title: fields.required("title")?,
                    description: fields.required("description")?,
                    blocked_agents: fields.list("blocked_agents"),
                    required_action: fields.optional("required_action"),
                };
                self.blocker(session, agent, payload)
            }
            EntryKind::Iteration => {
                let payload = IterationPayload {
                    trigger: fields.required("trigger")?,
                    impacted_agents: fields.list("impacted_agents"),
                    version_bump: fields.optional("version_bump"),
                    description: fields.optional("description"),
                };
                self.iteration(session, agent, payload)
            }
            EntryKind::Assumption => {
                let payload = AssumptionPayload {
                    assumption: fields.required("assumption")?,
                    rationale: fields.optional("rationale"),
                    reversal_condition: fields.optional("reversal_condition"),
                };
                self.assumption(session, agent, payload)
            }
            EntryKind::Session | EntryKind::Bypass | EntryKind::Stage => {
                Err(WorkflowError::Validation {
                    context: kind.to_string(),
                    violations: vec![format!(
                        "{} entries are written by their own operations only",
                        kind
                    )],
                })
            }
        }
    }

    /// Evaluates a gate without changing any state.
    pub fn check_gate(&self, target: &GateTarget) -> Result<GateResult> {
        self.gate().check(target, None)
    }

    pub fn query_status(&self, session: &SessionState) -> Result<StatusReport> {
        let snapshot = self.ledger.snapshot()?;
        Ok(StatusReport::build(
            &self.project,
            &self.manifest,
            session,
            &snapshot,
        ))
    }

    pub fn query_pending(&self, target: Option<&str>) -> Result<Vec<LedgerEntry>> {
        self.ledger.get_pending_handoffs(target)
    }

    pub fn query_blockers(&self, agent: Option<&str>) -> Result<Vec<LedgerEntry>> {
        self.ledger.get_active_blockers(agent)
    }

    pub fn query_feedback(&self, target: Option<&str>) -> Result<Vec<LedgerEntry>> {
        self.ledger.get_open_feedback(target)
    }

    /// Handoffs, feedback and blockers waiting on `agent`, plus its history.
    pub fn query_context(&self, agent: &str) -> Result<AgentContext> {
        self.manifest.require_agent(agent)?;
        self.ledger.get_agent_context(agent)
    }

    pub fn query_stages(&self) -> Result<StageListing> {
        let snapshot = self.ledger.snapshot()?;
        Ok(StageListing::build(&self.manifest, snapshot.current_stage()))
    }

    fn record(
        &self,
        session: &SessionState,
        agent: Option<&str>,
        payload: EntryPayload,
    ) -> Result<LedgerEntry> {
        let agent = self.acting_agent(session, agent)?;
        self.ledger.write(NewEntry::new(agent, payload))
    }

    /// The explicit agent when given, else the active one.
    fn acting_agent(&self, session: &SessionState, explicit: Option<&str>) -> Result<String> {
        let agent = match explicit.map(str::trim).filter(|a| !a.is_empty()) {
            Some(agent) => agent,
            None => session.active_agent().ok_or(WorkflowError::NoActiveSession)?,
        };
        self.manifest.require_agent(agent)?;
        Ok(agent.to_string())
    }
}

fn require(context: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(WorkflowError::missing_field(context, field))
    } else {
        Ok(())
    }
}

fn resolve_error(message: String) -> WorkflowError {
    WorkflowError::Validation {
        context: "resolve".to_string(),
        violations: vec![message],
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Field names accepted by `record_entry`, per kind.
fn known_fields(kind: EntryKind) -> &'static [&'static str] {
    match kind {
        EntryKind::Handoff => &["agent", "from", "to", "artifacts", "notes"],
        EntryKind::Decision => &["agent", "title", "rationale", "impacts", "scope"],
        EntryKind::Feedback => &["agent", "target", "severity", "summary"],
        EntryKind::Blocker => &[
            "agent",
            "title",
            "description",
            "blocked_agents",
            "required_action",
        ],
        EntryKind::Iteration => &[
            "agent",
            "trigger",
            "impacted_agents",
            "version_bump",
            "description",
        ],
        EntryKind::Assumption => &["agent", "assumption", "rationale", "reversal_condition"],
        EntryKind::Session | EntryKind::Bypass | EntryKind::Stage => &[],
    }
}

struct Fields<'a> {
    kind: EntryKind,
    map: &'a BTreeMap<String, String>,
}

impl<'a> Fields<'a> {
    fn new(kind: EntryKind, map: &'a BTreeMap<String, String>) -> Result<Self> {
        let known = known_fields(kind);
        let unknown: Vec<String> = map
            .keys()
            .filter(|key| !known.contains(&key.as_str()))
            .map(|key| format!("unknown field '{}' for {} entries", key, kind))
            .collect();
        if !unknown.is_empty() && !known.is_empty() {
            return Err(WorkflowError::Validation {
                context: kind.to_string(),
                violations: unknown,
            });
        }
        Ok(Self { kind, map })
    }

    fn optional(&self, name: &str) -> Option<String> {
        non_empty(self.map.get(name).cloned())
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name)
            .ok_or_else(|| WorkflowError::missing_field(self.kind.as_str(), name))
    }

    fn list(&self, name: &str) -> Vec<String> {
        self.map
            .get(name)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
