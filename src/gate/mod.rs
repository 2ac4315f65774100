//! Governance gates: precondition checks before an agent is activated or a
//! handoff is recorded.
//!
//! Each violation is evaluated under an effective enforcement mode:
//! - `strict`: recorded as blocking; the transition is refused.
//! - `warn`: recorded as non-blocking and logged.
//! - `none`: logged at info level and dropped.
//!
//! Checkpoint violations use the less strict of the project mode and the
//! checkpoint's own gating. Unknown agents, missing handoff artifacts and
//! artifacts outside the project are blocking in every mode.

pub mod checkpoint;
pub mod command;
pub mod stage;

use crate::errors::{Result, WorkflowError};
use crate::ledger::{BypassPayload, EntryPayload, LedgerSnapshot, LedgerStore, NewEntry};
use crate::manifest::{AgentType, Checkpoint, Manifest};
use crate::paths;
use crate::project::{GovernanceMode, Project};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MissingPredecessorHandoff,
    MissingCheckpointArtifact,
    MissingRequiredLog,
    UnresolvedBlocker,
    IllegalHandoffTarget,
    UnknownAgent,
    ValidationCommandFailed,
    MissingHandoffArtifact,
    ArtifactOutsideProject,
    BypassDenied,
    UnknownStage,
    StageRegression,
    StageSkipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    pub blocking: bool,
    /// The artifact path, blocker id, or checkpoint id the violation is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateResult {
    pub allowed: bool,
    pub mode: GovernanceMode,
    pub violations: Vec<Violation>,
    /// Id of the Bypass entry when a bypass was honored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass: Option<String>,
}

impl GateResult {
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }

    /// Paths of handoff artifacts that did not exist at check time.
    pub fn missing_artifacts(&self) -> Vec<String> {
        self.violations
            .iter()
            .filter(|v| v.kind == ViolationKind::MissingHandoffArtifact)
            .filter_map(|v| v.subject.clone())
            .collect()
    }

    /// Converts a refusal into [`WorkflowError::GateViolation`].
    pub fn into_allowed(self, target: &GateTarget) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(WorkflowError::GateViolation {
                target: target.to_string(),
                violations: self.messages(),
            })
        }
    }
}

/// An explicit request to bypass a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BypassRequest {
    pub role: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateTarget {
    Activation {
        agent: String,
    },
    Handoff {
        from: String,
        to: String,
        artifacts: Vec<String>,
    },
    Stage {
        to: String,
    },
}

impl fmt::Display for GateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateTarget::Activation { agent } => write!(f, "activation of {}", agent),
            GateTarget::Handoff { from, to, .. } => write!(f, "handoff {}→{}", from, to),
            GateTarget::Stage { to } => write!(f, "stage transition to {}", to),
        }
    }
}

/// Applies enforcement modes as violations are found.
struct Collector {
    violations: Vec<Violation>,
}

impl Collector {
    fn new() -> Self {
        Self {
            violations: Vec::new(),
        }
    }

    fn push(
        &mut self,
        mode: GovernanceMode,
        kind: ViolationKind,
        message: String,
        subject: Option<String>,
    ) {
        match mode {
            GovernanceMode::None => {
                tracing::info!(?kind, "gate violation ignored (mode none): {}", message);
            }
            GovernanceMode::Warn => {
                tracing::warn!(?kind, "{}", message);
                self.violations.push(Violation {
                    kind,
                    message,
                    blocking: false,
                    subject,
                });
            }
            GovernanceMode::Strict => self.violations.push(Violation {
                kind,
                message,
                blocking: true,
                subject,
            }),
        }
    }

    fn finish(self, mode: GovernanceMode) -> GateResult {
        GateResult {
            allowed: !self.violations.iter().any(|v| v.blocking),
            mode,
            violations: self.violations,
            bypass: None,
        }
    }
}

pub struct GateEngine<'a> {
    project: &'a Project,
    manifest: &'a Manifest,
    ledger: &'a LedgerStore,
}

impl<'a> GateEngine<'a> {
    pub fn new(project: &'a Project, manifest: &'a Manifest, ledger: &'a LedgerStore) -> Self {
        Self {
            project,
            manifest,
            ledger,
        }
    }

    pub fn mode(&self) -> GovernanceMode {
        self.project.governance()
    }

    pub fn check(&self, target: &GateTarget, bypass: Option<&BypassRequest>) -> Result<GateResult> {
        match target {
            GateTarget::Activation { agent } => self.check_activation(agent, bypass),
            GateTarget::Handoff {
                from,
                to,
                artifacts,
            } => self.check_handoff(from, to, artifacts),
            GateTarget::Stage { to } => self.check_stage(to, false),
        }
    }

    /// Checks whether `agent` may be activated now.
    ///
    /// With a `bypass` request, an honored bypass writes a Bypass entry and
    /// allows the activation with the violations kept as non-blocking.
    pub fn check_activation(
        &self,
        agent: &str,
        bypass: Option<&BypassRequest>,
    ) -> Result<GateResult> {
        let agent_def = self.manifest.require_agent(agent)?;
        let mode = self.mode();
        let snapshot = self.ledger.snapshot()?;
        let mut collector = Collector::new();

        if agent_def.agent_type == AgentType::Core {
            if let Some(predecessor) = self.manifest.predecessor_of(agent) {
                if !has_handoff(&snapshot, predecessor, agent) {
                    collector.push(
                        mode,
                        ViolationKind::MissingPredecessorHandoff,
                        format!("missing predecessor handoff {}→{}", predecessor, agent),
                        Some(predecessor.to_string()),
                    );
                }
            }
        }

        let nearest = self.manifest.nearest_checkpoint(agent);
        if let Some(cp) = nearest {
            let effective = mode.min(cp.gating);
            let run_command = effective != GovernanceMode::None;
            for finding in checkpoint::evaluate(self.project.root(), cp, run_command) {
                collector.push(effective, finding.kind, finding.message, Some(cp.id.clone()));
            }
        }

        for blocker in snapshot.active_blockers(Some(agent)) {
            let title = blocker.as_blocker().map(|b| b.title.as_str()).unwrap_or("");
            collector.push(
                mode,
                ViolationKind::UnresolvedBlocker,
                format!("unresolved blocker {} ({}) blocks {}", blocker.id, title, agent),
                Some(blocker.id.clone()),
            );
        }

        let mut result = collector.finish(mode);
        if let Some(request) = bypass {
            self.apply_bypass(agent, nearest, request, &mut result)?;
        }
        tracing::debug!(agent, allowed = result.allowed, violations = result.violations.len(), "activation gate");
        Ok(result)
    }

    /// Checks whether `from` may hand off to `to` with `artifacts`.
    /// Artifact existence is re-checked on disk on every call.
    pub fn check_handoff(&self, from: &str, to: &str, artifacts: &[String]) -> Result<GateResult> {
        let mode = self.mode();
        let mut collector = Collector::new();

        let from_known = self.manifest.agent(from).is_some();
        let to_known = self.manifest.agent(to).is_some();
        for (id, known) in [(from, from_known), (to, to_known)] {
            if !known {
                collector.violations.push(Violation {
                    kind: ViolationKind::UnknownAgent,
                    message: format!("unknown agent {} in workflow '{}'", id, self.manifest.name()),
                    blocking: true,
                    subject: Some(id.to_string()),
                });
            }
        }
        if from_known && to_known && !self.manifest.is_legal_handoff(from, to) {
            let legal = self.manifest.legal_targets(from);
            let legal = if legal.is_empty() {
                "none".to_string()
            } else {
                legal.join(", ")
            };
            collector.push(
                mode,
                ViolationKind::IllegalHandoffTarget,
                format!("{} may not hand off to {} (legal targets: {})", from, to, legal),
                Some(to.to_string()),
            );
        }

        for artifact in artifacts {
            let (kind, message) = match paths::resolve_in_project(self.project.root(), artifact) {
                None => (
                    ViolationKind::ArtifactOutsideProject,
                    format!("handoff artifact '{}' is outside the project", artifact),
                ),
                Some(path) if !path.exists() => (
                    ViolationKind::MissingHandoffArtifact,
                    format!("handoff artifact '{}' does not exist", artifact),
                ),
                Some(_) => continue,
            };
            collector.violations.push(Violation {
                kind,
                message,
                blocking: true,
                subject: Some(artifact.clone()),
            });
        }

        let result = collector.finish(mode);
        tracing::debug!(from, to, allowed = result.allowed, "handoff gate");
        Ok(result)
    }

    /// Checks moving the project's current stage to `to`.
    ///
    /// Backward and skipping moves are judged under the project mode unless
    /// `force` is set. An undeclared stage is refused in every mode.
    pub fn check_stage(&self, to: &str, force: bool) -> Result<GateResult> {
        let mode = self.mode();
        let stages = &self.manifest.pipeline().stages;
        let mut collector = Collector::new();

        if !stages.iter().any(|s| s.id == to) {
            let declared: Vec<&str> = stages.iter().map(|s| s.id.as_str()).collect();
            let declared = if declared.is_empty() {
                "none".to_string()
            } else {
                declared.join(", ")
            };
            collector.violations.push(Violation {
                kind: ViolationKind::UnknownStage,
                message: format!("unknown stage {} (declared: {})", to, declared),
                blocking: true,
                subject: Some(to.to_string()),
            });
            return Ok(collector.finish(mode));
        }

        let snapshot = self.ledger.snapshot()?;
        let current = snapshot.current_stage();
        if force {
            tracing::info!(from = ?current, to, "stage ordering checks skipped");
        } else {
            for finding in stage::evaluate(stages, current, to) {
                collector.push(mode, finding.kind, finding.message, Some(to.to_string()));
            }
        }
        let result = collector.finish(mode);
        tracing::debug!(from = ?current, to, allowed = result.allowed, "stage gate");
        Ok(result)
    }

    fn apply_bypass(
        &self,
        agent: &str,
        checkpoint: Option<&Checkpoint>,
        request: &BypassRequest,
        result: &mut GateResult,
    ) -> Result<()> {
        if result.violations.is_empty() {
            tracing::debug!(agent, "bypass requested but nothing to bypass");
            return Ok(());
        }
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());

        let permitted = match checkpoint {
            None => Err(format!("no checkpoint with a bypass policy applies to {}", agent)),
            Some(c) => match &c.bypass {
                None => Err(format!("checkpoint {} has no bypass policy", c.id)),
                Some(policy) if !policy.allowed_roles.iter().any(|r| r == &request.role) => {
                    Err(format!(
                        "role '{}' may not bypass checkpoint {} (allowed: {})",
                        request.role,
                        c.id,
                        policy.allowed_roles.join(", ")
                    ))
                }
                Some(policy) if policy.require_reason && reason.is_none() => {
                    Err(format!("bypass of checkpoint {} requires a reason", c.id))
                }
                Some(_) => Ok(c),
            },
        };

        match permitted {
            Err(message) => {
                let mut collector = Collector {
                    violations: std::mem::take(&mut result.violations),
                };
                collector.push(result.mode, ViolationKind::BypassDenied, message, None);
                *result = collector.finish(result.mode);
            }
            Ok(checkpoint) => {
                let entry = self.ledger.write(NewEntry::new(
                    agent,
                    EntryPayload::Bypass(BypassPayload {
                        target: agent.to_string(),
                        checkpoint: checkpoint.id.clone(),
                        role: request.role.clone(),
                        reason: reason.map(str::to_string),
                    }),
                ))?;
                tracing::info!(agent, checkpoint = %checkpoint.id, role = %request.role, id = %entry.id, "gate bypass honored");
                for violation in &mut result.violations {
                    violation.blocking = false;
                }
                result.allowed = true;
                result.bypass = Some(entry.id);
            }
        }
        Ok(())
    }
}

fn has_handoff(snapshot: &LedgerSnapshot, from: &str, to: &str) -> bool {
    snapshot
        .handoffs_to(to)
        .any(|e| e.corrects.is_none() && e.as_handoff().is_some_and(|h| h.from == from))
}

#[cfg(test)]
#[path = "tests/gate_tests.rs"]
mod tests;
