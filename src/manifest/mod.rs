//! Workflow manifests: agents, artifacts, instructions and the pipeline.
//!
//! A manifest is parsed from four documents, validated in three passes
//! (structural, cross-reference, dependency cycles) and then exposed as a
//! read-only typed view. Any violation fails the load with the full list.

pub mod resolve;
pub mod schema;
mod validate;

pub use resolve::{BundledSource, DirectorySource, ManifestSource, WorkflowDocuments};
pub use schema::{
    Agent, AgentType, Artifact, ArtifactCategory, BypassPolicy, Checkpoint, ConsumeRef,
    Instruction, IterationCycle, PipelineDefinition, Stage, ValidationCommand,
};

use crate::errors::{Result, WorkflowError};
use crate::project::GovernanceMode;
use resolve::{Document, DocumentFormat};
use schema::{ManifestParts, RawDocuments};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Loads workflows through an ordered list of resolution strategies.
pub struct ManifestStore {
    sources: Vec<Box<dyn ManifestSource>>,
}

impl ManifestStore {
    /// Project-local, user-global, then bundled.
    pub fn for_project(root: &Path) -> Self {
        Self {
            sources: resolve::default_sources(root),
        }
    }

    pub fn with_sources(sources: Vec<Box<dyn ManifestSource>>) -> Self {
        Self { sources }
    }

    pub fn load(&self, workflow: &str) -> Result<Manifest> {
        let documents = resolve::resolve(&self.sources, workflow)?;
        Manifest::from_documents(workflow, documents)
    }
}

/// A validated workflow manifest. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Manifest {
    name: String,
    version: Option<String>,
    description: Option<String>,
    origin: String,
    agents: Vec<Agent>,
    artifacts: Vec<Artifact>,
    instructions: Vec<Instruction>,
    pipeline: PipelineDefinition,
    warnings: Vec<String>,
}

impl Manifest {
    /// Parses and validates a workflow's documents.
    pub fn from_documents(workflow: &str, documents: WorkflowDocuments) -> Result<Self> {
        let mut violations = Vec::new();
        let raw = RawDocuments {
            agents: parse_document(&documents.agents, &mut violations),
            artifacts: parse_document(&documents.artifacts, &mut violations),
            instructions: parse_document(&documents.instructions, &mut violations),
            workflow: parse_document(&documents.workflow, &mut violations),
        };

        let parts = schema::build_parts(workflow, raw, &mut violations);
        let warnings = validate::check_references(&parts, &mut violations);
        validate::check_cycles(&parts, &mut violations);

        if !violations.is_empty() {
            return Err(WorkflowError::Validation {
                context: format!("workflow '{}' ({})", workflow, documents.origin),
                violations,
            });
        }
        for warning in &warnings {
            tracing::warn!(workflow, "{}", warning);
        }

        let ManifestParts {
            name,
            version,
            description,
            agents,
            artifacts,
            instructions,
            pipeline,
        } = parts;
        tracing::debug!(
            workflow = %name,
            agents = agents.len(),
            artifacts = artifacts.len(),
            "loaded manifest"
        );
        Ok(Self {
            name,
            version,
            description,
            origin: documents.origin,
            agents,
            artifacts,
            instructions,
            pipeline,
            warnings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Where the documents were resolved from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Non-fatal findings from validation.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn agents_of(&self) -> &[Agent] {
        &self.agents
    }

    pub fn artifacts_of(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn checkpoints_of(&self) -> &[Checkpoint] {
        &self.pipeline.checkpoints
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn pipeline(&self) -> &PipelineDefinition {
        &self.pipeline
    }

    /// Workflow-level enforcement default from `config.enforcement.mode`.
    pub fn default_mode(&self) -> Option<GovernanceMode> {
        self.pipeline.default_mode
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn require_agent(&self, id: &str) -> Result<&Agent> {
        self.agent(id).ok_or_else(|| WorkflowError::UnknownAgent {
            agent: id.to_string(),
            workflow: self.name.clone(),
        })
    }

    pub fn instruction_for(&self, id: &str) -> Option<&Instruction> {
        self.instructions.iter().find(|i| i.id == id)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.pipeline.order.iter().position(|a| a == id)
    }

    /// The agent immediately before `id` in pipeline order.
    pub fn predecessor_of(&self, id: &str) -> Option<&str> {
        match self.position_of(id)? {
            0 => None,
            pos => Some(self.pipeline.order[pos - 1].as_str()),
        }
    }

    pub fn stage_of(&self, id: &str) -> Option<&str> {
        self.pipeline
            .stages
            .iter()
            .find(|stage| stage.agents.iter().any(|a| a == id))
            .map(|stage| stage.id.as_str())
    }

    /// The checkpoint bound to the latest agent at or before `id` in
    /// pipeline order. Agents outside the order only see their own checkpoints.
    pub fn nearest_checkpoint(&self, id: &str) -> Option<&Checkpoint> {
        let Some(limit) = self.position_of(id) else {
            return self.pipeline.checkpoints.iter().find(|c| c.agent == id);
        };
        let mut nearest: Option<(usize, &Checkpoint)> = None;
        for checkpoint in &self.pipeline.checkpoints {
            let Some(pos) = self.position_of(&checkpoint.agent) else {
                continue;
            };
            if pos > limit {
                continue;
            }
            if nearest.is_none_or(|(best, _)| pos > best) {
                nearest = Some((pos, checkpoint));
            }
        }
        nearest.map(|(_, checkpoint)| checkpoint)
    }

    pub fn share_cycle(&self, a: &str, b: &str) -> bool {
        self.pipeline.cycles.iter().any(|cycle| {
            cycle.agents.iter().any(|m| m == a) && cycle.agents.iter().any(|m| m == b)
        })
    }

    /// Agents `from` may hand off to, in declaration order.
    pub fn legal_targets(&self, from: &str) -> Vec<&str> {
        let Some(agent) = self.agent(from) else {
            return Vec::new();
        };
        if agent.agent_type == AgentType::Orchestrator {
            return self
                .agents
                .iter()
                .filter(|a| a.id != from)
                .map(|a| a.id.as_str())
                .collect();
        }
        let mut targets: Vec<&str> = if agent.handoff_next.is_empty() {
            self.position_of(from)
                .and_then(|pos| self.pipeline.order.get(pos + 1))
                .map(|next| vec![next.as_str()])
                .unwrap_or_default()
        } else {
            agent.handoff_next.iter().map(String::as_str).collect()
        };
        for candidate in &self.agents {
            let id = candidate.id.as_str();
            if id == from || targets.contains(&id) {
                continue;
            }
            if candidate.agent_type == AgentType::OnDemand || self.share_cycle(from, id) {
                targets.push(id);
            }
        }
        targets
    }

    pub fn is_legal_handoff(&self, from: &str, to: &str) -> bool {
        self.legal_targets(from).contains(&to)
    }
}

fn parse_document<T: DeserializeOwned + Default>(doc: &Document, violations: &mut Vec<String>) -> T {
    let parsed = match doc.format {
        DocumentFormat::Yaml => serde_yaml::from_str(&doc.content).map_err(|e| e.to_string()),
        DocumentFormat::Json => serde_json::from_str(&doc.content).map_err(|e| e.to_string()),
    };
    parsed.unwrap_or_else(|message| {
        violations.push(format!("{}: {}", doc.origin, message));
        T::default()
    })
}

#[cfg(test)]
#[path = "tests/manifest_tests.rs"]
mod tests;
