//! Manifest document schema: raw serde documents and the typed records
//! produced from them by the structural validation pass.
//!
//! Raw documents keep every field optional and every enum as a string so a
//! single pass can report all problems instead of stopping at the first one.

use crate::project::GovernanceMode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

/// Default timeout for checkpoint validation commands.
pub const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 60;

fn agent_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z]{1,2}-[A-Z0-9]{2,6}$").expect("agent id pattern"))
}

fn slug_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9_]+$").expect("slug pattern"))
}

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9_/]+\.(md|yaml|json|bib)$").expect("artifact filename pattern")
    })
}

pub fn is_valid_agent_id(id: &str) -> bool {
    agent_id_pattern().is_match(id)
}

pub fn is_valid_slug(slug: &str) -> bool {
    slug_pattern().is_match(slug)
}

pub fn is_valid_artifact_filename(filename: &str) -> bool {
    filename_pattern().is_match(filename)
}

// ============================================================================
// Typed records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Orchestrator,
    Core,
    OnDemand,
    Gating,
}

impl AgentType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "orchestrator" => Some(AgentType::Orchestrator),
            "core" => Some(AgentType::Core),
            "on_demand" => Some(AgentType::OnDemand),
            "gating" => Some(AgentType::Gating),
            _ => None,
        }
    }

    /// Agent types exempt from strict predecessor ordering.
    pub fn bypasses_ordering(&self) -> bool {
        !matches!(self, AgentType::Core)
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentType::Orchestrator => "orchestrator",
            AgentType::Core => "core",
            AgentType::OnDemand => "on_demand",
            AgentType::Gating => "gating",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactCategory {
    Core,
    Domain,
    Reference,
    Gating,
    Log,
}

impl ArtifactCategory {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "core" => Some(ArtifactCategory::Core),
            "domain" => Some(ArtifactCategory::Domain),
            "reference" => Some(ArtifactCategory::Reference),
            "gating" => Some(ArtifactCategory::Gating),
            "log" => Some(ArtifactCategory::Log),
            _ => None,
        }
    }
}

/// A consumed artifact, local or imported from another workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumeRef {
    pub file: String,
    pub from_workflow: Option<String>,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    pub id: String,
    pub slug: String,
    pub role: String,
    pub agent_type: AgentType,
    pub produces: Vec<String>,
    pub consumes: Vec<ConsumeRef>,
    /// Explicit legal handoff targets. Empty means "next in pipeline order".
    pub handoff_next: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub filename: String,
    pub owner: String,
    pub category: ArtifactCategory,
    pub required: bool,
    pub is_gating: bool,
    pub description: Option<String>,
}

/// Behavioral guidance for an agent. Not authoritative for structure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub id: String,
    pub slug: String,
    pub purpose: Option<String>,
    pub guidance: Vec<String>,
    pub cycle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub id: String,
    pub name: Option<String>,
    pub agents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationCommand {
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BypassPolicy {
    pub allowed_roles: Vec<String>,
    pub require_reason: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkpoint {
    pub id: String,
    pub agent: String,
    pub gating: GovernanceMode,
    pub required_artifacts: Vec<String>,
    pub required_logs: Vec<String>,
    pub validation: Option<ValidationCommand>,
    pub bypass: Option<BypassPolicy>,
    pub description: Option<String>,
}

/// A declared iteration loop. Members may depend on and hand off to each
/// other regardless of pipeline direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationCycle {
    pub name: String,
    pub agents: Vec<String>,
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineDefinition {
    pub order: Vec<String>,
    pub on_demand: Vec<String>,
    pub stages: Vec<Stage>,
    pub checkpoints: Vec<Checkpoint>,
    pub cycles: Vec<IterationCycle>,
    /// Cross-workflow imports: workflow name -> importable filenames.
    pub imports: BTreeMap<String, Vec<String>>,
    pub default_mode: Option<GovernanceMode>,
}

/// Output of the structural pass, ready for cross-reference checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestParts {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub agents: Vec<Agent>,
    pub artifacts: Vec<Artifact>,
    pub instructions: Vec<Instruction>,
    pub pipeline: PipelineDefinition,
}

// ============================================================================
// Raw documents
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAgentsDoc {
    #[serde(default)]
    pub agents: Vec<RawAgent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawAgent {
    pub id: Option<String>,
    pub slug: Option<String>,
    pub role: Option<String>,
    #[serde(rename = "type")]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub produces: Vec<String>,
    #[serde(default)]
    pub consumes: Vec<RawConsume>,
    #[serde(default)]
    pub handoff_next: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawConsume {
    File(String),
    Detailed {
        file: Option<String>,
        from_workflow: Option<String>,
        required: Option<bool>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawArtifactsDoc {
    #[serde(default)]
    pub artifacts: Vec<RawArtifact>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawArtifact {
    pub filename: Option<String>,
    pub owner: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub is_gating: bool,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawInstructionsDoc {
    #[serde(default)]
    pub instructions: Vec<RawInstruction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawInstruction {
    pub id: Option<String>,
    pub slug: Option<String>,
    pub purpose: Option<String>,
    #[serde(default)]
    pub guidance: Vec<String>,
    pub cycle: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawWorkflowDoc {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub pipeline: Option<RawPipeline>,
    #[serde(default)]
    pub stages: Vec<RawStage>,
    #[serde(default)]
    pub checkpoints: Vec<RawCheckpoint>,
    #[serde(default)]
    pub cycles: BTreeMap<String, RawCycle>,
    #[serde(default)]
    pub input_from: BTreeMap<String, RawImport>,
    pub config: Option<RawWorkflowConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPipeline {
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub on_demand: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStage {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub agents: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCheckpoint {
    pub id: Option<String>,
    pub agent: Option<String>,
    pub gating: Option<String>,
    #[serde(default)]
    pub required_artifacts: Vec<String>,
    #[serde(default)]
    pub required_logs: Vec<String>,
    pub validation: Option<RawValidation>,
    pub bypass: Option<RawBypass>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawValidation {
    #[serde(default)]
    pub command: Vec<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBypass {
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    #[serde(default)]
    pub require_reason: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawCycle {
    #[serde(default)]
    pub agents: Vec<String>,
    pub max_iterations: Option<u32>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawImport {
    #[serde(default)]
    pub artifacts: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawWorkflowConfig {
    pub enforcement: Option<RawEnforcement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEnforcement {
    pub mode: Option<String>,
}

/// The four raw documents of one workflow.
#[derive(Debug, Default)]
pub struct RawDocuments {
    pub agents: RawAgentsDoc,
    pub artifacts: RawArtifactsDoc,
    pub instructions: RawInstructionsDoc,
    pub workflow: RawWorkflowDoc,
}

// ============================================================================
// Structural pass
// ============================================================================

/// Converts raw documents into typed records, recording every structural
/// violation. Records missing their identifying field are dropped; records
/// with an illegal enum value are kept with a placeholder so cross-reference
/// checks can still run against them.
pub fn build_parts(
    workflow_name: &str,
    raw: RawDocuments,
    violations: &mut Vec<String>,
) -> ManifestParts {
    let agents = build_agents(raw.agents, violations);
    let artifacts = build_artifacts(raw.artifacts, violations);
    let instructions = build_instructions(raw.instructions, violations);

    let RawWorkflowDoc {
        name,
        version,
        description,
        pipeline,
        stages,
        checkpoints,
        cycles,
        input_from,
        config,
    } = raw.workflow;

    let name = match name {
        Some(name) if !name.trim().is_empty() => {
            if name != workflow_name {
                violations.push(format!(
                    "workflow: name '{}' does not match requested workflow '{}'",
                    name, workflow_name
                ));
            }
            name
        }
        _ => {
            violations.push("workflow: missing required field 'name'".to_string());
            workflow_name.to_string()
        }
    };

    let RawPipeline { order, on_demand } = pipeline.unwrap_or_default();
    if order.is_empty() {
        violations.push("workflow: pipeline.order must list at least one agent".to_string());
    }
    report_duplicates("workflow: pipeline.order", order.iter(), violations);

    let stages = stages
        .into_iter()
        .enumerate()
        .filter_map(|(index, stage)| match stage.id {
            Some(id) if !id.trim().is_empty() => Some(Stage {
                id,
                name: stage.name,
                agents: stage.agents,
            }),
            _ => {
                violations.push(format!("workflow: stage #{} missing required field 'id'", index + 1));
                None
            }
        })
        .collect::<Vec<_>>();
    report_duplicates("workflow: stage id", stages.iter().map(|s| &s.id), violations);

    let checkpoints = build_checkpoints(checkpoints, violations);

    let cycles = cycles
        .into_iter()
        .map(|(name, cycle)| {
            if cycle.agents.len() < 2 {
                violations.push(format!(
                    "workflow: cycle '{}' must list at least two agents",
                    name
                ));
            }
            IterationCycle {
                name,
                agents: cycle.agents,
                max_iterations: cycle.max_iterations,
            }
        })
        .collect();

    let imports = input_from
        .into_iter()
        .map(|(workflow, import)| (workflow, import.artifacts))
        .collect();

    let default_mode = config
        .and_then(|c| c.enforcement)
        .and_then(|e| e.mode)
        .and_then(|mode| match mode.parse::<GovernanceMode>() {
            Ok(mode) => Some(mode),
            Err(e) => {
                violations.push(format!("workflow: config.enforcement.mode: {}", e));
                None
            }
        });

    ManifestParts {
        name,
        version,
        description,
        agents,
        artifacts,
        instructions,
        pipeline: PipelineDefinition {
            order,
            on_demand,
            stages,
            checkpoints,
            cycles,
            imports,
            default_mode,
        },
    }
}

fn build_agents(doc: RawAgentsDoc, violations: &mut Vec<String>) -> Vec<Agent> {
    let mut agents = Vec::new();
    for (index, raw) in doc.agents.into_iter().enumerate() {
        let Some(id) = required(raw.id, "agents", index, "id", violations) else {
            continue;
        };
        if !is_valid_agent_id(&id) {
            violations.push(format!(
                "agents: invalid agent id '{}' (must match ^[A-Z]{{1,2}}-[A-Z0-9]{{2,6}}$)",
                id
            ));
        }
        let slug = required(raw.slug, "agents", index, "slug", violations).unwrap_or_default();
        if !slug.is_empty() && !is_valid_slug(&slug) {
            violations.push(format!("agents: invalid slug '{}' for agent {}", slug, id));
        }
        let role = required(raw.role, "agents", index, "role", violations).unwrap_or_default();
        let agent_type = match required(raw.agent_type, "agents", index, "type", violations) {
            Some(value) => AgentType::parse(&value).unwrap_or_else(|| {
                violations.push(format!(
                    "agents: agent {} has illegal type '{}' (expected orchestrator, core, on_demand, or gating)",
                    id, value
                ));
                AgentType::Core
            }),
            None => AgentType::Core,
        };
        let consumes = raw
            .consumes
            .into_iter()
            .filter_map(|item| match item {
                RawConsume::File(file) => Some(ConsumeRef {
                    file,
                    from_workflow: None,
                    required: true,
                }),
                RawConsume::Detailed {
                    file: Some(file),
                    from_workflow,
                    required,
                } => Some(ConsumeRef {
                    file,
                    from_workflow,
                    required: required.unwrap_or(true),
                }),
                RawConsume::Detailed { file: None, .. } => {
                    violations.push(format!(
                        "agents: agent {} has a consumes entry without 'file'",
                        id
                    ));
                    None
                }
            })
            .collect();

        agents.push(Agent {
            id,
            slug,
            role,
            agent_type,
            produces: raw.produces,
            consumes,
            handoff_next: raw.handoff_next,
        });
    }
    report_duplicates("agents: agent id", agents.iter().map(|a| &a.id), violations);
    report_duplicates(
        "agents: slug",
        agents.iter().map(|a| &a.slug).filter(|s| !s.is_empty()),
        violations,
    );
    agents
}

fn build_artifacts(doc: RawArtifactsDoc, violations: &mut Vec<String>) -> Vec<Artifact> {
    let mut artifacts = Vec::new();
    for (index, raw) in doc.artifacts.into_iter().enumerate() {
        let Some(filename) = required(raw.filename, "artifacts", index, "filename", violations)
        else {
            continue;
        };
        if !is_valid_artifact_filename(&filename) {
            violations.push(format!(
                "artifacts: invalid filename '{}' (must match ^[a-z0-9_/]+\\.(md|yaml|json|bib)$)",
                filename
            ));
        }
        let owner = required(raw.owner, "artifacts", index, "owner", violations).unwrap_or_default();
        let category = match required(raw.category, "artifacts", index, "category", violations) {
            Some(value) => ArtifactCategory::parse(&value).unwrap_or_else(|| {
                violations.push(format!(
                    "artifacts: '{}' has illegal category '{}' (expected core, domain, reference, gating, or log)",
                    filename, value
                ));
                ArtifactCategory::Core
            }),
            None => ArtifactCategory::Core,
        };
        artifacts.push(Artifact {
            filename,
            owner,
            category,
            required: raw.required,
            is_gating: raw.is_gating,
            description: raw.description,
        });
    }
    report_duplicates(
        "artifacts: filename",
        artifacts.iter().map(|a| &a.filename),
        violations,
    );
    artifacts
}

fn build_instructions(doc: RawInstructionsDoc, violations: &mut Vec<String>) -> Vec<Instruction> {
    let mut instructions = Vec::new();
    for (index, raw) in doc.instructions.into_iter().enumerate() {
        let Some(id) = required(raw.id, "instructions", index, "id", violations) else {
            continue;
        };
        if !is_valid_agent_id(&id) {
            violations.push(format!("instructions: invalid id '{}'", id));
        }
        let slug =
            required(raw.slug, "instructions", index, "slug", violations).unwrap_or_default();
        if !slug.is_empty() && !is_valid_slug(&slug) {
            violations.push(format!("instructions: invalid slug '{}' for {}", slug, id));
        }
        instructions.push(Instruction {
            id,
            slug,
            purpose: raw.purpose,
            guidance: raw.guidance,
            cycle: raw.cycle,
        });
    }
    report_duplicates(
        "instructions: id",
        instructions.iter().map(|i| &i.id),
        violations,
    );
    instructions
}

fn build_checkpoints(raw: Vec<RawCheckpoint>, violations: &mut Vec<String>) -> Vec<Checkpoint> {
    let mut checkpoints = Vec::new();
    for (index, raw) in raw.into_iter().enumerate() {
        let Some(id) = required(raw.id, "checkpoints", index, "id", violations) else {
            continue;
        };
        let Some(agent) = required(raw.agent, "checkpoints", index, "agent", violations) else {
            continue;
        };
        let gating = match required(raw.gating, "checkpoints", index, "gating", violations) {
            Some(value) => value.parse::<GovernanceMode>().unwrap_or_else(|e| {
                violations.push(format!("checkpoints: checkpoint {}: {}", id, e));
                GovernanceMode::Strict
            }),
            None => GovernanceMode::Strict,
        };
        let validation = raw.validation.and_then(|v| {
            if v.command.is_empty() {
                violations.push(format!(
                    "checkpoints: checkpoint {} validation.command must not be empty",
                    id
                ));
                return None;
            }
            let timeout_secs = match v.timeout_secs {
                Some(0) => {
                    violations.push(format!(
                        "checkpoints: checkpoint {} validation.timeout_secs must be positive",
                        id
                    ));
                    DEFAULT_VALIDATION_TIMEOUT_SECS
                }
                Some(secs) => secs,
                None => DEFAULT_VALIDATION_TIMEOUT_SECS,
            };
            Some(ValidationCommand {
                command: v.command,
                timeout_secs,
            })
        });
        let bypass = raw.bypass.map(|b| {
            if b.allowed_roles.is_empty() {
                violations.push(format!(
                    "checkpoints: checkpoint {} bypass.allowed_roles must not be empty",
                    id
                ));
            }
            BypassPolicy {
                allowed_roles: b.allowed_roles,
                require_reason: b.require_reason,
            }
        });
        checkpoints.push(Checkpoint {
            id,
            agent,
            gating,
            required_artifacts: raw.required_artifacts,
            required_logs: raw.required_logs,
            validation,
            bypass,
            description: raw.description,
        });
    }
    report_duplicates(
        "checkpoints: id",
        checkpoints.iter().map(|c| &c.id),
        violations,
    );
    checkpoints
}

fn required(
    value: Option<String>,
    document: &str,
    index: usize,
    field: &str,
    violations: &mut Vec<String>,
) -> Option<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Some(v),
        _ => {
            violations.push(format!(
                "{}: entry #{} missing required field '{}'",
                document,
                index + 1,
                field
            ));
            None
        }
    }
}

fn report_duplicates<'a>(
    label: &str,
    values: impl Iterator<Item = &'a String>,
    violations: &mut Vec<String>,
) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for value in values {
        if !seen.insert(value.as_str()) && reported.insert(value.as_str()) {
            violations.push(format!("{} '{}' is declared more than once", label, value));
        }
    }
}
