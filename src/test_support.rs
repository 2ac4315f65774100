//! Shared fixtures for unit tests.

use crate::manifest::resolve::{Document, DocumentFormat};
use crate::manifest::{Manifest, WorkflowDocuments};
use crate::paths;
use crate::project::{GovernanceMode, Project};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Workflow name used by the two-agent fixture.
pub const PAIR_WORKFLOW: &str = "pair";

pub const PAIR_AGENTS: &str = r#"
agents:
  - id: A-01
    slug: first
    role: Writes the spec
    type: core
    produces: [spec.md]
  - id: A-02
    slug: second
    role: Builds from the spec
    type: core
    produces: [build.md]
    consumes: [spec.md]
"#;

pub const PAIR_ARTIFACTS: &str = r#"
artifacts:
  - filename: spec.md
    owner: A-01
    category: core
    required: true
  - filename: build.md
    owner: A-02
    category: domain
"#;

pub const PAIR_INSTRUCTIONS: &str = r#"
instructions:
  - id: A-01
    slug: first
  - id: A-02
    slug: second
"#;

pub const PAIR_WORKFLOW_DOC: &str = r#"
name: pair
pipeline:
  order: [A-01, A-02]
"#;

pub fn yaml_documents(
    agents: &str,
    artifacts: &str,
    instructions: &str,
    workflow: &str,
) -> WorkflowDocuments {
    let doc = |name: &str, content: &str| Document {
        origin: format!("test:{}.yaml", name),
        format: DocumentFormat::Yaml,
        content: content.to_string(),
    };
    WorkflowDocuments {
        origin: "test".to_string(),
        agents: doc("agents", agents),
        artifacts: doc("artifacts", artifacts),
        instructions: doc("instructions", instructions),
        workflow: doc("workflow", workflow),
    }
}

pub fn pair_manifest() -> Manifest {
    Manifest::from_documents(
        PAIR_WORKFLOW,
        yaml_documents(PAIR_AGENTS, PAIR_ARTIFACTS, PAIR_INSTRUCTIONS, PAIR_WORKFLOW_DOC),
    )
    .unwrap()
}

/// Writes a workflow into the project-local manifest directory.
pub fn write_workflow(
    root: &Path,
    name: &str,
    agents: &str,
    artifacts: &str,
    instructions: &str,
    workflow: &str,
) {
    let dir = paths::local_workflows_dir(root).join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("agents.yaml"), agents).unwrap();
    fs::write(dir.join("artifacts.yaml"), artifacts).unwrap();
    fs::write(dir.join("instructions.yaml"), instructions).unwrap();
    fs::write(dir.join("workflow.yaml"), workflow).unwrap();
}

/// A fresh project using the two-agent workflow.
pub fn pair_project(mode: GovernanceMode) -> (TempDir, Project) {
    let dir = tempfile::tempdir().unwrap();
    write_workflow(
        dir.path(),
        PAIR_WORKFLOW,
        PAIR_AGENTS,
        PAIR_ARTIFACTS,
        PAIR_INSTRUCTIONS,
        PAIR_WORKFLOW_DOC,
    );
    let project = Project::init(dir.path(), "demo", PAIR_WORKFLOW, mode).unwrap();
    (dir, project)
}
