//! Ordered manifest resolution strategies.
//!
//! Each strategy reports found / not-found for a workflow name. The store
//! tries them in order and the first hit wins.

use crate::errors::{Result, WorkflowError};
use crate::paths;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the workflow compiled into the binary.
pub const BUNDLED_WORKFLOW: &str = "planning";

const BUNDLED_AGENTS: &str = include_str!("../../workflows/planning/agents.yaml");
const BUNDLED_ARTIFACTS: &str = include_str!("../../workflows/planning/artifacts.yaml");
const BUNDLED_INSTRUCTIONS: &str = include_str!("../../workflows/planning/instructions.yaml");
const BUNDLED_WORKFLOW_DOC: &str = include_str!("../../workflows/planning/workflow.yaml");

const EXTENSIONS: [(&str, DocumentFormat); 3] = [
    ("yaml", DocumentFormat::Yaml),
    ("yml", DocumentFormat::Yaml),
    ("json", DocumentFormat::Json),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

/// One manifest document's raw text and where it came from.
#[derive(Debug, Clone)]
pub struct Document {
    pub origin: String,
    pub format: DocumentFormat,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct WorkflowDocuments {
    /// Human-readable location the documents were found at.
    pub origin: String,
    pub agents: Document,
    pub artifacts: Document,
    pub instructions: Document,
    pub workflow: Document,
}

pub trait ManifestSource {
    /// Location description used in not-found errors.
    fn describe(&self, workflow: &str) -> String;

    /// Returns `Ok(None)` when this source does not hold the workflow.
    fn locate(&self, workflow: &str) -> Result<Option<WorkflowDocuments>>;
}

/// A directory holding one subdirectory per workflow.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    label: &'static str,
    base: PathBuf,
}

impl DirectorySource {
    pub fn project_local(root: &Path) -> Self {
        Self {
            label: "project-local",
            base: paths::local_workflows_dir(root),
        }
    }

    pub fn user_global(base: PathBuf) -> Self {
        Self {
            label: "user-global",
            base,
        }
    }

    fn read_document(&self, workflow: &str, dir: &Path, name: &str) -> Result<Document> {
        for (extension, format) in EXTENSIONS {
            let path = dir.join(format!("{}.{}", name, extension));
            if !path.is_file() {
                continue;
            }
            let content =
                fs::read_to_string(&path).map_err(|e| WorkflowError::io("read", &path, e))?;
            tracing::debug!(path = %path.display(), "read manifest document");
            return Ok(Document {
                origin: path.display().to_string(),
                format,
                content,
            });
        }
        Err(WorkflowError::ManifestNotFound {
            workflow: workflow.to_string(),
            searched: vec![format!("{} ({}/{}.{{yaml,yml,json}})", self.label, dir.display(), name)],
        })
    }
}

impl ManifestSource for DirectorySource {
    fn describe(&self, workflow: &str) -> String {
        format!("{} ({})", self.label, self.base.join(workflow).display())
    }

    fn locate(&self, workflow: &str) -> Result<Option<WorkflowDocuments>> {
        let dir = self.base.join(workflow);
        if !dir.is_dir() {
            return Ok(None);
        }
        Ok(Some(WorkflowDocuments {
            origin: self.describe(workflow),
            agents: self.read_document(workflow, &dir, "agents")?,
            artifacts: self.read_document(workflow, &dir, "artifacts")?,
            instructions: self.read_document(workflow, &dir, "instructions")?,
            workflow: self.read_document(workflow, &dir, "workflow")?,
        }))
    }
}

/// The workflow compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledSource;

impl ManifestSource for BundledSource {
    fn describe(&self, _workflow: &str) -> String {
        format!("bundled ({})", BUNDLED_WORKFLOW)
    }

    fn locate(&self, workflow: &str) -> Result<Option<WorkflowDocuments>> {
        if workflow != BUNDLED_WORKFLOW {
            return Ok(None);
        }
        let bundled = |name: &str, content: &str| Document {
            origin: format!("bundled:{}/{}.yaml", BUNDLED_WORKFLOW, name),
            format: DocumentFormat::Yaml,
            content: content.to_string(),
        };
        Ok(Some(WorkflowDocuments {
            origin: self.describe(workflow),
            agents: bundled("agents", BUNDLED_AGENTS),
            artifacts: bundled("artifacts", BUNDLED_ARTIFACTS),
            instructions: bundled("instructions", BUNDLED_INSTRUCTIONS),
            workflow: bundled("workflow", BUNDLED_WORKFLOW_DOC),
        }))
    }
}

/// Project-local, then user-global (when a home directory exists), then bundled.
pub fn default_sources(root: &Path) -> Vec<Box<dyn ManifestSource>> {
    let mut sources: Vec<Box<dyn ManifestSource>> =
        vec![Box::new(DirectorySource::project_local(root))];
    if let Some(dir) = paths::user_workflows_dir() {
        sources.push(Box::new(DirectorySource::user_global(dir)));
    }
    sources.push(Box::new(BundledSource));
    sources
}

/// Workflow names double as directory names, so only plain names are accepted.
pub fn is_valid_workflow_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Tries each source in order; the first hit wins.
pub fn resolve(sources: &[Box<dyn ManifestSource>], workflow: &str) -> Result<WorkflowDocuments> {
    if !is_valid_workflow_name(workflow) {
        return Err(WorkflowError::Validation {
            context: "workflow name".to_string(),
            violations: vec![format!(
                "'{}' is not a valid workflow name (lowercase letters, digits, '_' and '-')",
                workflow
            )],
        });
    }
    let mut searched = Vec::new();
    for source in sources {
        if let Some(documents) = source.locate(workflow)? {
            tracing::debug!(workflow, origin = %documents.origin, "resolved workflow");
            return Ok(documents);
        }
        searched.push(source.describe(workflow));
    }
    Err(WorkflowError::ManifestNotFound {
        workflow: workflow.to_string(),
        searched,
    })
}
