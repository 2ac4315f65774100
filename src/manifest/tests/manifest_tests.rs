use super::*;
use crate::paths;
use crate::test_support::{
    pair_manifest, write_workflow, yaml_documents, PAIR_AGENTS, PAIR_ARTIFACTS,
    PAIR_INSTRUCTIONS, PAIR_WORKFLOW_DOC,
};
use serial_test::serial;
use std::fs;
use tempfile::tempdir;

fn bundled() -> Manifest {
    ManifestStore::with_sources(vec![Box::new(BundledSource)])
        .load("planning")
        .unwrap()
}

fn load_err(agents: &str, artifacts: &str, instructions: &str, workflow: &str) -> WorkflowError {
    Manifest::from_documents("pair", yaml_documents(agents, artifacts, instructions, workflow))
        .unwrap_err()
}

fn assert_violation(err: &WorkflowError, needle: &str) {
    assert!(
        err.violations().iter().any(|v| v.contains(needle)),
        "expected a violation containing {:?}, got {:#?}",
        needle,
        err.violations()
    );
}

#[test]
fn test_bundled_planning_workflow_is_valid() {
    let manifest = bundled();
    assert_eq!(manifest.name(), "planning");
    assert_eq!(manifest.agents_of().len(), 7);
    assert_eq!(manifest.artifacts_of().len(), 6);
    assert_eq!(manifest.checkpoints_of().len(), 2);
    assert_eq!(manifest.default_mode(), Some(GovernanceMode::Strict));
    assert_eq!(manifest.stage_of("A-03"), Some("design"));
    assert!(manifest.warnings().is_empty(), "{:?}", manifest.warnings());
    assert!(manifest.origin().starts_with("bundled"));
}

#[test]
fn test_pair_manifest_accessors() {
    let manifest = pair_manifest();
    assert_eq!(manifest.position_of("A-02"), Some(1));
    assert_eq!(manifest.predecessor_of("A-02"), Some("A-01"));
    assert_eq!(manifest.predecessor_of("A-01"), None);
    assert_eq!(manifest.stage_of("A-01"), None);
    assert!(manifest.nearest_checkpoint("A-02").is_none());
    assert_eq!(manifest.instruction_for("A-01").map(|i| i.slug.as_str()), Some("first"));
    assert!(matches!(
        manifest.require_agent("Z-99"),
        Err(WorkflowError::UnknownAgent { .. })
    ));
}

#[test]
fn test_collects_every_structural_violation() {
    let agents = r#"
agents:
  - id: a-1
    slug: Bad Slug
    role: r
    type: worker
  - slug: nameless
    role: r
    type: core
"#;
    let artifacts = r#"
artifacts:
  - filename: Spec.MD
    owner: A-01
    category: misc
"#;
    let workflow = "name: pair\npipeline:\n  order: []\n";
    let err = load_err(agents, artifacts, "instructions: []", workflow);

    assert!(matches!(err, WorkflowError::Validation { .. }));
    assert_violation(&err, "invalid agent id 'a-1'");
    assert_violation(&err, "invalid slug 'Bad Slug'");
    assert_violation(&err, "illegal type 'worker'");
    assert_violation(&err, "entry #2 missing required field 'id'");
    assert_violation(&err, "invalid filename 'Spec.MD'");
    assert_violation(&err, "illegal category 'misc'");
    assert_violation(&err, "pipeline.order must list at least one agent");
    assert_violation(&err, "owned by undeclared agent A-01");
}

#[test]
fn test_cross_reference_violations() {
    let agents = r#"
agents:
  - id: A-01
    slug: first
    role: r
    type: core
    produces: [spec.md, ghost.md]
    handoff_next: [A-77]
"#;
    let instructions = r#"
instructions:
  - id: A-01
    slug: other
  - id: A-02
    slug: second
"#;
    let workflow = r#"
name: pair
pipeline:
  order: [A-01, A-09]
checkpoints:
  - id: CP-1
    agent: A-08
    gating: loose
    required_artifacts: [missing.md]
"#;
    let artifacts = "artifacts:\n  - {filename: spec.md, owner: A-01, category: core}\n";
    let err = load_err(agents, artifacts, instructions, workflow);

    assert_violation(&err, "order references undeclared agent A-09");
    assert_violation(&err, "produces undeclared artifact 'ghost.md'");
    assert_violation(&err, "handoff to undeclared agent A-77");
    assert_violation(&err, "has slug 'other' but the agent's slug is 'first'");
    assert_violation(&err, "instructions: A-02 does not match any declared agent");
    assert_violation(&err, "CP-1 is bound to undeclared agent A-08");
    assert_violation(&err, "CP-1 requires undeclared artifact 'missing.md'");
    assert_violation(&err, "invalid governance mode 'loose'");
}

#[test]
fn test_downstream_only_dependency_is_a_cycle_error() {
    let agents = PAIR_AGENTS.replace(
        "    produces: [spec.md]\n",
        "    produces: [spec.md]\n    consumes: [build.md]\n",
    );
    let err = load_err(&agents, PAIR_ARTIFACTS, PAIR_INSTRUCTIONS, PAIR_WORKFLOW_DOC);
    assert_violation(&err, "cycle: agent A-01 consumes 'build.md'");

    let with_cycle = format!("{}cycles:\n  loop:\n    agents: [A-01, A-02]\n", PAIR_WORKFLOW_DOC);
    let manifest = Manifest::from_documents(
        "pair",
        yaml_documents(&agents, PAIR_ARTIFACTS, PAIR_INSTRUCTIONS, &with_cycle),
    )
    .unwrap();
    assert!(manifest.share_cycle("A-02", "A-01"));
    assert!(manifest.is_legal_handoff("A-02", "A-01"));
}

#[test]
fn test_cross_workflow_imports() {
    let agents = PAIR_AGENTS.replace(
        "    consumes: [spec.md]\n",
        "    consumes:\n      - spec.md\n      - {file: upstream.md, from_workflow: discovery}\n",
    );
    let err = load_err(&agents, PAIR_ARTIFACTS, PAIR_INSTRUCTIONS, PAIR_WORKFLOW_DOC);
    assert_violation(&err, "from workflow 'discovery' which is not declared in input_from");

    let workflow = format!(
        "{}input_from:\n  discovery:\n    artifacts: [upstream.md]\n",
        PAIR_WORKFLOW_DOC
    );
    let manifest = Manifest::from_documents(
        "pair",
        yaml_documents(&agents, PAIR_ARTIFACTS, PAIR_INSTRUCTIONS, &workflow),
    )
    .unwrap();
    let consumes = &manifest.agent("A-02").unwrap().consumes;
    assert_eq!(consumes[1].from_workflow.as_deref(), Some("discovery"));
    assert!(consumes[1].required);
}

#[test]
fn test_stages_must_cover_order_without_overlap() {
    let workflow = r#"
name: pair
pipeline:
  order: [A-01, A-02]
stages:
  - id: one
    agents: [A-01]
  - id: two
    agents: [A-01, Z-99]
"#;
    let err = load_err(PAIR_AGENTS, PAIR_ARTIFACTS, PAIR_INSTRUCTIONS, workflow);
    assert_violation(&err, "agent A-01 appears in both 'one' and 'two'");
    assert_violation(&err, "lists agent Z-99 which is not in the pipeline");
    assert_violation(&err, "agent A-02 is not covered by any stage");
}

#[test]
fn test_malformed_document_names_its_origin() {
    let err = load_err("agents: [", PAIR_ARTIFACTS, PAIR_INSTRUCTIONS, PAIR_WORKFLOW_DOC);
    assert_violation(&err, "test:agents.yaml");
}

#[test]
fn test_workflow_name_must_match_request() {
    let err = load_err(
        PAIR_AGENTS,
        PAIR_ARTIFACTS,
        PAIR_INSTRUCTIONS,
        "name: other\npipeline:\n  order: [A-01, A-02]\n",
    );
    assert_violation(&err, "does not match requested workflow 'pair'");
}

#[test]
fn test_legal_handoff_rules() {
    let manifest = bundled();
    assert!(manifest.is_legal_handoff("A-01", "A-02"));
    assert!(!manifest.is_legal_handoff("A-01", "A-03"));
    assert!(manifest.is_legal_handoff("A-03", "A-04"));
    assert!(!manifest.is_legal_handoff("A-03", "A-05"));
    // explicit handoff_next
    assert!(manifest.is_legal_handoff("A-04", "A-05"));
    assert!(manifest.is_legal_handoff("A-04", "A-03"));
    assert!(manifest.is_legal_handoff("A-02", "O-RS"));
    assert!(manifest.is_legal_handoff("A-00", "A-05"));
    assert!(!manifest.is_legal_handoff("Z-99", "A-01"));
}

#[test]
fn test_nearest_checkpoint_walks_back_in_order() {
    let manifest = bundled();
    let nearest = |id: &str| manifest.nearest_checkpoint(id).map(|c| c.id.as_str());
    assert_eq!(nearest("A-01"), None);
    assert_eq!(nearest("A-02"), Some("CP-BRIEF"));
    assert_eq!(nearest("A-04"), Some("CP-BRIEF"));
    assert_eq!(nearest("A-05"), Some("CP-DESIGN"));
    assert_eq!(nearest("O-RS"), None);

    let design = manifest.nearest_checkpoint("A-05").unwrap();
    let bypass = design.bypass.as_ref().unwrap();
    assert_eq!(bypass.allowed_roles, vec!["lead".to_string()]);
    assert!(bypass.require_reason);
    assert!(design.validation.is_none());
}

#[test]
fn test_project_local_overrides_bundled() {
    let dir = tempdir().unwrap();
    let workflow = PAIR_WORKFLOW_DOC.replace("name: pair", "name: planning");
    write_workflow(
        dir.path(),
        "planning",
        PAIR_AGENTS,
        PAIR_ARTIFACTS,
        PAIR_INSTRUCTIONS,
        &workflow,
    );
    let manifest = ManifestStore::for_project(dir.path()).load("planning").unwrap();
    assert_eq!(manifest.agents_of().len(), 2);
    assert!(manifest.origin().starts_with("project-local"));
}

#[test]
fn test_json_documents_are_accepted() {
    let dir = tempdir().unwrap();
    write_workflow(
        dir.path(),
        "pair",
        PAIR_AGENTS,
        PAIR_ARTIFACTS,
        PAIR_INSTRUCTIONS,
        PAIR_WORKFLOW_DOC,
    );
    let wf_dir = paths::local_workflows_dir(dir.path()).join("pair");
    fs::remove_file(wf_dir.join("workflow.yaml")).unwrap();
    fs::write(
        wf_dir.join("workflow.json"),
        r#"{"name": "pair", "pipeline": {"order": ["A-01", "A-02"]}}"#,
    )
    .unwrap();
    let manifest = ManifestStore::for_project(dir.path()).load("pair").unwrap();
    assert_eq!(manifest.pipeline().order, vec!["A-01", "A-02"]);
}

#[test]
fn test_missing_document_in_found_directory() {
    let dir = tempdir().unwrap();
    write_workflow(
        dir.path(),
        "pair",
        PAIR_AGENTS,
        PAIR_ARTIFACTS,
        PAIR_INSTRUCTIONS,
        PAIR_WORKFLOW_DOC,
    );
    fs::remove_file(
        paths::local_workflows_dir(dir.path())
            .join("pair")
            .join("instructions.yaml"),
    )
    .unwrap();
    let err = ManifestStore::for_project(dir.path()).load("pair").unwrap_err();
    assert!(matches!(err, WorkflowError::ManifestNotFound { .. }));
    assert!(err.to_string().contains("instructions"));
}

#[test]
#[serial]
fn test_user_global_workflow_resolution() {
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    std::env::set_var(paths::HOME_ENV, home.path());

    let dir = home.path().join("workflows").join("pair");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("agents.yaml"), PAIR_AGENTS).unwrap();
    fs::write(dir.join("artifacts.yaml"), PAIR_ARTIFACTS).unwrap();
    fs::write(dir.join("instructions.yaml"), PAIR_INSTRUCTIONS).unwrap();
    fs::write(dir.join("workflow.yaml"), PAIR_WORKFLOW_DOC).unwrap();

    let result = ManifestStore::for_project(project.path()).load("pair");
    std::env::remove_var(paths::HOME_ENV);

    let manifest = result.unwrap();
    assert!(manifest.origin().starts_with("user-global"));
}

#[test]
#[serial]
fn test_missing_workflow_lists_every_location() {
    let home = tempdir().unwrap();
    let project = tempdir().unwrap();
    std::env::set_var(paths::HOME_ENV, home.path());
    let result = ManifestStore::for_project(project.path()).load("nowhere");
    std::env::remove_var(paths::HOME_ENV);

    match result {
        Err(WorkflowError::ManifestNotFound { workflow, searched }) => {
            assert_eq!(workflow, "nowhere");
            assert_eq!(searched.len(), 3);
            assert!(searched[0].starts_with("project-local"));
            assert!(searched[1].starts_with("user-global"));
            assert!(searched[2].starts_with("bundled"));
        }
        other => panic!("expected ManifestNotFound, got {:?}", other.map(|m| m.name().to_string())),
    }
}

#[test]
fn test_rejects_path_like_workflow_names() {
    let dir = tempdir().unwrap();
    let err = ManifestStore::for_project(dir.path()).load("../etc").unwrap_err();
    assert!(matches!(err, WorkflowError::Validation { .. }));
}
