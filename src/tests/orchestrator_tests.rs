use super::*;
use crate::test_support::{
    pair_project, write_workflow, PAIR_AGENTS, PAIR_ARTIFACTS, PAIR_INSTRUCTIONS,
};
use std::fs;
use tempfile::TempDir;

fn open(mode: GovernanceMode) -> (TempDir, Orchestrator) {
    let (dir, _project) = pair_project(mode);
    let orchestrator = Orchestrator::open(dir.path()).unwrap();
    (dir, orchestrator)
}

fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn handoff_to(to: &str, artifacts: &[&str]) -> HandoffRequest {
    HandoffRequest {
        from: None,
        to: to.to_string(),
        artifacts: artifacts.iter().map(|a| a.to_string()).collect(),
        notes: None,
    }
}

#[test]
fn test_activation_requires_predecessor_handoff_in_strict_mode() {
    let (dir, orchestrator) = open(GovernanceMode::Strict);
    let mut session = SessionState::Idle;

    orchestrator.activate(&mut session, "A-01", None).unwrap();
    orchestrator.end(&mut session, None).unwrap();

    let err = orchestrator
        .activate(&mut session, "A-02", None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::GateViolation { .. }));
    assert_eq!(err.violations(), ["missing predecessor handoff A-01→A-02"]);
    assert_eq!(session, SessionState::Idle);
    assert_eq!(SessionState::load(dir.path()).unwrap(), SessionState::Idle);
}

#[test]
fn test_warn_mode_activates_with_violations() {
    let (_dir, orchestrator) = open(GovernanceMode::Warn);
    let mut session = SessionState::Idle;
    let activation = orchestrator.activate(&mut session, "A-02", None).unwrap();
    assert!(activation.gate.allowed);
    assert_eq!(activation.gate.violations.len(), 1);
    assert_eq!(session.active_agent(), Some("A-02"));
}

#[test]
fn test_handoff_with_missing_artifact_fails_in_every_mode() {
    for mode in [GovernanceMode::Strict, GovernanceMode::Warn, GovernanceMode::None] {
        let (_dir, orchestrator) = open(mode);
        let mut session = SessionState::Idle;
        orchestrator.activate(&mut session, "A-01", None).unwrap();

        let err = orchestrator
            .handoff(&session, handoff_to("A-02", &["spec.md"]))
            .unwrap_err();
        match err {
            WorkflowError::MissingArtifact { paths } => assert_eq!(paths, vec!["spec.md"]),
            other => panic!("mode {}: expected MissingArtifact, got {:?}", mode, other),
        }
        assert!(orchestrator.query_pending(None).unwrap().is_empty());
    }
}

#[test]
fn test_end_without_session_then_activate_and_end() {
    let (dir, orchestrator) = open(GovernanceMode::Strict);
    let mut session = SessionState::load(dir.path()).unwrap();

    let err = orchestrator.end(&mut session, None).unwrap_err();
    assert!(matches!(err, WorkflowError::NoActiveSession));

    let activation = orchestrator.activate(&mut session, "A-01", None).unwrap();
    assert_eq!(activation.entry.id, "SESS-001");
    assert!(SessionState::load(dir.path()).unwrap().is_active());

    let ended = orchestrator
        .end(&mut session, Some("brief drafted".to_string()))
        .unwrap();
    assert_eq!(ended.id, "SESS-002");
    let payload = ended.as_session().unwrap();
    assert_eq!(payload.event, SessionEvent::End);
    assert!(payload.duration_secs.is_some());
    assert_eq!(payload.summary.as_deref(), Some("brief drafted"));

    assert_eq!(session, SessionState::Idle);
    assert_eq!(SessionState::load(dir.path()).unwrap(), SessionState::Idle);
    assert!(orchestrator.ledger().get_active_session().unwrap().is_none());
}

#[test]
fn test_second_activation_while_active_is_refused() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let mut session = SessionState::Idle;
    orchestrator.activate(&mut session, "A-01", None).unwrap();
    let err = orchestrator
        .activate(&mut session, "A-01", None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::SessionAlreadyActive { ref agent } if agent == "A-01"));
}

#[test]
fn test_unknown_agent_cannot_activate() {
    let (_dir, orchestrator) = open(GovernanceMode::None);
    let mut session = SessionState::Idle;
    let err = orchestrator
        .activate(&mut session, "B-77", None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownAgent { .. }));
}

#[test]
fn test_full_pipeline_pass_accepts_pending_handoff() {
    let (dir, orchestrator) = open(GovernanceMode::Strict);
    let mut session = SessionState::Idle;

    orchestrator.activate(&mut session, "A-01", None).unwrap();
    fs::write(dir.path().join("spec.md"), "# Spec").unwrap();
    let record = orchestrator
        .handoff(&session, handoff_to("A-02", &["spec.md"]))
        .unwrap();
    assert_eq!(record.entry.id, "HO-001");
    assert_eq!(record.entry.agent, "A-01");
    orchestrator.end(&mut session, None).unwrap();

    let pending = orchestrator.query_pending(Some("A-02")).unwrap();
    assert_eq!(pending.len(), 1);

    let activation = orchestrator.activate(&mut session, "A-02", None).unwrap();
    let start = activation.entry.as_session().unwrap();
    assert_eq!(start.accepted_handoffs, vec!["HO-001"]);
    assert!(orchestrator.query_pending(None).unwrap().is_empty());
}

#[test]
fn test_record_entry_uses_active_agent() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let mut session = SessionState::Idle;
    orchestrator.activate(&mut session, "A-01", None).unwrap();

    for title in ["Use YAML", "Pin versions", "Split logs"] {
        orchestrator
            .record_entry(
                &session,
                EntryKind::Decision,
                &fields(&[("title", title), ("rationale", "Team agreed"), ("impacts", "A-02, A-01")]),
            )
            .unwrap();
    }
    let decisions = orchestrator
        .ledger()
        .entries(Some(EntryKind::Decision))
        .unwrap();
    let ids: Vec<&str> = decisions.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["DEC-001", "DEC-002", "DEC-003"]);
    assert!(decisions.iter().all(|e| e.agent == "A-01"));
    match &decisions[0].payload {
        EntryPayload::Decision(d) => assert_eq!(d.impacts, vec!["A-02", "A-01"]),
        other => panic!("expected decision, got {:?}", other),
    }
}

#[test]
fn test_record_entry_reports_missing_field() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let err = orchestrator
        .record_entry(
            &SessionState::Idle,
            EntryKind::Decision,
            &fields(&[("agent", "A-01"), ("title", "Use YAML")]),
        )
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Validation { .. }));
    assert_eq!(err.violations(), ["missing required field 'rationale'"]);
}

#[test]
fn test_record_entry_rejects_unknown_fields_and_kinds() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let session = SessionState::Idle;

    let err = orchestrator
        .record_entry(
            &session,
            EntryKind::Assumption,
            &fields(&[("agent", "A-01"), ("assumption", "x"), ("colour", "blue")]),
        )
        .unwrap_err();
    assert!(err.violations()[0].contains("unknown field 'colour'"));

    let err = orchestrator
        .record_entry(&session, EntryKind::Session, &fields(&[]))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Validation { .. }));
}

#[test]
fn test_record_entry_without_agent_or_session() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let err = orchestrator
        .record_entry(
            &SessionState::Idle,
            EntryKind::Assumption,
            &fields(&[("assumption", "Users have git installed")]),
        )
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NoActiveSession));
}

#[test]
fn test_feedback_severity_defaults_and_validates() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let session = SessionState::Idle;
    let entry = orchestrator
        .record_entry(
            &session,
            EntryKind::Feedback,
            &fields(&[("agent", "A-02"), ("target", "spec.md"), ("summary", "Unclear scope")]),
        )
        .unwrap();
    assert_eq!(entry.id, "FB-001");
    assert_eq!(entry.status, Some(EntryStatus::Pending));

    let err = orchestrator
        .record_entry(
            &session,
            EntryKind::Feedback,
            &fields(&[
                ("agent", "A-02"),
                ("target", "spec.md"),
                ("summary", "x"),
                ("severity", "urgent"),
            ]),
        )
        .unwrap_err();
    assert!(err.violations()[0].contains("invalid severity 'urgent'"));
}

#[test]
fn test_blocker_gates_activation_until_resolved() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let mut session = SessionState::Idle;
    let blocker = orchestrator
        .record_entry(
            &session,
            EntryKind::Blocker,
            &fields(&[
                ("agent", "A-02"),
                ("title", "Licence review"),
                ("description", "Waiting on legal"),
                ("blocked_agents", "A-01"),
            ]),
        )
        .unwrap();
    assert_eq!(blocker.id, "BLK-001");
    assert_eq!(orchestrator.query_blockers(Some("A-01")).unwrap().len(), 1);

    let err = orchestrator
        .activate(&mut session, "A-01", None)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::GateViolation { .. }));

    let resolved = orchestrator
        .resolve(&session, Some("A-02"), "BLK-001", Some("Approved".to_string()))
        .unwrap();
    assert_eq!(resolved.id, "BLK-002");
    assert_eq!(resolved.corrects.as_deref(), Some("BLK-001"));
    assert!(orchestrator.query_blockers(None).unwrap().is_empty());
    orchestrator.activate(&mut session, "A-01", None).unwrap();

    let err = orchestrator
        .resolve(&session, None, "BLK-001", None)
        .unwrap_err();
    assert_eq!(err.violations(), ["blocker BLK-001 is already resolved"]);
}

#[test]
fn test_feedback_is_resolved_by_correction() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let session = SessionState::Idle;
    for summary in ["Unclear scope", "No error cases"] {
        orchestrator
            .feedback(
                &session,
                Some("A-02"),
                FeedbackPayload {
                    target: "A-01".to_string(),
                    severity: Severity::High,
                    summary: summary.to_string(),
                },
            )
            .unwrap();
    }
    assert_eq!(orchestrator.query_feedback(Some("A-01")).unwrap().len(), 2);
    assert!(orchestrator.query_feedback(Some("A-02")).unwrap().is_empty());

    let resolved = orchestrator
        .resolve(&session, Some("A-01"), "FB-001", Some("Scope section added".to_string()))
        .unwrap();
    assert_eq!(resolved.id, "FB-003");
    assert_eq!(resolved.corrects.as_deref(), Some("FB-001"));
    assert_eq!(resolved.status, Some(EntryStatus::Resolved));
    match &resolved.payload {
        EntryPayload::Feedback(f) => {
            assert_eq!(f.summary, "Scope section added");
            assert_eq!(f.severity, Severity::High);
        }
        other => panic!("expected feedback, got {:?}", other),
    }

    let open: Vec<String> = orchestrator
        .query_feedback(None)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(open, ["FB-002"]);
    assert_eq!(orchestrator.query_status(&session).unwrap().open_feedback, 1);
}

#[test]
fn test_resolve_rejects_kinds_without_status() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let session = SessionState::Idle;
    orchestrator
        .record_entry(
            &session,
            EntryKind::Decision,
            &fields(&[("agent", "A-01"), ("title", "Use YAML"), ("rationale", "Readable")]),
        )
        .unwrap();
    let err = orchestrator
        .resolve(&session, Some("A-01"), "DEC-001", None)
        .unwrap_err();
    assert_eq!(err.violations(), ["no blocker or feedback with id DEC-001"]);
}

#[test]
fn test_agent_context_gathers_what_waits_on_the_agent() {
    let (dir, orchestrator) = open(GovernanceMode::Warn);
    let mut session = SessionState::Idle;
    orchestrator.activate(&mut session, "A-01", None).unwrap();
    fs::write(dir.path().join("spec.md"), "# Spec").unwrap();
    orchestrator
        .handoff(&session, handoff_to("A-02", &["spec.md"]))
        .unwrap();
    orchestrator
        .decision(
            &session,
            None,
            DecisionPayload {
                title: "Use YAML".to_string(),
                rationale: "Readable".to_string(),
                impacts: vec![],
                scope: None,
            },
        )
        .unwrap();
    orchestrator
        .record_entry(
            &session,
            EntryKind::Feedback,
            &fields(&[("target", "A-02"), ("summary", "Check the limits table")]),
        )
        .unwrap();
    orchestrator
        .record_entry(
            &session,
            EntryKind::Blocker,
            &fields(&[("title", "Licence"), ("description", "Waiting"), ("blocked_agents", "A-02")]),
        )
        .unwrap();
    orchestrator.end(&mut session, None).unwrap();

    let context = orchestrator.query_context("A-02").unwrap();
    assert_eq!(context.agent, "A-02");
    assert_eq!(context.pending_handoffs.len(), 1);
    assert_eq!(context.open_feedback.len(), 1);
    assert_eq!(context.active_blockers.len(), 1);
    assert!(context.decisions.is_empty());

    let mine = orchestrator.query_context("A-01").unwrap();
    assert_eq!(mine.decisions.len(), 1);
    let sessions: Vec<&str> = mine.recent_sessions.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(sessions, ["SESS-002", "SESS-001"]);

    let err = orchestrator.query_context("Z-99").unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownAgent { .. }));
}

#[test]
fn test_marker_text_in_rationale_does_not_break_later_operations() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let mut session = SessionState::Idle;
    orchestrator.activate(&mut session, "A-01", None).unwrap();
    let entry = orchestrator
        .decision(
            &session,
            None,
            DecisionPayload {
                title: "Close out".to_string(),
                rationale: "Blocks end with <!-- ENTRY:DECISION:DEC-001:END -->".to_string(),
                impacts: vec![],
                scope: None,
            },
        )
        .unwrap();
    assert_eq!(entry.id, "DEC-001");

    orchestrator.query_status(&session).unwrap();
    let ended = orchestrator.end(&mut session, None).unwrap();
    assert_eq!(ended.id, "SESS-002");
}

#[test]
fn test_handoff_to_unknown_agent_fails_in_none_mode() {
    let (_dir, orchestrator) = open(GovernanceMode::None);
    let mut session = SessionState::Idle;
    orchestrator.activate(&mut session, "A-01", None).unwrap();
    let err = orchestrator
        .handoff(&session, handoff_to("Z-99", &[]))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownAgent { ref agent, .. } if agent == "Z-99"));
    assert!(orchestrator.query_pending(None).unwrap().is_empty());
}

#[test]
fn test_handoff_artifact_outside_project_is_refused() {
    let (_dir, orchestrator) = open(GovernanceMode::None);
    let mut session = SessionState::Idle;
    orchestrator.activate(&mut session, "A-01", None).unwrap();
    let err = orchestrator
        .handoff(&session, handoff_to("A-02", &["/etc/hosts"]))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::GateViolation { .. }));
    assert_eq!(err.violations(), ["handoff artifact '/etc/hosts' is outside the project"]);
    assert!(orchestrator.query_pending(None).unwrap().is_empty());
}

#[test]
fn test_blocker_naming_unknown_agent_is_rejected() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let err = orchestrator
        .blocker(
            &SessionState::Idle,
            Some("A-01"),
            BlockerPayload {
                title: "t".to_string(),
                description: "d".to_string(),
                blocked_agents: vec!["Q-99".to_string()],
                required_action: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownAgent { .. }));
}

#[test]
fn test_query_status_is_idempotent() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let mut session = SessionState::Idle;
    orchestrator.activate(&mut session, "A-01", None).unwrap();
    orchestrator
        .record_entry(
            &session,
            EntryKind::Iteration,
            &fields(&[("trigger", "Scope change"), ("impacted_agents", "A-01,A-02")]),
        )
        .unwrap();

    let first = orchestrator.query_status(&session).unwrap();
    let second = orchestrator.query_status(&session).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.session.active_agent(), Some("A-01"));
    assert_eq!(first.recent.len(), 2);
}

#[test]
fn test_check_gate_does_not_write() {
    let (_dir, orchestrator) = open(GovernanceMode::Strict);
    let result = orchestrator
        .check_gate(&GateTarget::Activation {
            agent: "A-02".to_string(),
        })
        .unwrap();
    assert!(!result.allowed);
    assert!(orchestrator.ledger().snapshot().unwrap().is_empty());
}

#[test]
fn test_init_falls_back_to_workflow_enforcement_mode() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = "\nname: relaxed\npipeline:\n  order: [A-01, A-02]\nconfig:\n  enforcement:\n    mode: warn\n";
    write_workflow(
        dir.path(),
        "relaxed",
        PAIR_AGENTS,
        PAIR_ARTIFACTS,
        PAIR_INSTRUCTIONS,
        workflow,
    );
    let orchestrator = Orchestrator::init(dir.path(), "demo", "relaxed", None).unwrap();
    assert_eq!(orchestrator.project().governance(), GovernanceMode::Warn);

    let reopened = Orchestrator::open(dir.path()).unwrap();
    assert_eq!(reopened.manifest().name(), "relaxed");
}

#[test]
fn test_init_with_bundled_workflow_sets_stage_on_activation() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::init(dir.path(), "demo", "planning", None).unwrap();
    assert_eq!(orchestrator.project().governance(), GovernanceMode::Strict);

    let mut session = SessionState::Idle;
    orchestrator.activate(&mut session, "A-01", None).unwrap();
    assert_eq!(session.stage(), Some("discovery"));
}

fn planning(mode: GovernanceMode) -> (TempDir, Orchestrator) {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::init(dir.path(), "demo", "planning", Some(mode)).unwrap();
    (dir, orchestrator)
}

#[test]
fn test_stage_moves_forward_one_step_in_strict_mode() {
    let (dir, orchestrator) = planning(GovernanceMode::Strict);
    let mut session = SessionState::Idle;
    orchestrator.activate(&mut session, "A-01", None).unwrap();

    let err = orchestrator
        .set_stage(&mut session, None, "delivery", false)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::GateViolation { .. }));
    assert_eq!(
        err.violations(),
        ["stage discovery → delivery skips design (next allowed: design)"]
    );

    let moved = orchestrator
        .set_stage(&mut session, None, "design", false)
        .unwrap();
    assert_eq!(moved.entry.id, "STG-001");
    let payload = moved.entry.as_stage().unwrap();
    assert_eq!(payload.from.as_deref(), Some("discovery"));
    assert!(!payload.forced);
    assert_eq!(session.stage(), Some("design"));
    assert_eq!(SessionState::load(dir.path()).unwrap().stage(), Some("design"));

    let err = orchestrator
        .set_stage(&mut session, None, "discovery", false)
        .unwrap_err();
    assert_eq!(err.violations(), ["cannot move back from stage design to discovery"]);
    assert_eq!(orchestrator.ledger().entries(Some(EntryKind::Stage)).unwrap().len(), 1);
}

#[test]
fn test_forced_stage_move_skips_ordering_checks() {
    let (_dir, orchestrator) = planning(GovernanceMode::Strict);
    let mut session = SessionState::Idle;
    orchestrator.activate(&mut session, "A-01", None).unwrap();

    let moved = orchestrator
        .set_stage(&mut session, None, "delivery", true)
        .unwrap();
    assert!(moved.gate.violations.is_empty());
    assert!(moved.entry.as_stage().unwrap().forced);
    assert!(moved.entry.summary().ends_with("(forced)"));

    let err = orchestrator
        .set_stage(&mut session, None, "shipping", true)
        .unwrap_err();
    assert_eq!(
        err.violations(),
        ["unknown stage shipping (declared: discovery, design, delivery)"]
    );
}

#[test]
fn test_warn_mode_stage_skip_is_recorded_with_violation() {
    let (_dir, orchestrator) = planning(GovernanceMode::Warn);
    let mut session = SessionState::Idle;
    orchestrator
        .set_stage(&mut session, Some("A-01"), "discovery", false)
        .unwrap();

    let moved = orchestrator
        .set_stage(&mut session, Some("A-01"), "delivery", false)
        .unwrap();
    assert!(moved.gate.allowed);
    assert_eq!(moved.gate.violations.len(), 1);
    assert!(!moved.gate.violations[0].blocking);
    assert_eq!(session, SessionState::Idle);

    let listing = orchestrator.query_stages().unwrap();
    assert_eq!(listing.current.as_deref(), Some("delivery"));
    assert_eq!(
        orchestrator.query_status(&session).unwrap().stage.as_deref(),
        Some("delivery")
    );
}

#[test]
fn test_stage_move_needs_an_agent() {
    let (_dir, orchestrator) = planning(GovernanceMode::None);
    let mut session = SessionState::Idle;
    let err = orchestrator
        .set_stage(&mut session, None, "design", false)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NoActiveSession));
}

#[test]
fn test_init_with_unknown_workflow_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let err = Orchestrator::init(dir.path(), "demo", "no_such_flow", None).unwrap_err();
    assert!(matches!(err, WorkflowError::ManifestNotFound { .. }));
    assert!(!crate::paths::project_config_path(dir.path()).exists());
}

#[test]
fn test_open_without_project() {
    let dir = tempfile::tempdir().unwrap();
    let err = Orchestrator::open(dir.path()).err().unwrap();
    assert!(matches!(err, WorkflowError::ProjectNotFound { .. }));
}
