use agentic_ledger::gate::{BypassRequest, GateResult, GateTarget};
use agentic_ledger::ledger::{
    AssumptionPayload, BlockerPayload, DecisionPayload, EntryKind, FeedbackPayload,
    IterationPayload, LedgerEntry, Severity,
};
use agentic_ledger::manifest::{Manifest, ManifestStore};
use agentic_ledger::orchestrator::HandoffRequest;
use agentic_ledger::project::Project;
use agentic_ledger::{GovernanceMode, Orchestrator, SessionState, WorkflowError};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `AGENTIC_LOG=debug`.
const LOG_ENV: &str = "AGENTIC_LOG";

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("AGENTIC_LEDGER_GIT_SHA"),
    ")"
);

#[derive(Parser)]
#[command(name = "agentic")]
#[command(about = "Workflow ledger and governance gates for multi-agent pipelines")]
#[command(version, long_version = LONG_VERSION)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Project root (defaults to current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a project bound to a workflow
    Init {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "planning")]
        workflow: String,
        /// strict, warn, or none (defaults to the workflow's enforcement mode)
        #[arg(long)]
        governance: Option<GovernanceMode>,
    },
    /// Load and validate a workflow manifest
    Validate {
        /// Workflow name (defaults to the project's workflow)
        workflow: Option<String>,
    },
    /// Activate an agent
    Activate {
        agent: String,
        /// Role requesting a checkpoint bypass
        #[arg(long, requires = "bypass_reason")]
        bypass_role: Option<String>,
        #[arg(long)]
        bypass_reason: Option<String>,
    },
    /// End the active session
    End {
        #[arg(long)]
        summary: Option<String>,
    },
    /// Hand off to another agent
    Handoff {
        #[arg(long)]
        to: String,
        /// Sending agent (defaults to the active agent)
        #[arg(long)]
        from: Option<String>,
        /// Artifact path relative to the project root (repeatable)
        #[arg(long = "artifact")]
        artifacts: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Record a decision
    Decision {
        #[arg(long)]
        title: String,
        #[arg(long)]
        rationale: String,
        #[arg(long = "impact")]
        impacts: Vec<String>,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Record feedback on an artifact or agent
    Feedback {
        #[arg(long)]
        target: String,
        #[arg(long)]
        summary: String,
        #[arg(long, default_value = "medium")]
        severity: Severity,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Record a blocker
    Blocker {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        /// Agent blocked until this is resolved (repeatable)
        #[arg(long = "blocks")]
        blocked_agents: Vec<String>,
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Resolve a blocker or a feedback entry
    Resolve {
        id: String,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Record an iteration
    Iteration {
        #[arg(long)]
        trigger: String,
        #[arg(long = "impacts")]
        impacted_agents: Vec<String>,
        #[arg(long)]
        version_bump: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Record an assumption
    Assumption {
        assumption: String,
        #[arg(long)]
        rationale: Option<String>,
        #[arg(long)]
        reversal: Option<String>,
        #[arg(long)]
        agent: Option<String>,
    },
    /// Move or list pipeline stages
    Stage {
        #[command(subcommand)]
        action: StageCommand,
    },
    /// Record any entry kind from key=value fields
    Record {
        kind: EntryKind,
        /// Fields as key=value; list values are comma-separated
        #[arg(value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    /// Evaluate a gate without recording anything
    Gate {
        #[command(subcommand)]
        target: GateCommand,
    },
    /// Show project status
    Status,
    /// List pending handoffs
    Pending {
        #[arg(long)]
        to: Option<String>,
    },
    /// List unresolved blockers
    Blockers {
        #[arg(long)]
        agent: Option<String>,
    },
    /// List feedback that has not been resolved
    OpenFeedback {
        #[arg(long)]
        target: Option<String>,
    },
    /// Show what is waiting on an agent
    Context { agent: String },
}

#[derive(Subcommand)]
enum StageCommand {
    /// Move the project to another stage
    Set {
        stage: String,
        /// Skip the forward-by-one ordering checks
        #[arg(long)]
        force: bool,
        #[arg(long)]
        agent: Option<String>,
    },
    /// List the workflow's stages, marking the current one
    List,
}

#[derive(Subcommand)]
enum GateCommand {
    /// Check whether an agent may be activated
    Activation { agent: String },
    /// Check whether a handoff would be accepted
    Handoff {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long = "artifact")]
        artifacts: Vec<String>,
    },
    /// Check whether a stage move would be accepted
    Stage { to: String },
}

fn parse_field(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn init_logging() {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV)
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    run(&root, cli.json, cli.command)
}

fn run(root: &Path, json: bool, command: Command) -> Result<()> {
    match command {
        Command::Init {
            name,
            workflow,
            governance,
        } => {
            let orchestrator = Orchestrator::init(root, &name, &workflow, governance)
                .with_context(|| format!("Failed to initialize project in {}", root.display()))?;
            let project = orchestrator.project();
            if json {
                return print_json(project.config());
            }
            println!(
                "Initialized project '{}' (workflow: {}, governance: {})",
                project.name(),
                project.workflow(),
                project.governance()
            );
            Ok(())
        }
        Command::Validate { workflow } => {
            let workflow = match workflow {
                Some(workflow) => workflow,
                None => Project::load(root)
                    .context("No workflow given and no project found; pass a workflow name")?
                    .workflow()
                    .to_string(),
            };
            let manifest = ManifestStore::for_project(root).load(&workflow)?;
            print_manifest_summary(&manifest, json)
        }
        command => {
            let orchestrator = Orchestrator::open(root)
                .with_context(|| format!("Failed to open project in {}", root.display()))?;
            let mut session = SessionState::load(root)?;
            dispatch(&orchestrator, &mut session, json, command)
        }
    }
}

fn dispatch(
    orchestrator: &Orchestrator,
    session: &mut SessionState,
    json: bool,
    command: Command,
) -> Result<()> {
    let entry = match command {
        Command::Init { .. } | Command::Validate { .. } => {
            bail!("command does not operate on an open project")
        }
        Command::Activate {
            agent,
            bypass_role,
            bypass_reason,
        } => {
            let bypass = bypass_role.map(|role| BypassRequest {
                role,
                reason: bypass_reason,
            });
            let activation = orchestrator.activate(session, &agent, bypass.as_ref())?;
            if json {
                return print_json(&activation);
            }
            print_violations(&activation.gate);
            if let Some(id) = &activation.gate.bypass {
                eprintln!("bypass recorded as {}", id);
            }
            activation.entry
        }
        Command::End { summary } => orchestrator.end(session, summary)?,
        Command::Handoff {
            to,
            from,
            artifacts,
            notes,
        } => {
            let record = orchestrator.handoff(
                session,
                HandoffRequest {
                    from,
                    to,
                    artifacts,
                    notes,
                },
            )?;
            if json {
                return print_json(&record);
            }
            print_violations(&record.gate);
            record.entry
        }
        Command::Decision {
            title,
            rationale,
            impacts,
            scope,
            agent,
        } => orchestrator.decision(
            session,
            agent.as_deref(),
            DecisionPayload {
                title,
                rationale,
                impacts,
                scope,
            },
        )?,
        Command::Feedback {
            target,
            summary,
            severity,
            agent,
        } => orchestrator.feedback(
            session,
            agent.as_deref(),
            FeedbackPayload {
                target,
                severity,
                summary,
            },
        )?,
        Command::Blocker {
            title,
            description,
            blocked_agents,
            action,
            agent,
        } => orchestrator.blocker(
            session,
            agent.as_deref(),
            BlockerPayload {
                title,
                description,
                blocked_agents,
                required_action: action,
            },
        )?,
        Command::Resolve { id, note, agent } => {
            orchestrator.resolve(session, agent.as_deref(), &id, note)?
        }
        Command::Iteration {
            trigger,
            impacted_agents,
            version_bump,
            description,
            agent,
        } => orchestrator.iteration(
            session,
            agent.as_deref(),
            IterationPayload {
                trigger,
                impacted_agents,
                version_bump,
                description,
            },
        )?,
        Command::Assumption {
            assumption,
            rationale,
            reversal,
            agent,
        } => orchestrator.assumption(
            session,
            agent.as_deref(),
            AssumptionPayload {
                assumption,
                rationale,
                reversal_condition: reversal,
            },
        )?,
        Command::Stage {
            action: StageCommand::Set {
                stage,
                force,
                agent,
            },
        } => {
            let transition = orchestrator.set_stage(session, agent.as_deref(), &stage, force)?;
            if json {
                return print_json(&transition);
            }
            print_violations(&transition.gate);
            transition.entry
        }
        Command::Stage {
            action: StageCommand::List,
        } => {
            let listing = orchestrator.query_stages()?;
            if json {
                return print_json(&listing);
            }
            print!("{}", listing);
            return Ok(());
        }
        Command::Record { kind, fields } => {
            let fields: BTreeMap<String, String> = fields.into_iter().collect();
            orchestrator.record_entry(session, kind, &fields)?
        }
        Command::Gate { target } => return run_gate(orchestrator, json, target),
        Command::Status => {
            let report = orchestrator.query_status(session)?;
            if json {
                return print_json(&report);
            }
            print!("{}", report);
            return Ok(());
        }
        Command::Pending { to } => {
            let pending = orchestrator.query_pending(to.as_deref())?;
            return print_entries(&pending, json, "No pending handoffs");
        }
        Command::Blockers { agent } => {
            let blockers = orchestrator.query_blockers(agent.as_deref())?;
            return print_entries(&blockers, json, "No unresolved blockers");
        }
        Command::OpenFeedback { target } => {
            let feedback = orchestrator.query_feedback(target.as_deref())?;
            return print_entries(&feedback, json, "No open feedback");
        }
        Command::Context { agent } => {
            let context = orchestrator.query_context(&agent)?;
            if json {
                return print_json(&context);
            }
            let sections = [
                ("Pending handoffs", &context.pending_handoffs),
                ("Open feedback", &context.open_feedback),
                ("Active blockers", &context.active_blockers),
                ("Recent sessions", &context.recent_sessions),
                ("Decisions", &context.decisions),
            ];
            for (title, entries) in sections {
                println!("{}:", title);
                print_entries(entries, false, "  none")?;
            }
            return Ok(());
        }
    };

    if json {
        return print_json(&entry);
    }
    println!("Recorded {}: {}", entry.id, entry.summary());
    Ok(())
}

fn run_gate(orchestrator: &Orchestrator, json: bool, command: GateCommand) -> Result<()> {
    let target = match command {
        GateCommand::Activation { agent } => GateTarget::Activation { agent },
        GateCommand::Handoff {
            from,
            to,
            artifacts,
        } => GateTarget::Handoff {
            from,
            to,
            artifacts,
        },
        GateCommand::Stage { to } => GateTarget::Stage { to },
    };
    let result = orchestrator.check_gate(&target)?;
    if json {
        print_json(&result)?;
    } else {
        let verdict = if result.allowed { "allowed" } else { "refused" };
        println!("{}: {} (mode: {})", target, verdict, result.mode);
        for violation in &result.violations {
            let tag = if violation.blocking { "blocking" } else { "warning" };
            println!("  [{}] {}", tag, violation);
        }
    }
    if !result.allowed {
        return Err(WorkflowError::GateViolation {
            target: target.to_string(),
            violations: result.messages(),
        }
        .into());
    }
    Ok(())
}

#[derive(Serialize)]
struct ManifestSummary<'a> {
    name: &'a str,
    version: Option<&'a str>,
    origin: &'a str,
    agents: usize,
    artifacts: usize,
    checkpoints: usize,
    order: &'a [String],
    warnings: &'a [String],
}

fn print_manifest_summary(manifest: &Manifest, json: bool) -> Result<()> {
    let summary = ManifestSummary {
        name: manifest.name(),
        version: manifest.version(),
        origin: manifest.origin(),
        agents: manifest.agents_of().len(),
        artifacts: manifest.artifacts_of().len(),
        checkpoints: manifest.checkpoints_of().len(),
        order: &manifest.pipeline().order,
        warnings: manifest.warnings(),
    };
    if json {
        return print_json(&summary);
    }
    println!("Workflow '{}' is valid ({})", summary.name, summary.origin);
    println!(
        "  {} agents, {} artifacts, {} checkpoints",
        summary.agents, summary.artifacts, summary.checkpoints
    );
    println!("  order: {}", summary.order.join(" → "));
    for warning in summary.warnings {
        println!("  warning: {}", warning);
    }
    Ok(())
}

fn print_violations(result: &GateResult) {
    for violation in &result.violations {
        eprintln!("warning: {}", violation);
    }
}

fn print_entries(entries: &[LedgerEntry], json: bool, empty: &str) -> Result<()> {
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("{}", empty);
    }
    for entry in entries {
        println!(
            "{:<10} {}  {:<6} {}",
            entry.id,
            entry.timestamp.format("%Y-%m-%d %H:%M"),
            entry.agent,
            entry.summary()
        );
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", rendered);
    Ok(())
}
