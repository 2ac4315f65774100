//! Human-readable ledger log: one marked block per entry.
//!
//! Blocks are wrapped in `<!-- ENTRY:<KIND>:<ID>:START -->` and
//! `<!-- ENTRY:<KIND>:<ID>:END -->`. The markers are the only part of the
//! file read back; everything between them is for people. Free text never
//! contains a raw `<!--`, so it cannot be mistaken for a marker.

use super::entry::{EntryPayload, LedgerEntry, LogCategory, SessionEvent};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::OnceLock;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const COMMENT_OPEN: &str = "<!--";
const COMMENT_OPEN_ESCAPED: &str = "&lt;!--";

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<!-- ENTRY:([A-Z_]+):([A-Z]+-[0-9]+):(START|END) -->").expect("marker pattern")
    })
}

/// A START marker read back from a human log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRef {
    pub label: String,
    pub id: String,
}

pub fn log_header(category: LogCategory, project: &str) -> String {
    format!(
        "# {}\n\nProject: {}\n\nAppend-only. Corrections are new entries that reference the original id.\n\n",
        category.title(),
        escape(project)
    )
}

/// Extracts START markers in file order. Fails on a block that is never
/// closed, closed twice, or closed out of order.
pub fn scan_markers(content: &str) -> Result<Vec<MarkerRef>, String> {
    let mut markers = Vec::new();
    let mut open: Option<MarkerRef> = None;
    for caps in marker_pattern().captures_iter(content) {
        let marker = MarkerRef {
            label: caps[1].to_string(),
            id: caps[2].to_string(),
        };
        match &caps[3] {
            "START" => {
                if let Some(unclosed) = open.take() {
                    return Err(format!("entry {} has no END marker", unclosed.id));
                }
                open = Some(marker);
            }
            _ => match open.take() {
                Some(started) if started == marker => markers.push(started),
                Some(started) => {
                    return Err(format!(
                        "END marker for {} closes entry {}",
                        marker.id, started.id
                    ))
                }
                None => return Err(format!("END marker for {} without a START", marker.id)),
            },
        }
    }
    match open {
        Some(unclosed) => Err(format!("entry {} has no END marker", unclosed.id)),
        None => Ok(markers),
    }
}

pub fn render_block(entry: &LedgerEntry) -> String {
    let label = entry.kind().marker_label();
    let mut out = String::new();
    let _ = writeln!(out, "<!-- ENTRY:{}:{}:START -->", label, entry.id);
    let _ = writeln!(out, "### {}: {}", entry.id, escape(&entry.summary()));
    let _ = writeln!(out);
    let _ = writeln!(out, "| Field | Value |");
    let _ = writeln!(out, "|-------|-------|");
    row(&mut out, "Timestamp", &entry.timestamp.format(TIMESTAMP_FORMAT).to_string());
    row(&mut out, "Agent", &entry.agent);
    if let Some(status) = entry.status {
        row(&mut out, "Status", &status.to_string());
    }
    if let Some(corrects) = &entry.corrects {
        row(&mut out, "Corrects", corrects);
    }

    match &entry.payload {
        EntryPayload::Handoff(h) => {
            row(&mut out, "From", &h.from);
            row(&mut out, "To", &h.to);
            section(&mut out, "Artifacts", &bullets(&h.artifacts));
            section(&mut out, "Notes", h.notes.as_deref().unwrap_or("(none provided)"));
        }
        EntryPayload::Decision(d) => {
            row(&mut out, "Scope", d.scope.as_deref().unwrap_or("(unspecified)"));
            section(&mut out, "Rationale", &d.rationale);
            section(&mut out, "Impacts", &bullets(&d.impacts));
        }
        EntryPayload::Feedback(f) => {
            row(&mut out, "Target", &f.target);
            row(&mut out, "Severity", &f.severity.to_string());
            section(&mut out, "Summary", &f.summary);
        }
        EntryPayload::Blocker(b) => {
            row(&mut out, "Blocked Agents", &inline_list(&b.blocked_agents));
            section(&mut out, "Description", &b.description);
            section(
                &mut out,
                "Required Action",
                b.required_action.as_deref().unwrap_or("(none specified)"),
            );
        }
        EntryPayload::Iteration(i) => {
            row(&mut out, "Impacted Agents", &inline_list(&i.impacted_agents));
            row(&mut out, "Version Bump", i.version_bump.as_deref().unwrap_or("(none)"));
            section(&mut out, "Description", i.description.as_deref().unwrap_or("(none provided)"));
        }
        EntryPayload::Assumption(a) => {
            section(&mut out, "Assumption", &a.assumption);
            section(&mut out, "Rationale", a.rationale.as_deref().unwrap_or("(none provided)"));
            section(
                &mut out,
                "Reversal Condition",
                a.reversal_condition.as_deref().unwrap_or("(none specified)"),
            );
        }
        EntryPayload::Session(s) => {
            let event = match s.event {
                SessionEvent::Start => "start",
                SessionEvent::End => "end",
            };
            row(&mut out, "Event", event);
            row(&mut out, "Stage", s.stage.as_deref().unwrap_or("(none)"));
            if !s.accepted_handoffs.is_empty() {
                row(&mut out, "Accepted Handoffs", &inline_list(&s.accepted_handoffs));
            }
            if let Some(secs) = s.duration_secs {
                row(&mut out, "Duration", &format!("{}s", secs));
            }
            if let Some(summary) = &s.summary {
                section(&mut out, "Summary", summary);
            }
        }
        EntryPayload::Bypass(b) => {
            row(&mut out, "Target", &b.target);
            row(&mut out, "Checkpoint", &b.checkpoint);
            row(&mut out, "Role", &b.role);
            section(&mut out, "Reason", b.reason.as_deref().unwrap_or("(none given)"));
        }
        EntryPayload::Stage(s) => {
            row(&mut out, "From", s.from.as_deref().unwrap_or("(none)"));
            row(&mut out, "To", &s.to);
            row(&mut out, "Forced", if s.forced { "yes" } else { "no" });
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "<!-- ENTRY:{}:{}:END -->", label, entry.id);
    let _ = writeln!(out);
    out
}

/// Neutralizes comment openers so user text cannot forge an entry marker.
pub fn escape(text: &str) -> String {
    text.replace(COMMENT_OPEN, COMMENT_OPEN_ESCAPED)
}

fn row(out: &mut String, field: &str, value: &str) {
    let _ = writeln!(out, "| **{}** | {} |", field, escape(value).replace('|', "\\|"));
}

fn section(out: &mut String, title: &str, body: &str) {
    let _ = write!(out, "\n**{}:**\n{}\n", title, escape(body));
}

fn bullets(items: &[String]) -> String {
    if items.is_empty() {
        return "- (none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- `{}`", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn inline_list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}
