//! Append-only ledger persisted as two synchronized representations per
//! log category: a human-readable markdown log and a JSONL sidecar.
//!
//! - Ids are derived from the sidecar on every write (max suffix + 1).
//! - Writes hold an exclusive lock on `agent_log/ledger.lock` for the whole
//!   check, generate, append sequence; public reads hold a shared lock.
//! - Before every read and write each pair is checked: the human log's entry
//!   markers must list exactly the sidecar's ids in the same order. Any
//!   disagreement is a [`WorkflowError::LedgerDesync`]; nothing is repaired.

pub mod entry;
pub mod ids;
pub mod markdown;
pub mod query;

pub use entry::{
    AssumptionPayload, BlockerPayload, BypassPayload, DecisionPayload, EntryKind, EntryPayload,
    EntryStatus, FeedbackPayload, HandoffPayload, IterationPayload, LedgerEntry, LogCategory,
    NewEntry, SessionEvent, SessionPayload, Severity, StagePayload,
};
pub use query::{AgentContext, LedgerSnapshot};

use crate::errors::{Result, WorkflowError};
use crate::paths;
use chrono::Utc;
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Sole writer of a project's ledger files.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    root: PathBuf,
    project: String,
}

impl LedgerStore {
    pub fn new(root: &Path, project: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            project: project.to_string(),
        }
    }

    pub fn markdown_path(&self, category: LogCategory) -> PathBuf {
        paths::ledger_dir(&self.root).join(format!("{}.md", category.file_stem()))
    }

    pub fn sidecar_path(&self, category: LogCategory) -> PathBuf {
        paths::ledger_dir(&self.root).join(format!("{}.jsonl", category.file_stem()))
    }

    /// Appends an entry to both representations and returns it as stored.
    pub fn write(&self, new: NewEntry) -> Result<LedgerEntry> {
        let _lock = self.lock(true)?;
        let kind = new.payload.kind();
        let category = kind.category();
        let existing = self.read_checked(category)?;

        if let Some(target) = &new.corrects {
            let found = existing.iter().any(|e| &e.id == target && e.kind() == kind);
            if !found {
                return Err(WorkflowError::Validation {
                    context: format!("{} correction", kind),
                    violations: vec![format!("no {} entry with id {}", kind, target)],
                });
            }
        }

        let id = ids::next_id(
            kind,
            existing
                .iter()
                .filter(|e| e.kind() == kind)
                .map(|e| e.id.as_str()),
        );
        if existing.iter().any(|e| e.id == id) {
            return Err(WorkflowError::DuplicateId {
                id,
                log: category.file_stem().to_string(),
            });
        }

        let entry = LedgerEntry {
            id,
            timestamp: Utc::now(),
            project: self.project.clone(),
            agent: new.agent,
            status: new.status,
            corrects: new.corrects,
            payload: new.payload,
        };

        let markdown_path = self.markdown_path(category);
        let mut block = String::new();
        if file_is_empty(&markdown_path)? {
            block.push_str(&markdown::log_header(category, &self.project));
        }
        let rendered = markdown::render_block(&entry);
        ensure_single_block(&rendered, &entry, category.file_stem())?;
        block.push_str(&rendered);
        let line = serde_json::to_string(&entry)
            .map_err(|e| WorkflowError::parse(self.sidecar_path(category), e))?;

        append(&markdown_path, &block)?;
        append(&self.sidecar_path(category), &format!("{}\n", line))?;

        tracing::info!(id = %entry.id, kind = %kind, agent = %entry.agent, "recorded ledger entry");
        Ok(entry)
    }

    /// Both logs, integrity-checked, under a shared lock.
    pub fn snapshot(&self) -> Result<LedgerSnapshot> {
        let _lock = self.lock(false)?;
        Ok(LedgerSnapshot {
            exchange: self.read_checked(LogCategory::Exchange)?,
            context: self.read_checked(LogCategory::Context)?,
        })
    }

    pub fn entries(&self, kind: Option<EntryKind>) -> Result<Vec<LedgerEntry>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot
            .all()
            .filter(|e| kind.is_none_or(|k| e.kind() == k))
            .cloned()
            .collect())
    }

    pub fn entry(&self, id: &str) -> Result<Option<LedgerEntry>> {
        Ok(self.snapshot()?.entry(id).cloned())
    }

    pub fn get_active_session(&self) -> Result<Option<LedgerEntry>> {
        Ok(self.snapshot()?.active_session().cloned())
    }

    pub fn get_pending_handoffs(&self, target: Option<&str>) -> Result<Vec<LedgerEntry>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.pending_handoffs(target).into_iter().cloned().collect())
    }

    pub fn get_active_blockers(&self, agent: Option<&str>) -> Result<Vec<LedgerEntry>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.active_blockers(agent).into_iter().cloned().collect())
    }

    pub fn get_open_feedback(&self, target: Option<&str>) -> Result<Vec<LedgerEntry>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.open_feedback(target).into_iter().cloned().collect())
    }

    pub fn get_agent_context(&self, agent: &str) -> Result<AgentContext> {
        Ok(self.snapshot()?.agent_context(agent))
    }

    pub fn get_recent_activity(&self, limit: usize) -> Result<Vec<LedgerEntry>> {
        let snapshot = self.snapshot()?;
        Ok(snapshot.recent(limit).into_iter().cloned().collect())
    }

    fn lock(&self, exclusive: bool) -> Result<File> {
        let path = paths::ledger_lock_path(&self.root);
        paths::ensure_dir(&paths::ledger_dir(&self.root))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| WorkflowError::io("open", &path, e))?;
        let locked = if exclusive {
            file.lock_exclusive()
        } else {
            file.lock_shared()
        };
        locked.map_err(|e| WorkflowError::io("lock", &path, e))?;
        Ok(file)
    }

    /// Reads one category's sidecar and verifies it against the human log.
    /// Callers must already hold the lock.
    fn read_checked(&self, category: LogCategory) -> Result<Vec<LedgerEntry>> {
        let log = category.file_stem().to_string();
        let entries = self.read_sidecar(category)?;

        let markdown_path = self.markdown_path(category);
        let content = match std::fs::read_to_string(&markdown_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(WorkflowError::io("read", &markdown_path, e)),
        };
        let markers = markdown::scan_markers(&content).map_err(|detail| {
            WorkflowError::LedgerDesync {
                log: log.clone(),
                detail,
            }
        })?;

        ensure_unique(markers.iter().map(|m| m.id.as_str()), &log)?;
        ensure_unique(entries.iter().map(|e| e.id.as_str()), &log)?;

        for entry in &entries {
            if entry.kind().category() != category {
                return Err(WorkflowError::LedgerDesync {
                    log,
                    detail: format!("{} entry {} does not belong in this log", entry.kind(), entry.id),
                });
            }
        }

        if markers.len() != entries.len() {
            return Err(WorkflowError::LedgerDesync {
                log,
                detail: format!(
                    "human log has {} entries, sidecar has {}",
                    markers.len(),
                    entries.len()
                ),
            });
        }
        for (index, (marker, entry)) in markers.iter().zip(&entries).enumerate() {
            if marker.id != entry.id || marker.label != entry.kind().marker_label() {
                return Err(WorkflowError::LedgerDesync {
                    log,
                    detail: format!(
                        "entry #{} is {} in the human log but {} in the sidecar",
                        index + 1,
                        marker.id,
                        entry.id
                    ),
                });
            }
        }
        Ok(entries)
    }

    fn read_sidecar(&self, category: LogCategory) -> Result<Vec<LedgerEntry>> {
        let path = self.sidecar_path(category);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WorkflowError::io("open", &path, e)),
        };
        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| WorkflowError::io("read", &path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LedgerEntry = serde_json::from_str(&line)
                .map_err(|e| WorkflowError::parse(&path, format!("line {}: {}", index + 1, e)))?;
            entries.push(entry);
        }
        tracing::debug!(path = %path.display(), entries = entries.len(), "read sidecar");
        Ok(entries)
    }
}

fn ensure_unique<'a>(ids: impl Iterator<Item = &'a str>, log: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(WorkflowError::DuplicateId {
                id: id.to_string(),
                log: log.to_string(),
            });
        }
    }
    Ok(())
}

/// A rendered block must carry exactly its own START/END pair.
fn ensure_single_block(rendered: &str, entry: &LedgerEntry, log: &str) -> Result<()> {
    let markers = markdown::scan_markers(rendered).map_err(|detail| WorkflowError::LedgerDesync {
        log: log.to_string(),
        detail: format!("rendered block for {} is malformed: {}", entry.id, detail),
    })?;
    match markers.as_slice() {
        [only] if only.id == entry.id && only.label == entry.kind().marker_label() => Ok(()),
        _ => Err(WorkflowError::LedgerDesync {
            log: log.to_string(),
            detail: format!(
                "rendered block for {} has {} entry markers",
                entry.id,
                markers.len()
            ),
        }),
    }
}

fn file_is_empty(path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len() == 0),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(WorkflowError::io("stat", path, e)),
    }
}

fn append(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| WorkflowError::io("open", path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| WorkflowError::io("append to", path, e))?;
    file.flush().map_err(|e| WorkflowError::io("flush", path, e))?;
    file.sync_all().map_err(|e| WorkflowError::io("sync", path, e))?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/ledger_tests.rs"]
mod tests;
