//! Read-only projections over a consistent ledger snapshot.

use super::entry::{EntryKind, EntryPayload, EntryStatus, LedgerEntry, SessionEvent};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Sessions listed in an agent's context.
pub const CONTEXT_SESSION_LIMIT: usize = 3;

/// What an agent should look at when it starts work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentContext {
    pub agent: String,
    pub pending_handoffs: Vec<LedgerEntry>,
    pub open_feedback: Vec<LedgerEntry>,
    pub active_blockers: Vec<LedgerEntry>,
    /// Newest first.
    pub recent_sessions: Vec<LedgerEntry>,
    pub decisions: Vec<LedgerEntry>,
}

/// Both logs as read under one lock, in write order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSnapshot {
    pub exchange: Vec<LedgerEntry>,
    pub context: Vec<LedgerEntry>,
}

impl LedgerSnapshot {
    pub fn all(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.exchange.iter().chain(self.context.iter())
    }

    pub fn len(&self) -> usize {
        self.exchange.len() + self.context.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries of one kind in write order.
    pub fn of_kind(&self, kind: EntryKind) -> impl Iterator<Item = &LedgerEntry> {
        let log = match kind.category() {
            super::LogCategory::Exchange => &self.exchange,
            super::LogCategory::Context => &self.context,
        };
        log.iter().filter(move |e| e.kind() == kind)
    }

    pub fn entry(&self, id: &str) -> Option<&LedgerEntry> {
        self.all().find(|e| e.id == id)
    }

    /// Status from the latest correction naming `entry`, else its own.
    pub fn effective_status(&self, entry: &LedgerEntry) -> Option<EntryStatus> {
        self.of_kind(entry.kind())
            .filter(|e| e.corrects.as_deref() == Some(entry.id.as_str()))
            .filter_map(|e| e.status)
            .last()
            .or(entry.status)
    }

    /// The latest Session entry, when it is a start.
    pub fn active_session(&self) -> Option<&LedgerEntry> {
        self.of_kind(EntryKind::Session)
            .last()
            .filter(|e| e.as_session().is_some_and(|s| s.event == SessionEvent::Start))
    }

    /// Handoffs not yet accepted by an activation nor resolved by a correction.
    pub fn pending_handoffs(&self, target: Option<&str>) -> Vec<&LedgerEntry> {
        let accepted: HashSet<&str> = self
            .of_kind(EntryKind::Session)
            .filter_map(LedgerEntry::as_session)
            .flat_map(|s| s.accepted_handoffs.iter().map(String::as_str))
            .collect();
        self.of_kind(EntryKind::Handoff)
            .filter(|e| e.corrects.is_none())
            .filter(|e| !accepted.contains(e.id.as_str()))
            .filter(|e| self.effective_status(e) == Some(EntryStatus::Pending))
            .filter(|e| match (target, e.as_handoff()) {
                (Some(target), Some(handoff)) => handoff.to == target,
                _ => true,
            })
            .collect()
    }

    /// Unresolved blockers, optionally only those blocking `agent`.
    pub fn active_blockers(&self, agent: Option<&str>) -> Vec<&LedgerEntry> {
        self.of_kind(EntryKind::Blocker)
            .filter(|e| e.corrects.is_none())
            .filter(|e| self.effective_status(e) != Some(EntryStatus::Resolved))
            .filter(|e| match (agent, e.as_blocker()) {
                (Some(agent), Some(blocker)) => blocker.blocked_agents.iter().any(|a| a == agent),
                _ => true,
            })
            .collect()
    }

    /// Feedback still pending, optionally only feedback about `target`.
    pub fn open_feedback(&self, target: Option<&str>) -> Vec<&LedgerEntry> {
        self.of_kind(EntryKind::Feedback)
            .filter(|e| e.corrects.is_none())
            .filter(|e| self.effective_status(e) == Some(EntryStatus::Pending))
            .filter(|e| match (target, e.as_feedback()) {
                (Some(target), Some(feedback)) => feedback.target == target,
                _ => true,
            })
            .collect()
    }

    /// The stage named by the latest Stage entry or staged Session start.
    pub fn current_stage(&self) -> Option<&str> {
        self.context.iter().rev().find_map(|e| match &e.payload {
            EntryPayload::Stage(stage) => Some(stage.to.as_str()),
            EntryPayload::Session(session) if session.event == SessionEvent::Start => {
                session.stage.as_deref()
            }
            _ => None,
        })
    }

    pub fn agent_context(&self, agent: &str) -> AgentContext {
        let owned = |entries: Vec<&LedgerEntry>| -> Vec<LedgerEntry> {
            entries.into_iter().cloned().collect()
        };
        let mut sessions: Vec<LedgerEntry> = self
            .of_kind(EntryKind::Session)
            .filter(|e| e.agent == agent)
            .cloned()
            .collect();
        sessions.reverse();
        sessions.truncate(CONTEXT_SESSION_LIMIT);
        AgentContext {
            agent: agent.to_string(),
            pending_handoffs: owned(self.pending_handoffs(Some(agent))),
            open_feedback: owned(self.open_feedback(Some(agent))),
            active_blockers: owned(self.active_blockers(Some(agent))),
            recent_sessions: sessions,
            decisions: self
                .of_kind(EntryKind::Decision)
                .filter(|e| e.agent == agent && e.corrects.is_none())
                .cloned()
                .collect(),
        }
    }

    /// Handoffs to `to` ever recorded, regardless of acceptance.
    pub fn handoffs_to<'a>(&'a self, to: &'a str) -> impl Iterator<Item = &'a LedgerEntry> + 'a {
        self.of_kind(EntryKind::Handoff)
            .filter(move |e| e.as_handoff().is_some_and(|h| h.to == to))
    }

    /// Newest first, merged across both logs by timestamp then id.
    pub fn recent(&self, limit: usize) -> Vec<&LedgerEntry> {
        let mut merged: Vec<&LedgerEntry> = self.all().collect();
        merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        merged.into_iter().rev().take(limit).collect()
    }

    pub fn counts(&self) -> BTreeMap<EntryKind, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.all() {
            *counts.entry(entry.kind()).or_insert(0) += 1;
        }
        counts
    }
}
