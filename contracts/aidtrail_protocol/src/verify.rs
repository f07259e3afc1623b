//! # Verification and trail queries
//!
//! Both operate on a snapshot of the ledger taken by the caller; neither holds
//! any lock while it runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::events::LedgerAction;
use crate::ledger::{LedgerEntry, GENESIS_HASH};
use crate::participants::participants;
use crate::types::Role;

// ─────────────────────────────────────────────────────────
// Chain verification
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_bad_sequence: Option<u64>,
    /// Entries that verified before the walk stopped.
    pub entries_checked: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_hash: Option<String>,
}

/// Walk `entries` from sequence 0 and return the first position whose
/// sequence, back-link, header or recomputed hash disagrees with what is
/// stored.
pub fn verify_entries(entries: &[LedgerEntry]) -> ChainReport {
    let mut expected_prev = GENESIS_HASH;
    for (index, entry) in entries.iter().enumerate() {
        let position = index as u64;
        let intact = entry.sequence == position
            && entry.prev_hash == expected_prev
            && entry.header_matches()
            && entry
                .recompute_hash()
                .map(|h| h == entry.hash)
                .unwrap_or(false);
        if !intact {
            return ChainReport {
                ok: false,
                first_bad_sequence: Some(position),
                entries_checked: position,
                head_hash: None,
            };
        }
        expected_prev = &entry.hash;
    }
    ChainReport {
        ok: true,
        first_bad_sequence: None,
        entries_checked: entries.len() as u64,
        head_hash: entries.last().map(|e| e.hash.clone()),
    }
}

// ─────────────────────────────────────────────────────────
// Trail queries
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailFilter {
    /// Case-insensitive substring of `reference_id`, `entity_name`, `action`
    /// or `hash`.
    #[serde(default)]
    pub text: Option<String>,
    /// Name of a party the entry must concern.
    #[serde(default)]
    pub participant: Option<String>,
    /// Restrict the participant match to one role.
    #[serde(default)]
    pub participant_role: Option<Role>,
    #[serde(default)]
    pub action: Option<LedgerAction>,
    #[serde(default)]
    pub order: TrailOrder,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TrailFilter {
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn participant(mut self, name: impl Into<String>) -> Self {
        self.participant = Some(name.into());
        self
    }

    pub fn participant_role(mut self, role: Role) -> Self {
        self.participant_role = Some(role);
        self
    }

    pub fn action(mut self, action: LedgerAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.order = TrailOrder::OldestFirst;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }

        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let needle = text.to_lowercase();
            let hit = [
                entry.reference_id.as_str(),
                entry.entity_name.as_str(),
                entry.action.as_str(),
                entry.hash.as_str(),
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }

        if let Some(name) = self.participant.as_deref().filter(|n| !n.trim().is_empty()) {
            let concerned = participants(entry).iter().any(|p| {
                p.is_named(name) && self.participant_role.map_or(true, |r| p.role == r)
            });
            if !concerned {
                return false;
            }
        }

        true
    }
}

/// Matching entries, newest first unless the filter says otherwise.
pub fn query_trail(entries: &[LedgerEntry], filter: &TrailFilter) -> Vec<LedgerEntry> {
    let matching = entries.iter().filter(|e| filter.matches(e));
    let limit = filter.limit.unwrap_or(usize::MAX);
    match filter.order {
        TrailOrder::NewestFirst => matching.rev().take(limit).cloned().collect(),
        TrailOrder::OldestFirst => matching.take(limit).cloned().collect(),
    }
}

// ─────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_entries: u64,
    pub last_hash: Option<String>,
    pub counts_by_action: BTreeMap<String, u64>,
    /// Sequence at which an unresolved integrity fault was detected.
    pub integrity_fault: Option<u64>,
}

pub fn ledger_stats(entries: &[LedgerEntry], integrity_fault: Option<u64>) -> LedgerStats {
    let mut counts_by_action = BTreeMap::new();
    for entry in entries {
        *counts_by_action
            .entry(entry.action.as_str().to_string())
            .or_insert(0) += 1;
    }
    LedgerStats {
        total_entries: entries.len() as u64,
        last_hash: entries.last().map(|e| e.hash.clone()),
        counts_by_action,
        integrity_fault,
    }
}
