//! Rebuild entity state from a persisted ledger.
//!
//! Entries are applied in sequence order. Each one overwrites the entity it
//! references with the `snapshot` in its payload, so the state after replay is
//! whatever the last entry for each id recorded. `ALLOCATION_CREATED` entries
//! also restore the donations and requirement they drew against.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::errors::{LedgerError, Result};
use crate::events::LedgerAction;
use crate::ledger::LedgerEntry;
use crate::storage::Repository;
use crate::types::{Allocation, ClinicRequirement, Donation, EntityKind};

fn snapshot<T: DeserializeOwned>(entry: &LedgerEntry) -> Result<T> {
    let raw = entry.payload.get("snapshot").cloned().unwrap_or(Value::Null);
    serde_json::from_value(raw).map_err(|e| {
        LedgerError::Storage(format!(
            "entry {} ({}) has an unreadable snapshot: {e}",
            entry.sequence, entry.action
        ))
    })
}

fn apply_drawn_state<R: Repository>(repo: &mut R, entry: &LedgerEntry) -> Result<()> {
    let unreadable = |e: serde_json::Error| {
        LedgerError::Storage(format!(
            "entry {} has unreadable drawn state: {e}",
            entry.sequence
        ))
    };
    if let Some(raw) = entry.payload.get("donation_snapshots") {
        let donations: Vec<Donation> =
            serde_json::from_value(raw.clone()).map_err(unreadable)?;
        for donation in donations {
            repo.put_donation(donation);
        }
    }
    if let Some(raw) = entry.payload.get("requirement_snapshot") {
        let requirement: ClinicRequirement =
            serde_json::from_value(raw.clone()).map_err(unreadable)?;
        repo.put_requirement(requirement);
    }
    Ok(())
}

/// Replay `entries` into `repo`, which should be empty.
pub fn rebuild<R: Repository>(repo: &mut R, entries: Vec<LedgerEntry>) -> Result<()> {
    for entry in entries {
        match entry.action.entity_kind() {
            EntityKind::Donation => {
                let donation: Donation = snapshot(&entry)?;
                repo.put_donation(donation);
            }
            EntityKind::Requirement => {
                let requirement: ClinicRequirement = snapshot(&entry)?;
                repo.put_requirement(requirement);
            }
            EntityKind::Allocation => {
                let allocation: Allocation = snapshot(&entry)?;
                repo.put_allocation(allocation);
                if entry.action == LedgerAction::AllocationCreated {
                    apply_drawn_state(repo, &entry)?;
                }
            }
        }
        repo.append_ledger(entry)?;
    }
    debug!(entries = repo.ledger_len(), "ledger replayed");
    Ok(())
}
