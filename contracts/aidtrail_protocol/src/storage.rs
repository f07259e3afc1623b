//! # Storage
//!
//! The entity store and ledger sit behind the [`Repository`] trait so the core
//! can be driven by any storage engine. [`MemoryRepository`] is the in-process
//! implementation used by the service and by every test.
//!
//! ## Layout
//!
//! | Collection     | Key           | Value               |
//! |----------------|---------------|---------------------|
//! | donations      | `n` of `DON-n` | [`Donation`]        |
//! | requirements   | `n` of `REQ-n` | [`ClinicRequirement`] |
//! | allocations    | `n` of `ALC-n` | [`Allocation`]      |
//! | ledger         | sequence      | [`LedgerEntry`]     |
//!
//! ## Atomicity
//!
//! Callers never interleave `put_*` and `append_ledger` themselves. They
//! stage everything in a [`WriteBatch`] and hand it to [`Repository::apply`],
//! which checks the whole batch against the chain head before touching
//! anything. Implementations backed by a real engine should override `apply`
//! with a native transaction.

use std::collections::BTreeMap;

use crate::errors::{LedgerError, Result};
use crate::ledger::{ChainHead, LedgerEntry};
use crate::types::{Allocation, ClinicRequirement, Donation, EntityKind};

/// Every mutation produced by one command.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub donations: Vec<Donation>,
    pub requirements: Vec<ClinicRequirement>,
    pub allocations: Vec<Allocation>,
    pub entries: Vec<LedgerEntry>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.donations.is_empty()
            && self.requirements.is_empty()
            && self.allocations.is_empty()
            && self.entries.is_empty()
    }
}

pub trait Repository: Send + Sync {
    fn donation(&self, id: &str) -> Option<Donation>;
    fn requirement(&self, id: &str) -> Option<ClinicRequirement>;
    fn allocation(&self, id: &str) -> Option<Allocation>;

    /// All donations in creation order.
    fn donations(&self) -> Vec<Donation>;
    /// All requirements in creation order.
    fn requirements(&self) -> Vec<ClinicRequirement>;
    /// All allocations in creation order.
    fn allocations(&self) -> Vec<Allocation>;

    /// Number of stored entities of `kind`.
    fn count(&self, kind: EntityKind) -> u64;

    /// The full ledger, sequence ascending.
    fn ledger(&self) -> Vec<LedgerEntry>;
    fn ledger_entry(&self, sequence: u64) -> Option<LedgerEntry>;
    fn last_entry(&self) -> Option<LedgerEntry>;
    fn ledger_len(&self) -> u64;

    fn put_donation(&mut self, donation: Donation);
    fn put_requirement(&mut self, requirement: ClinicRequirement);
    fn put_allocation(&mut self, allocation: Allocation);

    /// Append one entry. Must refuse any `sequence` other than `ledger_len()`.
    fn append_ledger(&mut self, entry: LedgerEntry) -> Result<()>;

    /// Apply a whole batch or nothing.
    fn apply(&mut self, batch: WriteBatch) -> Result<()> {
        let mut head = ChainHead::after(self.last_entry().as_ref());
        for entry in &batch.entries {
            head.accept(entry)?;
        }

        for donation in batch.donations {
            self.put_donation(donation);
        }
        for requirement in batch.requirements {
            self.put_requirement(requirement);
        }
        for allocation in batch.allocations {
            self.put_allocation(allocation);
        }
        for entry in batch.entries {
            self.append_ledger(entry)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// In-memory implementation
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    donations: BTreeMap<u64, Donation>,
    requirements: BTreeMap<u64, ClinicRequirement>,
    allocations: BTreeMap<u64, Allocation>,
    ledger: Vec<LedgerEntry>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to stored entries, for exercising tamper detection.
    #[cfg(any(test, feature = "testutils"))]
    pub fn ledger_mut(&mut self) -> &mut Vec<LedgerEntry> {
        &mut self.ledger
    }
}

fn key(kind: EntityKind, id: &str) -> Option<u64> {
    kind.parse_id(id)
}

impl Repository for MemoryRepository {
    fn donation(&self, id: &str) -> Option<Donation> {
        self.donations
            .get(&key(EntityKind::Donation, id)?)
            .cloned()
    }

    fn requirement(&self, id: &str) -> Option<ClinicRequirement> {
        self.requirements
            .get(&key(EntityKind::Requirement, id)?)
            .cloned()
    }

    fn allocation(&self, id: &str) -> Option<Allocation> {
        self.allocations
            .get(&key(EntityKind::Allocation, id)?)
            .cloned()
    }

    fn donations(&self) -> Vec<Donation> {
        self.donations.values().cloned().collect()
    }

    fn requirements(&self) -> Vec<ClinicRequirement> {
        self.requirements.values().cloned().collect()
    }

    fn allocations(&self) -> Vec<Allocation> {
        self.allocations.values().cloned().collect()
    }

    fn count(&self, kind: EntityKind) -> u64 {
        let n = match kind {
            EntityKind::Donation => self.donations.len(),
            EntityKind::Requirement => self.requirements.len(),
            EntityKind::Allocation => self.allocations.len(),
        };
        n as u64
    }

    fn ledger(&self) -> Vec<LedgerEntry> {
        self.ledger.clone()
    }

    fn ledger_entry(&self, sequence: u64) -> Option<LedgerEntry> {
        usize::try_from(sequence)
            .ok()
            .and_then(|i| self.ledger.get(i))
            .cloned()
    }

    fn last_entry(&self) -> Option<LedgerEntry> {
        self.ledger.last().cloned()
    }

    fn ledger_len(&self) -> u64 {
        self.ledger.len() as u64
    }

    fn put_donation(&mut self, donation: Donation) {
        if let Some(k) = key(EntityKind::Donation, &donation.id) {
            self.donations.insert(k, donation);
        }
    }

    fn put_requirement(&mut self, requirement: ClinicRequirement) {
        if let Some(k) = key(EntityKind::Requirement, &requirement.id) {
            self.requirements.insert(k, requirement);
        }
    }

    fn put_allocation(&mut self, allocation: Allocation) {
        if let Some(k) = key(EntityKind::Allocation, &allocation.id) {
            self.allocations.insert(k, allocation);
        }
    }

    fn append_ledger(&mut self, entry: LedgerEntry) -> Result<()> {
        let expected = self.ledger_len();
        if entry.sequence != expected {
            return Err(LedgerError::Storage(format!(
                "non-contiguous append: expected sequence {expected}, got {}",
                entry.sequence
            )));
        }
        self.ledger.push(entry);
        Ok(())
    }
}
