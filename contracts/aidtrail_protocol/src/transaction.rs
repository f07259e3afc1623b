//! Staging area for one command.
//!
//! A [`Transaction`] reads through to the repository, records staged entity
//! writes in an overlay, and seals ledger entries against a private copy of
//! the chain head. Nothing reaches the repository until the caller hands
//! [`Transaction::into_batch`] to [`Repository::apply`], so a command that
//! fails halfway leaves no trace.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::{LedgerError, Result};
use crate::events::LedgerAction;
use crate::ledger::{ChainHead, PendingEntry};
use crate::storage::{Repository, WriteBatch};
use crate::types::{Actor, Allocation, ClinicRequirement, Donation, EntityKind};

pub struct Transaction<'r, R: Repository> {
    repo: &'r R,
    actor: Actor,
    timestamp: DateTime<Utc>,
    head: ChainHead,
    created: HashMap<EntityKind, u64>,
    donations: BTreeMap<String, Donation>,
    requirements: BTreeMap<String, ClinicRequirement>,
    allocations: BTreeMap<String, Allocation>,
    batch: WriteBatch,
}

impl<'r, R: Repository> Transaction<'r, R> {
    pub fn begin(repo: &'r R, actor: &Actor, timestamp: DateTime<Utc>) -> Self {
        Self {
            repo,
            actor: actor.clone(),
            timestamp,
            head: ChainHead::after(repo.last_entry().as_ref()),
            created: HashMap::new(),
            donations: BTreeMap::new(),
            requirements: BTreeMap::new(),
            allocations: BTreeMap::new(),
            batch: WriteBatch::default(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Reserve the identifier for a new entity of `kind`.
    pub fn next_id(&mut self, kind: EntityKind) -> String {
        let staged = self.created.entry(kind).or_insert(0);
        *staged += 1;
        kind.format_id(self.repo.count(kind) + *staged)
    }

    pub fn donation(&self, id: &str) -> Result<Donation> {
        if let Some(d) = self.donations.get(id) {
            return Ok(d.clone());
        }
        self.repo
            .donation(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Donation, id))
    }

    pub fn requirement(&self, id: &str) -> Result<ClinicRequirement> {
        if let Some(r) = self.requirements.get(id) {
            return Ok(r.clone());
        }
        self.repo
            .requirement(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Requirement, id))
    }

    pub fn allocation(&self, id: &str) -> Result<Allocation> {
        if let Some(a) = self.allocations.get(id) {
            return Ok(a.clone());
        }
        self.repo
            .allocation(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Allocation, id))
    }

    /// Allocations (stored or staged) that drew from `donation_id`.
    pub fn allocations_drawing_from(&self, donation_id: &str) -> Vec<Allocation> {
        let mut found: BTreeMap<String, Allocation> = self
            .repo
            .allocations()
            .into_iter()
            .filter(|a| a.drawn_from(donation_id) > 0)
            .map(|a| (a.id.clone(), a))
            .collect();
        for (id, staged) in &self.allocations {
            if staged.drawn_from(donation_id) > 0 {
                found.insert(id.clone(), staged.clone());
            }
        }
        found.into_values().collect()
    }

    pub fn put_donation(&mut self, donation: Donation) {
        self.donations.insert(donation.id.clone(), donation);
    }

    pub fn put_requirement(&mut self, requirement: ClinicRequirement) {
        self.requirements
            .insert(requirement.id.clone(), requirement);
    }

    pub fn put_allocation(&mut self, allocation: Allocation) {
        self.allocations.insert(allocation.id.clone(), allocation);
    }

    /// Seal a ledger entry authored by this transaction's actor.
    pub fn record(&mut self, reference_id: &str, action: LedgerAction, payload: Value) -> Result<()> {
        let entry = self.head.seal(
            PendingEntry {
                reference_id: reference_id.to_string(),
                action,
                entity_name: self.actor.name.clone(),
                role: self.actor.role,
                payload,
            },
            self.timestamp,
        )?;
        self.batch.entries.push(entry);
        Ok(())
    }

    pub fn into_batch(self) -> WriteBatch {
        let mut batch = self.batch;
        batch.donations = self.donations.into_values().collect();
        batch.requirements = self.requirements.into_values().collect();
        batch.allocations = self.allocations.into_values().collect();
        batch
    }
}
