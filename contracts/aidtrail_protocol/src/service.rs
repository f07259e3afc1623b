//! # AidLedger
//!
//! The command and query boundary of the protocol. Every command:
//!
//! 1. checks the actor's role,
//! 2. takes the writer lock (bounded by [`LedgerConfig::lock_timeout`]),
//! 3. refuses to run while an integrity fault is latched,
//! 4. re-reads the entities it touches and feeds their current status to
//!    [`crate::lifecycle`],
//! 5. stages every entity write and ledger entry in a [`Transaction`],
//! 6. commits the resulting [`crate::storage::WriteBatch`] in one
//!    [`Repository::apply`].
//!
//! A failure at any step leaves the repository as it was.
//!
//! Queries take the read lock only long enough to clone what they need.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::errors::{LedgerError, Result};
use crate::events::{
    allocation_created_payload, allocation_payload, donation_payload, requirement_payload,
    LedgerAction,
};
use crate::ledger::LedgerEntry;
use crate::lifecycle::{AllocationEvent, DonationEvent, RequirementEvent};
use crate::matcher;
use crate::rbac::{require_clinic_owner, require_role};
use crate::replay;
use crate::storage::{MemoryRepository, Repository};
use crate::transaction::Transaction;
use crate::types::{
    Actor, Allocation, AllocationStatus, ClinicRequirement, Donation, DonationStatus, EntityKind,
    Priority, QualityRating, RequirementStatus, Role,
};
use crate::verify::{self, ChainReport, LedgerStats, TrailFilter};

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// How long a command waits for the writer lock.
    pub lock_timeout: Duration,
    /// Extra attempts `allocate` makes after a lock timeout.
    pub max_conflict_retries: u32,
    /// First retry delay; doubles on each further attempt.
    pub retry_backoff: Duration,
    /// Verify the chain when rebuilding from persisted entries.
    pub verify_on_restore: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(250),
            max_conflict_retries: 3,
            retry_backoff: Duration::from_millis(10),
            verify_on_restore: true,
        }
    }
}

struct State<R> {
    repo: R,
    /// First divergent sequence of an unresolved integrity fault.
    fault: Option<u64>,
}

pub struct AidLedger<R: Repository = MemoryRepository> {
    state: RwLock<State<R>>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl Default for AidLedger<MemoryRepository> {
    fn default() -> Self {
        Self::new()
    }
}

impl AidLedger<MemoryRepository> {
    pub fn new() -> Self {
        Self::with_repository(MemoryRepository::new())
    }

    /// Rebuild a ledger from persisted entries.
    ///
    /// When verification is enabled and the chain is broken, the ledger still
    /// starts, with the fault latched. A chain too damaged to replay at all is
    /// refused.
    pub fn restore(
        entries: Vec<LedgerEntry>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Result<Self> {
        let report = config.verify_on_restore.then(|| verify::verify_entries(&entries));
        let total = entries.len();

        let mut repo = MemoryRepository::new();
        if let Err(e) = replay::rebuild(&mut repo, entries) {
            if let Some(sequence) = report.as_ref().and_then(|r| r.first_bad_sequence) {
                error!(sequence, error = %e, "persisted ledger is corrupt and cannot be replayed");
                return Err(LedgerError::ChainIntegrityFault { sequence });
            }
            return Err(e);
        }

        let fault = report.and_then(|r| r.first_bad_sequence);
        if let Some(sequence) = fault {
            error!(sequence, "persisted ledger failed verification; writes are blocked");
        }
        info!(entries = total, "ledger restored");

        Ok(Self {
            state: RwLock::new(State { repo, fault }),
            clock,
            config,
        })
    }

    /// Apply `f` to the stored ledger entries directly, bypassing every
    /// guard. For exercising tamper detection.
    #[cfg(any(test, feature = "testutils"))]
    pub fn tamper_with_ledger<F: FnOnce(&mut Vec<LedgerEntry>)>(&self, f: F) {
        let mut state = self.state.write();
        f(state.repo.ledger_mut());
    }
}

impl<R: Repository> AidLedger<R> {
    pub fn with_repository(repo: R) -> Self {
        Self {
            state: RwLock::new(State { repo, fault: None }),
            clock: Arc::new(SystemClock),
            config: LedgerConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────

    pub fn create_donation(
        &self,
        actor: &Actor,
        donor_ref: &str,
        item_name: &str,
        quantity: u64,
    ) -> Result<Donation> {
        require_role(actor, Role::Donor)?;
        let donor_ref = required("donor_ref", donor_ref)?;
        require_self(actor, &donor_ref)?;
        let item_name = required("item_name", item_name)?;
        if quantity == 0 {
            return Err(LedgerError::Validation(
                "donation quantity must be positive".to_string(),
            ));
        }

        self.write(actor, "create_donation", |tx| {
            let donation = Donation {
                id: tx.next_id(EntityKind::Donation),
                donor_ref,
                item_name,
                quantity_total: quantity,
                quantity_remaining: quantity,
                status: DonationStatus::Pending,
                created_at: tx.timestamp(),
                ngo_ref: None,
                decision_reason: None,
            };
            tx.record(
                &donation.id,
                LedgerAction::DonationCreated,
                donation_payload(&donation)?,
            )?;
            tx.put_donation(donation.clone());
            Ok(donation)
        })
    }

    /// Accept or reject a `PENDING` donation on behalf of the acting NGO.
    pub fn decide_donation(
        &self,
        actor: &Actor,
        donation_id: &str,
        accept: bool,
        reason: Option<&str>,
    ) -> Result<Donation> {
        require_role(actor, Role::Ngo)?;
        let reason = reason.map(str::trim).filter(|r| !r.is_empty()).map(String::from);

        self.write(actor, "decide_donation", |tx| {
            let mut donation = tx.donation(donation_id)?;
            let (event, action) = if accept {
                (DonationEvent::Accept, LedgerAction::DonationAccepted)
            } else {
                (DonationEvent::Reject, LedgerAction::DonationRejected)
            };
            donation.status = donation.status.on(event)?;
            donation.ngo_ref = Some(tx.actor().name.clone());
            donation.decision_reason = reason;
            tx.record(&donation.id, action, donation_payload(&donation)?)?;
            tx.put_donation(donation.clone());
            Ok(donation)
        })
    }

    pub fn create_requirement(
        &self,
        actor: &Actor,
        clinic_ref: &str,
        item_name: &str,
        quantity: u64,
        priority: Priority,
    ) -> Result<ClinicRequirement> {
        require_role(actor, Role::Clinic)?;
        let clinic_ref = required("clinic_ref", clinic_ref)?;
        require_self(actor, &clinic_ref)?;
        let item_name = required("item_name", item_name)?;
        if quantity == 0 {
            return Err(LedgerError::Validation(
                "requirement quantity must be positive".to_string(),
            ));
        }

        self.write(actor, "create_requirement", |tx| {
            let requirement = ClinicRequirement {
                id: tx.next_id(EntityKind::Requirement),
                clinic_ref,
                item_name,
                quantity_requested: quantity,
                quantity_fulfilled: 0,
                priority,
                status: RequirementStatus::Open,
                created_at: tx.timestamp(),
            };
            tx.record(
                &requirement.id,
                LedgerAction::RequirementCreated,
                requirement_payload(&requirement)?,
            )?;
            tx.put_requirement(requirement.clone());
            Ok(requirement)
        })
    }

    /// Close an `OPEN` requirement that nothing has been allocated to yet.
    pub fn withdraw_requirement(
        &self,
        actor: &Actor,
        requirement_id: &str,
    ) -> Result<ClinicRequirement> {
        require_role(actor, Role::Clinic)?;

        self.write(actor, "withdraw_requirement", |tx| {
            let mut requirement = tx.requirement(requirement_id)?;
            require_clinic_owner(tx.actor(), &requirement)?;
            requirement.status = requirement.status.on(RequirementEvent::Withdraw)?;
            tx.record(
                &requirement.id,
                LedgerAction::RequirementWithdrawn,
                requirement_payload(&requirement)?,
            )?;
            tx.put_requirement(requirement.clone());
            Ok(requirement)
        })
    }

    /// Draw `quantity` (default: the outstanding need) for `requirement_id`
    /// from `donation_ids`, in the order given.
    ///
    /// Lock timeouts are retried with exponential backoff up to
    /// [`LedgerConfig::max_conflict_retries`] times.
    pub fn allocate<S: AsRef<str>>(
        &self,
        actor: &Actor,
        requirement_id: &str,
        donation_ids: &[S],
        quantity: Option<u64>,
    ) -> Result<Allocation> {
        require_role(actor, Role::Ngo)?;

        let mut attempt = 0u32;
        loop {
            match self.try_allocate(actor, requirement_id, donation_ids, quantity) {
                Err(e) if e.is_retryable() && attempt < self.config.max_conflict_retries => {
                    let backoff = self.config.retry_backoff.saturating_mul(1 << attempt.min(16));
                    attempt += 1;
                    warn!(
                        requirement_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "allocation hit a lock conflict; retrying"
                    );
                    thread::sleep(backoff);
                }
                outcome => return outcome,
            }
        }
    }

    fn try_allocate<S: AsRef<str>>(
        &self,
        actor: &Actor,
        requirement_id: &str,
        donation_ids: &[S],
        quantity: Option<u64>,
    ) -> Result<Allocation> {
        self.write(actor, "allocate", |tx| {
            let requirement = tx.requirement(requirement_id)?;
            let listed = donation_ids
                .iter()
                .map(|id| tx.donation(id.as_ref()))
                .collect::<Result<Vec<_>>>()?;

            let reservation = matcher::reserve(&requirement, &listed, quantity)?;

            let allocation = Allocation {
                id: tx.next_id(EntityKind::Allocation),
                requirement_id: requirement.id.clone(),
                draws: reservation.draws.clone(),
                quantity: reservation.quantity,
                status: AllocationStatus::Created,
                allocated_at: tx.timestamp(),
                received_at: None,
                feedback: None,
                quality_rating: None,
            };
            let drawn: Vec<Donation> = reservation
                .donations
                .iter()
                .map(|c| c.donation.clone())
                .collect();
            let ngo = tx.actor().name.clone();
            tx.record(
                &allocation.id,
                LedgerAction::AllocationCreated,
                allocation_created_payload(&allocation, &ngo, &reservation.requirement, &drawn)?,
            )?;

            for change in &reservation.donations {
                if change.status_changed() {
                    let action = match change.donation.status {
                        DonationStatus::Allocated => LedgerAction::DonationAllocated,
                        _ => LedgerAction::DonationPartiallyAllocated,
                    };
                    tx.record(&change.donation.id, action, donation_payload(&change.donation)?)?;
                }
                tx.put_donation(change.donation.clone());
            }

            let updated = &reservation.requirement;
            if updated.status != reservation.previous_requirement_status {
                let action = match updated.status {
                    RequirementStatus::Fulfilled => LedgerAction::RequirementFulfilled,
                    _ => LedgerAction::RequirementPartiallyFulfilled,
                };
                tx.record(&updated.id, action, requirement_payload(updated)?)?;
            }
            tx.put_requirement(reservation.requirement.clone());
            tx.put_allocation(allocation.clone());
            Ok(allocation)
        })
    }

    /// Dispatch an allocation. Contributing donations that are fully
    /// `ALLOCATED` go `IN_TRANSIT` with it.
    pub fn mark_in_transit(&self, actor: &Actor, allocation_id: &str) -> Result<Allocation> {
        require_role(actor, Role::Ngo)?;

        self.write(actor, "mark_in_transit", |tx| {
            let mut allocation = tx.allocation(allocation_id)?;
            allocation.status = allocation.status.on(AllocationEvent::Dispatch)?;
            let requirement = tx.requirement(&allocation.requirement_id)?;
            let donations = contributing(tx, &allocation)?;

            let ngo = tx.actor().name.clone();
            tx.record(
                &allocation.id,
                LedgerAction::AllocationInTransit,
                allocation_payload(
                    &allocation,
                    &requirement.clinic_ref,
                    &ngo,
                    &donor_names(&donations),
                )?,
            )?;
            tx.put_allocation(allocation.clone());

            for mut donation in donations {
                if donation.status == DonationStatus::Allocated {
                    donation.status = donation.status.on(DonationEvent::Dispatch)?;
                    tx.record(
                        &donation.id,
                        LedgerAction::DonationInTransit,
                        donation_payload(&donation)?,
                    )?;
                    tx.put_donation(donation);
                }
            }
            Ok(allocation)
        })
    }

    /// Close an in-transit allocation with the receiving clinic's feedback.
    pub fn confirm_receipt(
        &self,
        actor: &Actor,
        allocation_id: &str,
        feedback: &str,
        quality_rating: u8,
    ) -> Result<Allocation> {
        require_role(actor, Role::Clinic)?;
        let feedback = required("feedback", feedback)?;
        let rating = QualityRating::new(quality_rating)?;

        self.write(actor, "confirm_receipt", |tx| {
            let mut allocation = tx.allocation(allocation_id)?;
            let requirement = tx.requirement(&allocation.requirement_id)?;
            require_clinic_owner(tx.actor(), &requirement)?;

            allocation.status = allocation.status.on(AllocationEvent::Receive)?;
            allocation.received_at = Some(tx.timestamp());
            allocation.feedback = Some(feedback);
            allocation.quality_rating = Some(rating);

            let donations = contributing(tx, &allocation)?;
            let ngo = donations
                .iter()
                .find_map(|d| d.ngo_ref.clone())
                .unwrap_or_default();
            tx.record(
                &allocation.id,
                LedgerAction::AllocationReceived,
                allocation_payload(
                    &allocation,
                    &requirement.clinic_ref,
                    &ngo,
                    &donor_names(&donations),
                )?,
            )?;
            tx.put_allocation(allocation.clone());

            for mut donation in donations {
                if donation.status != DonationStatus::InTransit {
                    continue;
                }
                let all_received = tx
                    .allocations_drawing_from(&donation.id)
                    .iter()
                    .all(|a| a.status == AllocationStatus::Received);
                if all_received {
                    donation.status = donation.status.on(DonationEvent::Receive)?;
                    tx.record(
                        &donation.id,
                        LedgerAction::DonationReceived,
                        donation_payload(&donation)?,
                    )?;
                    tx.put_donation(donation);
                }
            }
            Ok(allocation)
        })
    }

    // ─────────────────────────────────────────────────────
    // Integrity
    // ─────────────────────────────────────────────────────

    /// Walk the whole chain. A divergence latches the integrity fault.
    pub fn verify_chain(&self) -> ChainReport {
        let entries = self.state.read().repo.ledger();
        let report = verify::verify_entries(&entries);
        if let Some(sequence) = report.first_bad_sequence {
            let mut state = self.state.write();
            if state.fault.is_none() {
                error!(sequence, "ledger chain diverges; writes and ledger reads are blocked");
            }
            state.fault = Some(sequence);
        }
        report
    }

    /// Re-verify and, if the chain is clean again, lift the latched fault.
    pub fn clear_integrity_fault(&self, actor: &Actor) -> Result<ChainReport> {
        require_role(actor, Role::Auditor)?;
        let report = self.verify_chain();
        if let Some(sequence) = report.first_bad_sequence {
            return Err(LedgerError::ChainIntegrityFault { sequence });
        }
        let mut state = self.state.write();
        if let Some(previous) = state.fault.take() {
            info!(previous, auditor = %actor.name, "integrity fault cleared");
        }
        Ok(report)
    }

    pub fn integrity_fault(&self) -> Option<u64> {
        self.state.read().fault
    }

    // ─────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────

    pub fn get_audit_trail(&self, filter: &TrailFilter) -> Result<Vec<LedgerEntry>> {
        let entries = self.ledger_snapshot()?;
        Ok(verify::query_trail(&entries, filter))
    }

    pub fn ledger_entry(&self, sequence: u64) -> Result<Option<LedgerEntry>> {
        let state = self.state.read();
        fault_check(state.fault)?;
        Ok(state.repo.ledger_entry(sequence))
    }

    pub fn ledger_stats(&self) -> LedgerStats {
        let state = self.state.read();
        verify::ledger_stats(&state.repo.ledger(), state.fault)
    }

    /// Entries with a sequence greater than `after` (all of them for `None`),
    /// for mirroring to durable storage. Not blocked by a latched fault.
    pub fn ledger_since(&self, after: Option<u64>) -> Vec<LedgerEntry> {
        let state = self.state.read();
        let start = after.map_or(0, |s| s + 1);
        (start..state.repo.ledger_len())
            .filter_map(|seq| state.repo.ledger_entry(seq))
            .collect()
    }

    pub fn donation(&self, id: &str) -> Result<Donation> {
        self.state
            .read()
            .repo
            .donation(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Donation, id))
    }

    pub fn requirement(&self, id: &str) -> Result<ClinicRequirement> {
        self.state
            .read()
            .repo
            .requirement(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Requirement, id))
    }

    pub fn allocation(&self, id: &str) -> Result<Allocation> {
        self.state
            .read()
            .repo
            .allocation(id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Allocation, id))
    }

    pub fn donations(&self) -> Vec<Donation> {
        self.state.read().repo.donations()
    }

    /// Critical needs first; creation order within a priority.
    pub fn requirements(&self) -> Vec<ClinicRequirement> {
        let mut requirements = self.state.read().repo.requirements();
        requirements.sort_by_key(|r| r.priority);
        requirements
    }

    pub fn allocations(&self) -> Vec<Allocation> {
        self.state.read().repo.allocations()
    }

    /// Donations that could currently serve `requirement_id`, oldest first.
    pub fn candidate_donations(&self, requirement_id: &str) -> Result<Vec<Donation>> {
        let state = self.state.read();
        let requirement = state
            .repo
            .requirement(requirement_id)
            .ok_or_else(|| LedgerError::not_found(EntityKind::Requirement, requirement_id))?;
        Ok(matcher::candidates(&requirement, state.repo.donations()))
    }

    // ─────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────

    fn ledger_snapshot(&self) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read();
        fault_check(state.fault)?;
        Ok(state.repo.ledger())
    }

    fn write<T, F>(&self, actor: &Actor, command: &'static str, stage: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_, R>) -> Result<T>,
    {
        let timeout = self.config.lock_timeout;
        let Some(mut state) = self.state.try_write_for(timeout) else {
            return Err(LedgerError::ConcurrencyConflict {
                waited_ms: timeout.as_millis() as u64,
            });
        };
        fault_check(state.fault)?;

        let timestamp = self.clock.now();
        let (value, batch) = {
            let mut tx = Transaction::begin(&state.repo, actor, timestamp);
            match stage(&mut tx) {
                Ok(value) => (value, tx.into_batch()),
                Err(e) => {
                    debug!(command, actor = %actor.name, error = %e, "command refused");
                    return Err(e);
                }
            }
        };

        let first = batch.entries.first().map(|e| e.sequence);
        let entries = batch.entries.len();
        state.repo.apply(batch)?;
        info!(command, actor = %actor.name, first_sequence = ?first, entries, "command committed");
        Ok(value)
    }
}

fn fault_check(fault: Option<u64>) -> Result<()> {
    match fault {
        Some(sequence) => Err(LedgerError::ChainIntegrityFault { sequence }),
        None => Ok(()),
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Parties may only register records in their own name.
fn require_self(actor: &Actor, named: &str) -> Result<()> {
    if !actor.name.trim().eq_ignore_ascii_case(named) {
        return Err(LedgerError::NotAuthorized(format!(
            "{} cannot act on behalf of {named}",
            actor.name
        )));
    }
    Ok(())
}

fn contributing<R: Repository>(
    tx: &Transaction<'_, R>,
    allocation: &Allocation,
) -> Result<Vec<Donation>> {
    allocation
        .donation_ids()
        .map(|id| tx.donation(id))
        .collect()
}

fn donor_names(donations: &[Donation]) -> Vec<String> {
    donations.iter().map(|d| d.donor_ref.clone()).collect()
}
