#![allow(dead_code)]

use crate::ledger::LedgerEntry;
use crate::service::AidLedger;
use crate::storage::Repository;
use crate::types::{
    Allocation, AllocationStatus, ClinicRequirement, Donation, DonationStatus, RequirementStatus,
};
use crate::verify::verify_entries;

/// Remaining quantity never exceeds what was donated.
pub fn assert_donation_quantities(donation: &Donation) {
    assert!(
        donation.quantity_remaining <= donation.quantity_total,
        "donation {} has {} remaining of {}",
        donation.id,
        donation.quantity_remaining,
        donation.quantity_total
    );
}

/// Everything drawn from a donation is accounted for by allocations.
pub fn assert_draws_balance(donation: &Donation, allocations: &[Allocation]) {
    let drawn: u64 = allocations.iter().map(|a| a.drawn_from(&donation.id)).sum();
    assert_eq!(
        donation.quantity_drawn(),
        drawn,
        "donation {} lost track of {} drawn units (allocations show {})",
        donation.id,
        donation.quantity_drawn(),
        drawn
    );
}

/// A donation's status agrees with how much of it is left.
pub fn assert_donation_status_matches_quantity(donation: &Donation) {
    let ok = match donation.status {
        DonationStatus::Pending | DonationStatus::Accepted | DonationStatus::Rejected => {
            donation.quantity_remaining == donation.quantity_total
        }
        DonationStatus::PartiallyAllocated => {
            donation.quantity_remaining > 0
                && donation.quantity_remaining < donation.quantity_total
        }
        DonationStatus::Allocated | DonationStatus::InTransit | DonationStatus::Received => {
            donation.quantity_remaining == 0
        }
    };
    assert!(
        ok,
        "donation {} is {} with {} of {} remaining",
        donation.id,
        donation.status.as_str(),
        donation.quantity_remaining,
        donation.quantity_total
    );
}

/// Fulfilled quantity never exceeds the request, and `FULFILLED` means equal.
pub fn assert_requirement_quantities(requirement: &ClinicRequirement) {
    assert!(
        requirement.quantity_fulfilled <= requirement.quantity_requested,
        "requirement {} overfulfilled: {} of {}",
        requirement.id,
        requirement.quantity_fulfilled,
        requirement.quantity_requested
    );
    let full = requirement.quantity_fulfilled == requirement.quantity_requested;
    assert_eq!(
        requirement.status == RequirementStatus::Fulfilled,
        full,
        "requirement {} is {} with {} of {} fulfilled",
        requirement.id,
        requirement.status.as_str(),
        requirement.quantity_fulfilled,
        requirement.quantity_requested
    );
}

/// A requirement's fulfilled quantity is the sum of its allocations.
pub fn assert_fulfilment_balances(requirement: &ClinicRequirement, allocations: &[Allocation]) {
    let allocated: u64 = allocations
        .iter()
        .filter(|a| a.requirement_id == requirement.id)
        .map(|a| a.quantity)
        .sum();
    assert_eq!(
        requirement.quantity_fulfilled, allocated,
        "requirement {} fulfilled {} but allocations sum to {}",
        requirement.id, requirement.quantity_fulfilled, allocated
    );
}

/// An allocation's quantity is the sum of its draws and only received
/// allocations carry receipt details.
pub fn assert_allocation_shape(allocation: &Allocation) {
    let drawn: u64 = allocation.draws.iter().map(|d| d.quantity).sum();
    assert_eq!(
        allocation.quantity, drawn,
        "allocation {} quantity {} != sum of draws {}",
        allocation.id, allocation.quantity, drawn
    );
    assert!(
        allocation.draws.iter().all(|d| d.quantity > 0),
        "allocation {} references a donation it took nothing from",
        allocation.id
    );
    let received = allocation.status == AllocationStatus::Received;
    assert_eq!(
        received,
        allocation.received_at.is_some() && allocation.quality_rating.is_some(),
        "allocation {} is {} but receipt details disagree",
        allocation.id,
        allocation.status.as_str()
    );
}

/// Sequences are contiguous from 0 and every hash recomputes.
pub fn assert_chain_intact(entries: &[LedgerEntry]) {
    let report = verify_entries(entries);
    assert!(
        report.ok,
        "ledger diverges at sequence {:?}",
        report.first_bad_sequence
    );
}

/// Check every cross-entity invariant on a ledger at rest.
pub fn assert_all_invariants<R: Repository>(ledger: &AidLedger<R>) {
    let donations = ledger.donations();
    let allocations = ledger.allocations();
    for donation in &donations {
        assert_donation_quantities(donation);
        assert_draws_balance(donation, &allocations);
        assert_donation_status_matches_quantity(donation);
    }
    for requirement in ledger.requirements() {
        assert_requirement_quantities(&requirement);
        assert_fulfilment_balances(&requirement, &allocations);
    }
    for allocation in &allocations {
        assert_allocation_shape(allocation);
    }
    assert_chain_intact(&ledger.ledger_since(None));
}
