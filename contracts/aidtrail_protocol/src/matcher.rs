//! # Allocation matcher
//!
//! Decides how much to draw from which donation for one requirement, and
//! computes every resulting entity state, without writing anything.
//!
//! ## Candidates
//!
//! A donation can serve a requirement when it is `ACCEPTED` or
//! `PARTIALLY_ALLOCATED`, has quantity left, and its item name matches the
//! requirement's under case-insensitive substring comparison in either
//! direction ("Surgical Gloves" serves "gloves" and vice versa). Donors name
//! things inconsistently; there is no item catalogue to key on.
//!
//! ## Reservation
//!
//! The caller orders the donations. Each contributes
//! `min(still_needed, remaining)` until the requested quantity is covered.
//! Every check runs before any new state is produced, and the result is a
//! single [`Reservation`] that the service commits as one batch. If any
//! donation in the list is unusable, or the list cannot cover the quantity,
//! the whole call fails.

use std::collections::HashSet;

use crate::errors::{LedgerError, Result};
use crate::lifecycle::{DonationEvent, RequirementEvent, TransitionError};
use crate::types::{ClinicRequirement, Donation, DonationStatus, Draw, EntityKind, RequirementStatus};

fn normalise(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Loose free-text match between a requirement's and a donation's item name.
pub fn item_matches(requirement_item: &str, donation_item: &str) -> bool {
    let want = normalise(requirement_item);
    let have = normalise(donation_item);
    if want.is_empty() || have.is_empty() {
        return false;
    }
    want.contains(&have) || have.contains(&want)
}

pub fn is_candidate(requirement: &ClinicRequirement, donation: &Donation) -> bool {
    donation.status.is_allocatable()
        && donation.quantity_remaining > 0
        && item_matches(&requirement.item_name, &donation.item_name)
}

/// Donations from `pool` that could serve `requirement`, in pool order.
pub fn candidates(requirement: &ClinicRequirement, pool: Vec<Donation>) -> Vec<Donation> {
    pool.into_iter()
        .filter(|d| is_candidate(requirement, d))
        .collect()
}

/// A donation's state after the draw, with the status it had before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationChange {
    pub donation: Donation,
    pub previous: DonationStatus,
}

impl DonationChange {
    pub fn status_changed(&self) -> bool {
        self.donation.status != self.previous
    }
}

/// Fully validated outcome of one allocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub requirement: ClinicRequirement,
    pub previous_requirement_status: RequirementStatus,
    /// Contributing donations only, in draw order.
    pub donations: Vec<DonationChange>,
    pub draws: Vec<Draw>,
    pub quantity: u64,
}

/// Stage an allocation of `quantity` (default: the outstanding need) from
/// `listed`, drawn in the given order.
pub fn reserve(
    requirement: &ClinicRequirement,
    listed: &[Donation],
    quantity: Option<u64>,
) -> Result<Reservation> {
    if !requirement.status.accepts_allocation() {
        return Err(TransitionError::new(
            EntityKind::Requirement,
            requirement.status.as_str(),
            "allocate",
        )
        .into());
    }

    if listed.is_empty() {
        return Err(LedgerError::Validation(
            "at least one donation id is required".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for d in listed {
        if !seen.insert(d.id.as_str()) {
            return Err(LedgerError::Validation(format!(
                "donation {} listed more than once",
                d.id
            )));
        }
    }

    let outstanding = requirement.outstanding();
    let quantity = quantity.unwrap_or(outstanding);
    if quantity == 0 {
        return Err(LedgerError::Validation(
            "allocation quantity must be positive".to_string(),
        ));
    }

    for d in listed {
        if !d.status.is_allocatable() {
            return Err(TransitionError::new(
                EntityKind::Donation,
                d.status.as_str(),
                format!("draw for {}", requirement.id),
            )
            .into());
        }
        if d.quantity_remaining == 0 {
            return Err(LedgerError::InsufficientQuantity {
                requested: quantity,
                available: 0,
                context: format!("donation {} has nothing left", d.id),
            });
        }
        if !item_matches(&requirement.item_name, &d.item_name) {
            return Err(LedgerError::Validation(format!(
                "donation {} ({}) does not match requirement item {}",
                d.id, d.item_name, requirement.item_name
            )));
        }
    }

    if quantity > outstanding {
        return Err(LedgerError::InsufficientQuantity {
            requested: quantity,
            available: outstanding,
            context: format!("outstanding need of requirement {}", requirement.id),
        });
    }

    // Only ever compared against `quantity`, so saturating loses nothing.
    let available = listed
        .iter()
        .fold(0u64, |acc, d| acc.saturating_add(d.quantity_remaining));
    if available < quantity {
        return Err(LedgerError::InsufficientQuantity {
            requested: quantity,
            available,
            context: "remaining quantity of the listed donations".to_string(),
        });
    }

    let mut still_needed = quantity;
    let mut draws = Vec::new();
    let mut donations = Vec::new();
    for d in listed {
        if still_needed == 0 {
            break;
        }
        let take = still_needed.min(d.quantity_remaining);
        still_needed -= take;

        let remaining_after = d.quantity_remaining - take;
        let mut updated = d.clone();
        updated.quantity_remaining = remaining_after;
        updated.status = d.status.on(DonationEvent::Draw { remaining_after })?;

        draws.push(Draw {
            donation_id: d.id.clone(),
            quantity: take,
        });
        donations.push(DonationChange {
            donation: updated,
            previous: d.status,
        });
    }

    let mut updated_requirement = requirement.clone();
    updated_requirement.quantity_fulfilled += quantity;
    updated_requirement.status = requirement.status.on(RequirementEvent::Fulfil {
        fulfilled: updated_requirement.quantity_fulfilled,
        requested: requirement.quantity_requested,
    })?;

    Ok(Reservation {
        requirement: updated_requirement,
        previous_requirement_status: requirement.status,
        donations,
        draws,
        quantity,
    })
}
