//! # Role gates
//!
//! Every command names the role allowed to issue it. The actor is supplied by
//! the caller (the API layer derives it from request headers); these helpers
//! only decide whether that actor may proceed.
//!
//! | Command                  | Allowed                                   |
//! |--------------------------|-------------------------------------------|
//! | `create_donation`        | Donor                                     |
//! | `decide_donation`        | Ngo                                       |
//! | `create_requirement`     | Clinic                                    |
//! | `withdraw_requirement`   | the Clinic that raised the requirement    |
//! | `allocate`               | Ngo                                       |
//! | `mark_in_transit`        | Ngo                                       |
//! | `confirm_receipt`        | the Clinic that raised the requirement    |
//! | `clear_integrity_fault`  | Auditor                                   |
//!
//! Reads are open to every role.

use crate::errors::{LedgerError, Result};
use crate::types::{Actor, ClinicRequirement, Role};

pub fn require_role(actor: &Actor, role: Role) -> Result<()> {
    if actor.role != role {
        return Err(LedgerError::NotAuthorized(format!(
            "{} {} cannot perform an action reserved for {}",
            actor.role.as_str(),
            actor.name,
            role.as_str()
        )));
    }
    if actor.name.trim().is_empty() {
        return Err(LedgerError::NotAuthorized(
            "actor name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// The actor must be the clinic that raised `requirement`.
pub fn require_clinic_owner(actor: &Actor, requirement: &ClinicRequirement) -> Result<()> {
    require_role(actor, Role::Clinic)?;
    if !actor
        .name
        .trim()
        .eq_ignore_ascii_case(requirement.clinic_ref.trim())
    {
        return Err(LedgerError::NotAuthorized(format!(
            "{} does not own requirement {}",
            actor.name, requirement.id
        )));
    }
    Ok(())
}
