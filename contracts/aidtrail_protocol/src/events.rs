//! Canonical ledger actions and the payloads recorded for them.
//!
//! Every payload carries a `snapshot` of the entity as it stands after the
//! transition, plus the names of the parties involved (`donor`, `ngo`,
//! `clinic`, `donors`). The snapshot lets [`crate::replay`] rebuild the entity
//! store from the ledger alone; the party names feed
//! [`crate::participants::participants`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::{LedgerError, Result};
use crate::types::{Allocation, ClinicRequirement, Donation, EntityKind};

/// All recognised ledger actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerAction {
    DonationCreated,
    DonationAccepted,
    DonationRejected,
    DonationPartiallyAllocated,
    DonationAllocated,
    DonationInTransit,
    DonationReceived,
    RequirementCreated,
    RequirementPartiallyFulfilled,
    RequirementFulfilled,
    RequirementWithdrawn,
    AllocationCreated,
    AllocationInTransit,
    AllocationReceived,
}

impl LedgerAction {
    pub const ALL: [LedgerAction; 14] = [
        Self::DonationCreated,
        Self::DonationAccepted,
        Self::DonationRejected,
        Self::DonationPartiallyAllocated,
        Self::DonationAllocated,
        Self::DonationInTransit,
        Self::DonationReceived,
        Self::RequirementCreated,
        Self::RequirementPartiallyFulfilled,
        Self::RequirementFulfilled,
        Self::RequirementWithdrawn,
        Self::AllocationCreated,
        Self::AllocationInTransit,
        Self::AllocationReceived,
    ];

    /// Stable identifier used in persisted entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DonationCreated => "DONATION_CREATED",
            Self::DonationAccepted => "DONATION_ACCEPTED",
            Self::DonationRejected => "DONATION_REJECTED",
            Self::DonationPartiallyAllocated => "DONATION_PARTIALLY_ALLOCATED",
            Self::DonationAllocated => "DONATION_ALLOCATED",
            Self::DonationInTransit => "DONATION_IN_TRANSIT",
            Self::DonationReceived => "DONATION_RECEIVED",
            Self::RequirementCreated => "REQUIREMENT_CREATED",
            Self::RequirementPartiallyFulfilled => "REQUIREMENT_PARTIALLY_FULFILLED",
            Self::RequirementFulfilled => "REQUIREMENT_FULFILLED",
            Self::RequirementWithdrawn => "REQUIREMENT_WITHDRAWN",
            Self::AllocationCreated => "ALLOCATION_CREATED",
            Self::AllocationInTransit => "ALLOCATION_IN_TRANSIT",
            Self::AllocationReceived => "ALLOCATION_RECEIVED",
        }
    }

    /// The entity type whose snapshot this action carries.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Self::DonationCreated
            | Self::DonationAccepted
            | Self::DonationRejected
            | Self::DonationPartiallyAllocated
            | Self::DonationAllocated
            | Self::DonationInTransit
            | Self::DonationReceived => EntityKind::Donation,
            Self::RequirementCreated
            | Self::RequirementPartiallyFulfilled
            | Self::RequirementFulfilled
            | Self::RequirementWithdrawn => EntityKind::Requirement,
            Self::AllocationCreated | Self::AllocationInTransit | Self::AllocationReceived => {
                EntityKind::Allocation
            }
        }
    }
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerAction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LedgerError::Validation(format!("unknown ledger action: {s}")))
    }
}

// ─────────────────────────────────────────────────────────
// Payload builders
// ─────────────────────────────────────────────────────────

fn snapshot<T: Serialize>(entity: &T) -> Result<Value> {
    serde_json::to_value(entity)
        .map_err(|e| LedgerError::Validation(format!("entity snapshot not serialisable: {e}")))
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn donation_payload(donation: &Donation) -> Result<Value> {
    let mut payload = object(json!({
        "snapshot": snapshot(donation)?,
        "donor": donation.donor_ref,
        "item_name": donation.item_name,
        "status": donation.status,
        "quantity_remaining": donation.quantity_remaining,
    }));
    if let Some(ngo) = &donation.ngo_ref {
        payload.insert("ngo".into(), json!(ngo));
    }
    if let Some(reason) = &donation.decision_reason {
        payload.insert("reason".into(), json!(reason));
    }
    Ok(Value::Object(payload))
}

pub fn requirement_payload(requirement: &ClinicRequirement) -> Result<Value> {
    Ok(json!({
        "snapshot": snapshot(requirement)?,
        "clinic": requirement.clinic_ref,
        "item_name": requirement.item_name,
        "status": requirement.status,
        "priority": requirement.priority,
        "quantity_fulfilled": requirement.quantity_fulfilled,
    }))
}

/// `donors` lists the donor of each contributing donation, in draw order.
pub fn allocation_payload(
    allocation: &Allocation,
    clinic: &str,
    ngo: &str,
    donors: &[String],
) -> Result<Value> {
    Ok(json!({
        "snapshot": snapshot(allocation)?,
        "clinic": clinic,
        "ngo": ngo,
        "donors": donors,
        "requirement_id": allocation.requirement_id,
        "status": allocation.status,
        "quantity": allocation.quantity,
    }))
}

/// Payload for [`LedgerAction::AllocationCreated`].
///
/// Besides the allocation it carries the post-draw state of every
/// contributing donation and of the requirement, since a draw that leaves a
/// status unchanged gets no entry of its own.
pub fn allocation_created_payload(
    allocation: &Allocation,
    ngo: &str,
    requirement: &ClinicRequirement,
    donations: &[Donation],
) -> Result<Value> {
    let donors: Vec<String> = donations.iter().map(|d| d.donor_ref.clone()).collect();
    let mut payload = object(allocation_payload(
        allocation,
        &requirement.clinic_ref,
        ngo,
        &donors,
    )?);
    let drawn = donations
        .iter()
        .map(snapshot)
        .collect::<Result<Vec<_>>>()?;
    payload.insert("donation_snapshots".into(), Value::Array(drawn));
    payload.insert("requirement_snapshot".into(), snapshot(requirement)?);
    Ok(Value::Object(payload))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::types::DonationStatus;

    #[test]
    fn action_round_trips_through_str() {
        for action in LedgerAction::ALL {
            assert_eq!(action.as_str().parse::<LedgerAction>().unwrap(), action);
            assert_eq!(
                serde_json::to_string(&action).unwrap(),
                format!("\"{}\"", action.as_str())
            );
        }
        assert!("DONATION_DELETED".parse::<LedgerAction>().is_err());
    }

    #[test]
    fn action_entity_kinds() {
        assert_eq!(
            LedgerAction::DonationRejected.entity_kind(),
            EntityKind::Donation
        );
        assert_eq!(
            LedgerAction::RequirementWithdrawn.entity_kind(),
            EntityKind::Requirement
        );
        assert_eq!(
            LedgerAction::AllocationReceived.entity_kind(),
            EntityKind::Allocation
        );
    }

    #[test]
    fn donation_payload_names_its_parties() {
        let donation = Donation {
            id: "DON-1".into(),
            donor_ref: "John Healthcare Corp".into(),
            item_name: "PPE Kits".into(),
            quantity_total: 100,
            quantity_remaining: 100,
            status: DonationStatus::Accepted,
            created_at: Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap(),
            ngo_ref: Some("Red Cross India".into()),
            decision_reason: None,
        };
        let payload = donation_payload(&donation).unwrap();
        assert_eq!(payload["donor"], "John Healthcare Corp");
        assert_eq!(payload["ngo"], "Red Cross India");
        assert_eq!(payload["snapshot"]["id"], "DON-1");
        assert!(payload.get("reason").is_none());
    }

    #[test]
    fn allocation_created_payload_carries_drawn_state() {
        use crate::types::{Allocation, AllocationStatus, Draw, Priority, RequirementStatus};

        let ts = Utc.with_ymd_and_hms(2025, 1, 15, 14, 45, 0).unwrap();
        let donation = Donation {
            id: "DON-2".into(),
            donor_ref: "Medical Supplies Ltd".into(),
            item_name: "Medical Gloves".into(),
            quantity_total: 500,
            quantity_remaining: 300,
            status: DonationStatus::PartiallyAllocated,
            created_at: ts,
            ngo_ref: Some("WHO Partners".into()),
            decision_reason: None,
        };
        let requirement = ClinicRequirement {
            id: "REQ-1".into(),
            clinic_ref: "Emergency Care Clinic".into(),
            item_name: "gloves".into(),
            quantity_requested: 400,
            quantity_fulfilled: 200,
            priority: Priority::CRITICAL,
            status: RequirementStatus::PartiallyFulfilled,
            created_at: ts,
        };
        let allocation = Allocation {
            id: "ALC-1".into(),
            requirement_id: "REQ-1".into(),
            draws: vec![Draw {
                donation_id: "DON-2".into(),
                quantity: 200,
            }],
            quantity: 200,
            status: AllocationStatus::Created,
            allocated_at: ts,
            received_at: None,
            feedback: None,
            quality_rating: None,
        };

        let payload =
            allocation_created_payload(&allocation, "WHO Partners", &requirement, &[donation])
                .unwrap();
        assert_eq!(payload["clinic"], "Emergency Care Clinic");
        assert_eq!(payload["donors"][0], "Medical Supplies Ltd");
        assert_eq!(payload["donation_snapshots"][0]["quantity_remaining"], 300);
        assert_eq!(payload["requirement_snapshot"]["quantity_fulfilled"], 200);
    }
}
