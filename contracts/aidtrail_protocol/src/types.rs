//! # Types
//!
//! Shared data structures used across all modules of the AidTrail protocol.
//!
//! ## Design decisions
//!
//! ### Closed status enums
//!
//! Each entity carries its own status enum ([`DonationStatus`],
//! [`RequirementStatus`], [`AllocationStatus`]). Legal moves between them are
//! defined once, in [`crate::lifecycle`]; nothing else compares statuses to
//! decide whether a move is allowed.
//!
//! ### Sequential prefixed identifiers
//!
//! Identifiers are `DON-n`, `REQ-n` and `ALC-n`, where `n` starts at 1 and is
//! assigned under the writer lock. Entities are never deleted, so the count of
//! stored entities is always the last assigned `n`.
//!
//! ### Validated scalars
//!
//! [`Priority`] (1..=4) and [`QualityRating`] (1..=5) can only be constructed
//! through their checked constructors, including when deserialised.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, Result};

// ─────────────────────────────────────────────────────────
// Actors
// ─────────────────────────────────────────────────────────

/// The stakeholder kinds that may author ledger entries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Declares donations.
    Donor,
    /// Accepts donations and allocates them to clinics.
    Ngo,
    /// Declares needs and confirms receipt.
    Clinic,
    /// Read-only observer; may clear a resolved integrity fault.
    Auditor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Donor => "DONOR",
            Self::Ngo => "NGO",
            Self::Clinic => "CLINIC",
            Self::Auditor => "AUDITOR",
        }
    }

    /// Parse a role name, case-insensitively. Accepts `csr` as an alias for
    /// [`Role::Donor`].
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "donor" | "csr" => Some(Self::Donor),
            "ngo" => Some(Self::Ngo),
            "clinic" => Some(Self::Clinic),
            "auditor" => Some(Self::Auditor),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whoever issues a command. `name` is recorded as the entry's `entity_name`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub role: Role,
    pub name: String,
}

impl Actor {
    pub fn new(role: Role, name: impl Into<String>) -> Self {
        Self {
            role,
            name: name.into(),
        }
    }

    pub fn donor(name: impl Into<String>) -> Self {
        Self::new(Role::Donor, name)
    }

    pub fn ngo(name: impl Into<String>) -> Self {
        Self::new(Role::Ngo, name)
    }

    pub fn clinic(name: impl Into<String>) -> Self {
        Self::new(Role::Clinic, name)
    }

    pub fn auditor(name: impl Into<String>) -> Self {
        Self::new(Role::Auditor, name)
    }
}

// ─────────────────────────────────────────────────────────
// Entity kinds and identifiers
// ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Donation,
    Requirement,
    Allocation,
}

impl EntityKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Donation => "DON",
            Self::Requirement => "REQ",
            Self::Allocation => "ALC",
        }
    }

    /// Format the identifier for the `n`-th entity of this kind.
    pub fn format_id(&self, n: u64) -> String {
        format!("{}-{n}", self.prefix())
    }

    /// Extract `n` from an identifier of this kind; `None` for any other shape.
    pub fn parse_id(&self, id: &str) -> Option<u64> {
        let (prefix, n) = id.trim().split_once('-')?;
        if !prefix.eq_ignore_ascii_case(self.prefix()) {
            return None;
        }
        n.parse().ok().filter(|n| *n > 0)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Donation => "donation",
            Self::Requirement => "requirement",
            Self::Allocation => "allocation",
        })
    }
}

// ─────────────────────────────────────────────────────────
// Statuses
// ─────────────────────────────────────────────────────────

/// Lifecycle status of a donation.
///
/// ```text
/// Pending ──► Accepted ──► PartiallyAllocated ──► Allocated ──► InTransit ──► Received
///    │            └────────────────────────────────►┘
///    └──► Rejected
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DonationStatus {
    /// Declared by the donor; awaiting an NGO decision.
    Pending,
    /// Accepted by an NGO; fully available for allocation.
    Accepted,
    /// Declined by an NGO. Terminal.
    Rejected,
    /// Some quantity drawn; the rest still available.
    PartiallyAllocated,
    /// All quantity drawn into allocations.
    Allocated,
    /// Goods dispatched towards the clinic(s).
    InTransit,
    /// Every allocation it contributed to has been received. Terminal.
    Received,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::PartiallyAllocated => "PARTIALLY_ALLOCATED",
            Self::Allocated => "ALLOCATED",
            Self::InTransit => "IN_TRANSIT",
            Self::Received => "RECEIVED",
        }
    }
}

/// Lifecycle status of a clinic requirement.
///
/// ```text
/// Open ──► PartiallyFulfilled ──► Fulfilled
///   ├──────────────────────────►┘
///   └──► Withdrawn
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequirementStatus {
    Open,
    PartiallyFulfilled,
    /// Terminal.
    Fulfilled,
    /// Terminal.
    Withdrawn,
}

impl RequirementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::PartiallyFulfilled => "PARTIALLY_FULFILLED",
            Self::Fulfilled => "FULFILLED",
            Self::Withdrawn => "WITHDRAWN",
        }
    }
}

/// Lifecycle status of an allocation: `Created ──► InTransit ──► Received`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Created,
    InTransit,
    /// Terminal.
    Received,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::InTransit => "IN_TRANSIT",
            Self::Received => "RECEIVED",
        }
    }
}

// ─────────────────────────────────────────────────────────
// Validated scalars
// ─────────────────────────────────────────────────────────

/// Requirement urgency, 1 = critical .. 4 = routine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const CRITICAL: Priority = Priority(1);
    pub const ROUTINE: Priority = Priority(4);

    pub fn new(value: u8) -> Result<Self> {
        if (1..=4).contains(&value) {
            Ok(Self(value))
        } else {
            Err(LedgerError::Validation(format!(
                "priority must be between 1 (critical) and 4 (routine), got {value}"
            )))
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = LedgerError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.0
    }
}

/// Clinic's rating of received goods, 1..=5.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct QualityRating(u8);

impl QualityRating {
    pub fn new(value: u8) -> Result<Self> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(LedgerError::Validation(format!(
                "quality rating must be between 1 and 5, got {value}"
            )))
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for QualityRating {
    type Error = LedgerError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<QualityRating> for u8 {
    fn from(r: QualityRating) -> u8 {
        r.0
    }
}

// ─────────────────────────────────────────────────────────
// Entities
// ─────────────────────────────────────────────────────────

/// A donor-declared quantity of a named resource.
///
/// `donor_ref`, `item_name`, `quantity_total` and `created_at` never change
/// after creation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: String,
    pub donor_ref: String,
    pub item_name: String,
    pub quantity_total: u64,
    /// Always `<= quantity_total`.
    pub quantity_remaining: u64,
    pub status: DonationStatus,
    pub created_at: DateTime<Utc>,
    /// NGO that accepted or rejected the donation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ngo_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
}

impl Donation {
    /// Quantity already drawn into allocations.
    pub fn quantity_drawn(&self) -> u64 {
        self.quantity_total - self.quantity_remaining
    }
}

/// A clinic's declared need for a named resource.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClinicRequirement {
    pub id: String,
    pub clinic_ref: String,
    pub item_name: String,
    pub quantity_requested: u64,
    /// Always `<= quantity_requested`.
    pub quantity_fulfilled: u64,
    pub priority: Priority,
    pub status: RequirementStatus,
    pub created_at: DateTime<Utc>,
}

impl ClinicRequirement {
    /// Quantity still needed.
    pub fn outstanding(&self) -> u64 {
        self.quantity_requested - self.quantity_fulfilled
    }
}

/// Quantity taken from one donation by an allocation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Draw {
    pub donation_id: String,
    pub quantity: u64,
}

/// Binding of donation quantity (possibly from several donations) to a
/// requirement. Immutable once [`AllocationStatus::Received`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: String,
    pub requirement_id: String,
    /// Contributing donations in the order they were drawn from.
    pub draws: Vec<Draw>,
    /// Sum of `draws[*].quantity`.
    pub quantity: u64,
    pub status: AllocationStatus,
    pub allocated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_rating: Option<QualityRating>,
}

impl Allocation {
    pub fn donation_ids(&self) -> impl Iterator<Item = &str> {
        self.draws.iter().map(|d| d.donation_id.as_str())
    }

    /// Quantity this allocation took from `donation_id` (0 if it did not).
    pub fn drawn_from(&self, donation_id: &str) -> u64 {
        self.draws
            .iter()
            .filter(|d| d.donation_id == donation_id)
            .map(|d| d.quantity)
            .sum()
    }
}
