//! # AidTrail Protocol
//!
//! Core of the **AidTrail** donation-tracking ledger. A donated resource moves
//! through four independent stakeholders (donor, NGO, clinic, auditor) and every
//! step of that movement is recorded in a hash-chained, append-only audit ledger
//! that no single stakeholder can rewrite.
//!
//! | Phase        | Entry Point(s)                                             |
//! |--------------|------------------------------------------------------------|
//! | Donation     | [`AidLedger::create_donation`], [`AidLedger::decide_donation`] |
//! | Need         | [`AidLedger::create_requirement`], [`AidLedger::withdraw_requirement`] |
//! | Matching     | [`AidLedger::allocate`], [`AidLedger::candidate_donations`] |
//! | Delivery     | [`AidLedger::mark_in_transit`], [`AidLedger::confirm_receipt`] |
//! | Audit        | [`AidLedger::get_audit_trail`], [`AidLedger::verify_chain`], [`AidLedger::ledger_stats`] |
//!
//! ## Architecture
//!
//! Status legality lives only in [`lifecycle`]. Quantity reservation lives only
//! in [`matcher`]. Hashing and canonical payloads live in [`ledger`]. Storage is
//! the injected [`storage::Repository`] trait. [`service`] wires them together
//! under a single-writer lock so that an entity mutation and its ledger entry
//! are always committed as one [`storage::WriteBatch`].
//!
//! Nothing in this crate performs I/O; durability is the caller's concern (see
//! the `ledger_api` backend, which mirrors entries to SQLite and rebuilds state
//! with [`AidLedger::restore`]).

pub mod clock;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod matcher;
pub mod participants;
pub mod rbac;
pub mod replay;
pub mod service;
pub mod storage;
pub mod transaction;
pub mod types;
pub mod verify;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_ledger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{LedgerError, Result};
pub use events::LedgerAction;
pub use ledger::{LedgerEntry, GENESIS_HASH};
pub use lifecycle::TransitionError;
pub use participants::{participants, Participant};
pub use service::{AidLedger, LedgerConfig};
pub use storage::{MemoryRepository, Repository, WriteBatch};
pub use types::{
    Actor, Allocation, AllocationStatus, ClinicRequirement, Donation, DonationStatus, Draw,
    EntityKind, Priority, QualityRating, RequirementStatus, Role,
};
pub use verify::{ChainReport, LedgerStats, TrailFilter, TrailOrder};
