//! # Lifecycle
//!
//! Pure transition functions, one per entity type:
//! `(current status, event) -> Result<next status, TransitionError>`.
//!
//! These are the only place where status legality is decided. They perform no
//! I/O and never look at storage; callers re-read the persisted status under
//! the writer lock and feed it here immediately before staging a mutation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AllocationStatus, DonationStatus, EntityKind, RequirementStatus};

/// A refused lifecycle move.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("cannot apply {event} to {entity} in state {from}")]
pub struct TransitionError {
    pub entity: EntityKind,
    pub from: String,
    pub event: String,
}

impl TransitionError {
    pub(crate) fn new(entity: EntityKind, from: &str, event: impl fmt::Display) -> Self {
        Self {
            entity,
            from: from.to_string(),
            event: event.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Donation
// ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DonationEvent {
    Accept,
    Reject,
    /// Quantity was drawn by an allocation, leaving `remaining_after`.
    Draw { remaining_after: u64 },
    Dispatch,
    Receive,
}

impl fmt::Display for DonationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => f.write_str("accept"),
            Self::Reject => f.write_str("reject"),
            Self::Draw { remaining_after } => write!(f, "draw (remaining {remaining_after})"),
            Self::Dispatch => f.write_str("dispatch"),
            Self::Receive => f.write_str("receive"),
        }
    }
}

impl DonationStatus {
    pub fn on(self, event: DonationEvent) -> Result<Self, TransitionError> {
        use DonationEvent as E;
        use DonationStatus as S;

        match (self, event) {
            (S::Pending, E::Accept) => Ok(S::Accepted),
            (S::Pending, E::Reject) => Ok(S::Rejected),
            (S::Accepted | S::PartiallyAllocated, E::Draw { remaining_after: 0 }) => {
                Ok(S::Allocated)
            }
            (S::Accepted | S::PartiallyAllocated, E::Draw { .. }) => Ok(S::PartiallyAllocated),
            (S::Allocated, E::Dispatch) => Ok(S::InTransit),
            (S::InTransit, E::Receive) => Ok(S::Received),
            (from, event) => Err(TransitionError::new(
                EntityKind::Donation,
                from.as_str(),
                event,
            )),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Received)
    }

    /// Whether quantity may currently be drawn from a donation in this state.
    pub fn is_allocatable(&self) -> bool {
        matches!(self, Self::Accepted | Self::PartiallyAllocated)
    }
}

// ─────────────────────────────────────────────────────────
// Clinic requirement
// ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequirementEvent {
    /// Allocations now cover `fulfilled` of `requested`.
    Fulfil { fulfilled: u64, requested: u64 },
    Withdraw,
}

impl fmt::Display for RequirementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fulfil {
                fulfilled,
                requested,
            } => write!(f, "fulfil ({fulfilled}/{requested})"),
            Self::Withdraw => f.write_str("withdraw"),
        }
    }
}

impl RequirementStatus {
    pub fn on(self, event: RequirementEvent) -> Result<Self, TransitionError> {
        use RequirementEvent as E;
        use RequirementStatus as S;

        match (self, event) {
            (
                S::Open | S::PartiallyFulfilled,
                E::Fulfil {
                    fulfilled,
                    requested,
                },
            ) if fulfilled > 0 && fulfilled <= requested => {
                if fulfilled == requested {
                    Ok(S::Fulfilled)
                } else {
                    Ok(S::PartiallyFulfilled)
                }
            }
            (S::Open, E::Withdraw) => Ok(S::Withdrawn),
            (from, event) => Err(TransitionError::new(
                EntityKind::Requirement,
                from.as_str(),
                event,
            )),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fulfilled | Self::Withdrawn)
    }

    pub fn accepts_allocation(&self) -> bool {
        matches!(self, Self::Open | Self::PartiallyFulfilled)
    }
}

// ─────────────────────────────────────────────────────────
// Allocation
// ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AllocationEvent {
    Dispatch,
    Receive,
}

impl fmt::Display for AllocationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dispatch => "dispatch",
            Self::Receive => "receive",
        })
    }
}

impl AllocationStatus {
    pub fn on(self, event: AllocationEvent) -> Result<Self, TransitionError> {
        use AllocationEvent as E;
        use AllocationStatus as S;

        match (self, event) {
            (S::Created, E::Dispatch) => Ok(S::InTransit),
            (S::InTransit, E::Receive) => Ok(S::Received),
            (from, event) => Err(TransitionError::new(
                EntityKind::Allocation,
                from.as_str(),
                event,
            )),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_DONATION: [DonationStatus; 7] = [
        DonationStatus::Pending,
        DonationStatus::Accepted,
        DonationStatus::Rejected,
        DonationStatus::PartiallyAllocated,
        DonationStatus::Allocated,
        DonationStatus::InTransit,
        DonationStatus::Received,
    ];

    const ALL_DONATION_EVENTS: [DonationEvent; 6] = [
        DonationEvent::Accept,
        DonationEvent::Reject,
        DonationEvent::Draw { remaining_after: 0 },
        DonationEvent::Draw { remaining_after: 5 },
        DonationEvent::Dispatch,
        DonationEvent::Receive,
    ];

    #[test]
    fn donation_happy_path() {
        let s = DonationStatus::Pending;
        let s = s.on(DonationEvent::Accept).unwrap();
        assert_eq!(s, DonationStatus::Accepted);
        let s = s.on(DonationEvent::Draw { remaining_after: 40 }).unwrap();
        assert_eq!(s, DonationStatus::PartiallyAllocated);
        let s = s.on(DonationEvent::Draw { remaining_after: 10 }).unwrap();
        assert_eq!(s, DonationStatus::PartiallyAllocated);
        let s = s.on(DonationEvent::Draw { remaining_after: 0 }).unwrap();
        assert_eq!(s, DonationStatus::Allocated);
        let s = s.on(DonationEvent::Dispatch).unwrap();
        assert_eq!(s, DonationStatus::InTransit);
        let s = s.on(DonationEvent::Receive).unwrap();
        assert_eq!(s, DonationStatus::Received);
    }

    #[test]
    fn single_draw_can_allocate_fully() {
        assert_eq!(
            DonationStatus::Accepted
                .on(DonationEvent::Draw { remaining_after: 0 })
                .unwrap(),
            DonationStatus::Allocated
        );
    }

    #[test]
    fn terminal_donation_states_refuse_everything() {
        for from in ALL_DONATION.iter().filter(|s| s.is_terminal()) {
            for event in ALL_DONATION_EVENTS {
                let err = from.on(event).unwrap_err();
                assert_eq!(err.entity, EntityKind::Donation);
                assert_eq!(err.from, from.as_str());
            }
        }
    }

    #[test]
    fn pending_donation_cannot_be_drawn_or_dispatched() {
        assert!(DonationStatus::Pending
            .on(DonationEvent::Draw { remaining_after: 1 })
            .is_err());
        assert!(DonationStatus::Pending.on(DonationEvent::Dispatch).is_err());
        assert!(DonationStatus::Accepted.on(DonationEvent::Accept).is_err());
        assert!(DonationStatus::Accepted.on(DonationEvent::Reject).is_err());
    }

    #[test]
    fn requirement_fulfilment() {
        let open = RequirementStatus::Open;
        assert_eq!(
            open.on(RequirementEvent::Fulfil {
                fulfilled: 10,
                requested: 60
            })
            .unwrap(),
            RequirementStatus::PartiallyFulfilled
        );
        assert_eq!(
            open.on(RequirementEvent::Fulfil {
                fulfilled: 60,
                requested: 60
            })
            .unwrap(),
            RequirementStatus::Fulfilled
        );
        assert!(open
            .on(RequirementEvent::Fulfil {
                fulfilled: 61,
                requested: 60
            })
            .is_err());
        assert!(open
            .on(RequirementEvent::Fulfil {
                fulfilled: 0,
                requested: 60
            })
            .is_err());
    }

    #[test]
    fn only_open_requirements_can_be_withdrawn() {
        assert_eq!(
            RequirementStatus::Open
                .on(RequirementEvent::Withdraw)
                .unwrap(),
            RequirementStatus::Withdrawn
        );
        for from in [
            RequirementStatus::PartiallyFulfilled,
            RequirementStatus::Fulfilled,
            RequirementStatus::Withdrawn,
        ] {
            assert!(from.on(RequirementEvent::Withdraw).is_err());
        }
    }

    #[test]
    fn allocation_has_no_way_back() {
        let s = AllocationStatus::Created;
        assert!(s.on(AllocationEvent::Receive).is_err());
        let s = s.on(AllocationEvent::Dispatch).unwrap();
        assert!(s.on(AllocationEvent::Dispatch).is_err());
        let s = s.on(AllocationEvent::Receive).unwrap();
        assert!(s.is_terminal());
        assert!(s.on(AllocationEvent::Dispatch).is_err());
        assert!(s.on(AllocationEvent::Receive).is_err());
    }

    #[test]
    fn transition_error_message_names_the_move() {
        let err = DonationStatus::Rejected
            .on(DonationEvent::Draw { remaining_after: 0 })
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot apply draw (remaining 0) to donation in state REJECTED"
        );
    }
}
