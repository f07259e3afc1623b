//! Protocol-wide error types.

use thiserror::Error;

use crate::lifecycle::TransitionError;
use crate::types::EntityKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Bad input shape; rejected before any mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A lifecycle guard refused the move; rejected before any mutation.
    #[error("Invalid transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    /// The allocation would overdraw a donation or overfulfil a requirement.
    #[error("Insufficient quantity: requested {requested}, available {available} ({context})")]
    InsufficientQuantity {
        requested: u64,
        available: u64,
        context: String,
    },

    /// Exclusive access could not be obtained in time. Safe to retry.
    #[error("Concurrency conflict: writer lock not acquired within {waited_ms}ms")]
    ConcurrencyConflict { waited_ms: u64 },

    /// The hash chain diverges at `sequence`. Never retried.
    #[error("Chain integrity fault: ledger diverges at sequence {sequence}")]
    ChainIntegrityFault { sequence: u64 },

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// The repository refused a write (e.g. a non-contiguous append).
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Only lock contention is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
