//! Application-wide error types.

use aidtrail_protocol::LedgerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed actor headers.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// A persisted row could not be turned back into a ledger entry.
    #[error("Corrupt ledger row {sequence}: {reason}")]
    CorruptRow { sequence: i64, reason: String },

    #[error("No ledger entry at sequence {0}")]
    EntryNotFound(u64),

    #[error("Worker task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Ledger(e) => match e {
                LedgerError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
                LedgerError::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
                LedgerError::InsufficientQuantity { .. } => {
                    (StatusCode::CONFLICT, "insufficient_quantity")
                }
                LedgerError::ConcurrencyConflict { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "concurrency_conflict")
                }
                LedgerError::ChainIntegrityFault { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "chain_integrity_fault")
                }
                LedgerError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                LedgerError::NotAuthorized(_) => (StatusCode::FORBIDDEN, "not_authorized"),
                LedgerError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            },
            Self::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            Self::Json(_) => (StatusCode::BAD_REQUEST, "json"),
            Self::EntryNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Database(_) | Self::Migrate(_) | Self::CorruptRow { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage")
            }
            Self::Config(_) | Self::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            error!(kind, error = %self, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                kind,
            }),
        )
            .into_response()
    }
}
