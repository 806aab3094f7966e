//! Error handling for the inventory ledger
//!
//! Distinguishes caller mistakes (validation), business conflicts
//! (insufficient stock), and retryable transaction-layer failures so that
//! callers can auto-retry the latter but never the former.

use thiserror::Error;

/// Ledger error types
#[derive(Error, Debug)]
pub enum LedgerError {
    // Validation errors: rejected before any write
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    // Business conflicts: rejected after read, before write
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("Insufficient reserved stock: requested {requested}, reserved {reserved}")]
    InsufficientReserved { requested: i64, reserved: i64 },

    #[error("Conflict on {resource}: {message}")]
    Conflict { resource: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Transaction-layer failures: the operation had no observable effect
    // and may be retried by the caller.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    // Internal errors
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

/// SQLSTATE codes that mean the transaction lost a race or timed out and
/// can be safely retried: serialization_failure, deadlock_detected,
/// lock_not_available, query_canceled (statement_timeout).
const RETRYABLE_SQLSTATES: [&str; 4] = ["40001", "40P01", "55P03", "57014"];

/// SQLSTATE for unique_violation.
pub(crate) const UNIQUE_VIOLATION: &str = "23505";

impl LedgerError {
    /// Whether the caller can safely retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransactionConflict(_))
    }

    /// True when the underlying database error is a unique-key violation.
    pub(crate) fn is_unique_violation(&self) -> bool {
        match self {
            LedgerError::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some(UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }

    /// The violated constraint's name, when this is a unique-key violation.
    pub(crate) fn violated_constraint(&self) -> Option<&str> {
        match self {
            LedgerError::Database(sqlx::Error::Database(db))
                if db.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                db.constraint()
            }
            _ => None,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if let Some(code) = db.code() {
                if RETRYABLE_SQLSTATES.contains(&code.as_ref()) {
                    return LedgerError::TransactionConflict(db.message().to_string());
                }
            }
        }
        LedgerError::Database(err)
    }
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
