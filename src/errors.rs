//! Unified error type for the club ledger.
//!
//! Every fallible operation returns [`Result`]. Variants are grouped by
//! [`ErrorKind`] so callers can decide whether to re-prompt the user, pick a
//! different key, or report an infrastructure failure.

use crate::entities::MovementKind;
use rust_decimal::Decimal;
use thiserror::Error;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input rejected before any write; the user must correct it.
    Validation,
    /// A uniqueness or relational constraint would be violated.
    Integrity,
    /// A referenced record does not exist.
    NotFound,
    /// Storage, configuration or runtime failure.
    Infrastructure,
}

/// All errors raised by the club ledger.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Member lock poisoned")]
    LockPoisoned,

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("Invalid payment: {reason}")]
    InvalidPayment { reason: String },

    #[error("Invalid period {month}/{year}")]
    InvalidPeriod { month: i32, year: i32 },

    #[error("Category '{category}' is {category_kind} but the movement is {movement_kind}")]
    CategoryKindMismatch {
        category: String,
        category_kind: MovementKind,
        movement_kind: MovementKind,
    },

    #[error("Due {due_id} is already fully paid by this member")]
    DueAlreadySettled { due_id: i64 },

    #[error("Cashbox movement {movement_id} belongs to payment {payment_id}; change the payment instead")]
    LinkedMovement { movement_id: i64, payment_id: i64 },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("A due for period {code} and concept {concept_id} already exists")]
    DuplicateDue { code: String, concept_id: i64 },

    #[error("Payment {payment_id} already has a settlement for due {due_id}")]
    DuplicateSettlement { payment_id: i64, due_id: i64 },

    #[error("{entity} '{name}' already exists")]
    DuplicateName { entity: &'static str, name: String },

    #[error("Member not found: {id}")]
    MemberNotFound { id: i64 },

    #[error("Due not found: {id}")]
    DueNotFound { id: i64 },

    #[error("Concept not found: {id}")]
    ConceptNotFound { id: i64 },

    #[error("Payment not found: {id}")]
    PaymentNotFound { id: i64 },

    #[error("Cashbox category not found: {id}")]
    CategoryNotFound { id: i64 },

    #[error("Cashbox movement not found: {id}")]
    MovementNotFound { id: i64 },
}

impl Error {
    /// Returns the taxonomy bucket this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. }
            | Self::InvalidPayment { .. }
            | Self::InvalidPeriod { .. }
            | Self::CategoryKindMismatch { .. }
            | Self::DueAlreadySettled { .. }
            | Self::LinkedMovement { .. }
            | Self::Validation { .. } => ErrorKind::Validation,
            Self::DuplicateDue { .. }
            | Self::DuplicateSettlement { .. }
            | Self::DuplicateName { .. } => ErrorKind::Integrity,
            Self::MemberNotFound { .. }
            | Self::DueNotFound { .. }
            | Self::ConceptNotFound { .. }
            | Self::PaymentNotFound { .. }
            | Self::CategoryNotFound { .. }
            | Self::MovementNotFound { .. } => ErrorKind::NotFound,
            Self::Database(_)
            | Self::Config { .. }
            | Self::Io(_)
            | Self::EnvVar(_)
            | Self::LockPoisoned => ErrorKind::Infrastructure,
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
