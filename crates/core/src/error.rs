//! Stock ledger error model.

use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::{MovementId, ProjectId};

/// Result type used across the stock ledger.
pub type StockResult<T> = Result<T, StockError>;

/// Error returned by every ledger operation.
///
/// Business failures (`Validation`, `DuplicateReference`, `InsufficientStock`,
/// `InvalidTransition`) are deterministic and raised before any mutation.
/// `Transaction` wraps an underlying store failure; the operation has been
/// rolled back when it is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// A required field was missing or a value was out of range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A movement with the same reference number already exists in the project.
    #[error("duplicate reference '{reference_number}' in project {project_id}")]
    DuplicateReference {
        project_id: ProjectId,
        reference_number: String,
    },

    /// Not enough available stock to satisfy an issue.
    #[error("insufficient stock for '{item_code}': requested {requested}, available {available}")]
    InsufficientStock {
        item_code: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("movement {0} not found")]
    MovementNotFound(MovementId),

    #[error("stock position '{0}' not found")]
    PositionNotFound(String),

    /// A movement status change that the state machine does not allow.
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    /// Movement type has no processor (transfer, return).
    #[error("movement type {0} is not supported")]
    Unsupported(String),

    /// The underlying store failed; the transaction was rolled back.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// The operation exceeded its deadline and was abandoned.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StockError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn duplicate_reference(project_id: ProjectId, reference_number: impl Into<String>) -> Self {
        Self::DuplicateReference {
            project_id,
            reference_number: reference_number.into(),
        }
    }

    pub fn insufficient_stock(
        item_code: impl Into<String>,
        requested: Decimal,
        available: Decimal,
    ) -> Self {
        Self::InsufficientStock {
            item_code: item_code.into(),
            requested,
            available,
        }
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Whether a caller may retry the same request and expect a different outcome.
    ///
    /// Only store failures and timeouts qualify; every other variant is
    /// deterministic for the same input and ledger state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transaction(_) | Self::Timeout(_))
    }
}
