//! `fibreflow-core`: shared building blocks for the stock ledger.
//!
//! Identifiers and the error taxonomy. No infrastructure concerns.

pub mod error;
pub mod id;

pub use error::{StockError, StockResult};
pub use id::{MovementId, MovementItemId, PositionId, ProjectId};
