//! Stock ledger domain module.
//!
//! Positions, movements, request payloads and the costing rules, implemented
//! as deterministic domain logic (no IO, no storage).

pub mod costing;
pub mod movement;
pub mod payload;
pub mod position;

pub use movement::{
    ItemStatus, MovementResult, MovementStatus, MovementType, NewStockMovement,
    NewStockMovementItem, QualityCheckStatus, StockMovement, StockMovementItem, WAREHOUSE,
};
pub use payload::{GrnData, GrnItem, IssueData, IssueItem, MovementInput, DEFAULT_UOM};
pub use position::{NewStockPosition, StockPosition};
