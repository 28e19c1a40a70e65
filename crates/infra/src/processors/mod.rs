//! Ledger processors (application-level orchestration).
//!
//! Every processor call follows the same unit-of-work shape:
//!
//! ```text
//! Request
//!   ↓
//! 1. Validate the payload (no I/O)
//!   ↓
//! 2. Open one read-write transaction
//!   ↓
//! 3. Reject duplicate (project_id, reference_number)
//!   ↓
//! 4. Lock affected positions in ascending item-code order
//!   ↓
//! 5. Insert the movement, mutate positions, insert lines
//!   ↓
//! 6. Commit, or roll back on the first error
//! ```
//!
//! Processors hold no state between calls besides the injected store, so the
//! same instance may serve concurrent requests.

pub mod grn;
pub mod health;
pub mod issue;
pub mod movement_creator;

pub use grn::GrnProcessor;
pub use health::{HealthDetails, HealthState, HealthStatus, MovementHealth};
pub use issue::IssueProcessor;
pub use movement_creator::MovementCreator;

use tracing::warn;

use fibreflow_core::{ProjectId, StockError, StockResult};
use fibreflow_stock::StockMovement;

use crate::store::{StockTransaction, StoreError};

/// Commit on success, roll back on failure.
///
/// A failed rollback is logged and the original error is returned; the backend
/// discards the transaction anyway once the handle is gone.
pub(crate) async fn finish<T: Send>(
    tx: Box<dyn StockTransaction>,
    outcome: StockResult<T>,
) -> StockResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Fail with `DuplicateReference` if the project already has a movement with this reference.
pub(crate) async fn ensure_unique_reference(
    tx: &mut dyn StockTransaction,
    project_id: ProjectId,
    reference_number: &str,
) -> StockResult<()> {
    if tx
        .find_movement_by_reference(project_id, reference_number)
        .await?
        .is_some()
    {
        warn!(
            project_id = %project_id,
            reference_number,
            "duplicate movement reference rejected"
        );
        return Err(StockError::duplicate_reference(project_id, reference_number));
    }
    Ok(())
}

/// Insert a movement header, mapping a unique-constraint race onto `DuplicateReference`.
pub(crate) async fn insert_movement(
    tx: &mut dyn StockTransaction,
    movement: &StockMovement,
) -> StockResult<()> {
    match tx.insert_movement(movement).await {
        Ok(()) => Ok(()),
        Err(StoreError::Duplicate(_)) => {
            warn!(
                project_id = %movement.project_id,
                reference_number = %movement.reference_number,
                "concurrent duplicate movement reference rejected"
            );
            Err(StockError::duplicate_reference(
                movement.project_id,
                movement.reference_number.clone(),
            ))
        }
        Err(err) => Err(err.into()),
    }
}
