use chrono::Utc;
use tracing::{info, instrument, Span};

use fibreflow_core::{MovementId, ProjectId, StockError, StockResult};
use fibreflow_stock::{MovementInput, StockMovement};

use super::{ensure_unique_reference, finish, insert_movement};
use crate::store::{StockStore, StockTransaction, TxMode};

/// Records bare movement headers and drives their status.
///
/// Never touches positions; quantity changes go through the GRN and issue processors.
#[derive(Debug, Clone)]
pub struct MovementCreator<S> {
    store: S,
}

impl<S> MovementCreator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: StockStore> MovementCreator<S> {
    /// Insert a movement header.
    ///
    /// Fails with `Validation` before any I/O when `project_id`, `movement_type`
    /// or `reference_number` is missing, and with `DuplicateReference` when the
    /// project already has a movement with that reference.
    #[instrument(
        skip(self, input),
        fields(project_id, reference_number, movement_type),
        err
    )]
    pub async fn create_movement(&self, input: MovementInput) -> StockResult<StockMovement> {
        let now = Utc::now();
        let movement = input.into_new_movement(now)?.into_movement(now);

        let span = Span::current();
        span.record("project_id", tracing::field::display(movement.project_id));
        span.record("reference_number", movement.reference_number.as_str());
        span.record("movement_type", movement.movement_type.as_str());

        let mut tx = self.store.begin(TxMode::ReadWrite).await?;
        let outcome = Self::insert(tx.as_mut(), movement).await;
        let movement = finish(tx, outcome).await?;

        info!(movement_id = %movement.id, status = %movement.status, "movement created");
        Ok(movement)
    }

    async fn insert(
        tx: &mut dyn StockTransaction,
        movement: StockMovement,
    ) -> StockResult<StockMovement> {
        ensure_unique_reference(tx, movement.project_id, &movement.reference_number).await?;
        insert_movement(tx, &movement).await?;
        Ok(movement)
    }

    /// Move a pending movement to completed.
    #[instrument(
        skip(self),
        fields(project_id = %project_id, movement_id = %movement_id),
        err
    )]
    pub async fn complete_movement(
        &self,
        project_id: ProjectId,
        movement_id: MovementId,
    ) -> StockResult<StockMovement> {
        let mut tx = self.store.begin(TxMode::ReadWrite).await?;
        let outcome = Self::complete(tx.as_mut(), project_id, movement_id).await;
        let movement = finish(tx, outcome).await?;

        info!("movement completed");
        Ok(movement)
    }

    async fn complete(
        tx: &mut dyn StockTransaction,
        project_id: ProjectId,
        movement_id: MovementId,
    ) -> StockResult<StockMovement> {
        let mut movement = tx
            .find_movement(project_id, movement_id)
            .await?
            .ok_or(StockError::MovementNotFound(movement_id))?;

        let next = movement.status.complete()?;
        let now = Utc::now();
        let updated = tx
            .update_movement_status(project_id, movement_id, movement.status, next, now)
            .await?;
        if !updated {
            // Someone else moved it between our read and the compare-and-set.
            return Err(StockError::InvalidTransition(format!(
                "movement {movement_id} is no longer {}",
                movement.status
            )));
        }

        movement.status = next;
        movement.updated_at = now;
        Ok(movement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStockStore;
    use fibreflow_stock::{MovementStatus, MovementType};

    fn input(project_id: ProjectId, reference: &str) -> MovementInput {
        MovementInput {
            project_id: Some(project_id),
            movement_type: Some(MovementType::Adjustment),
            reference_number: Some(reference.to_string()),
            reason: Some("cycle count".to_string()),
            ..MovementInput::default()
        }
    }

    #[tokio::test]
    async fn creates_pending_movement_by_default() {
        let store = InMemoryStockStore::new();
        let creator = MovementCreator::new(store.clone());
        let project_id = ProjectId::new();

        let movement = creator.create_movement(input(project_id, "ADJ-001")).await.unwrap();

        assert_eq!(movement.status, MovementStatus::Pending);
        assert_eq!(movement.movement_type, MovementType::Adjustment);
        assert_eq!(movement.reference_number, "ADJ-001");
        assert_eq!(store.movement_count().await, 1);
    }

    #[tokio::test]
    async fn honours_caller_supplied_status() {
        let creator = MovementCreator::new(InMemoryStockStore::new());
        let mut request = input(ProjectId::new(), "ADJ-002");
        request.status = Some(MovementStatus::Completed);

        let movement = creator.create_movement(request).await.unwrap();
        assert_eq!(movement.status, MovementStatus::Completed);
    }

    #[tokio::test]
    async fn missing_reference_number_is_rejected_before_io() {
        let store = InMemoryStockStore::new();
        // Would fail with Transaction if the store were touched.
        store.set_unavailable(true);
        let creator = MovementCreator::new(store);

        let mut request = input(ProjectId::new(), "ADJ-003");
        request.reference_number = Some("   ".to_string());

        let err = creator.create_movement(request).await.unwrap_err();
        assert_eq!(err, StockError::validation("reference_number is required"));
    }

    #[tokio::test]
    async fn duplicate_reference_is_rejected_per_project() {
        let store = InMemoryStockStore::new();
        let creator = MovementCreator::new(store.clone());
        let project_id = ProjectId::new();

        creator.create_movement(input(project_id, "ADJ-004")).await.unwrap();
        let err = creator.create_movement(input(project_id, "ADJ-004")).await.unwrap_err();
        assert_eq!(err, StockError::duplicate_reference(project_id, "ADJ-004"));

        // Same reference in another project is fine.
        creator.create_movement(input(ProjectId::new(), "ADJ-004")).await.unwrap();
        assert_eq!(store.movement_count().await, 2);
    }

    #[tokio::test]
    async fn completes_pending_movement_once() {
        let creator = MovementCreator::new(InMemoryStockStore::new());
        let project_id = ProjectId::new();
        let movement = creator.create_movement(input(project_id, "ADJ-005")).await.unwrap();

        let completed = creator.complete_movement(project_id, movement.id).await.unwrap();
        assert_eq!(completed.status, MovementStatus::Completed);

        let err = creator.complete_movement(project_id, movement.id).await.unwrap_err();
        assert!(matches!(err, StockError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn completing_unknown_movement_is_not_found() {
        let creator = MovementCreator::new(InMemoryStockStore::new());
        let movement_id = MovementId::new();

        let err = creator
            .complete_movement(ProjectId::new(), movement_id)
            .await
            .unwrap_err();
        assert_eq!(err, StockError::MovementNotFound(movement_id));
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_transaction_error() {
        let store = InMemoryStockStore::new();
        store.set_unavailable(true);
        let creator = MovementCreator::new(store);

        let err = creator
            .create_movement(input(ProjectId::new(), "ADJ-006"))
            .await
            .unwrap_err();
        assert!(matches!(err, StockError::Transaction(_)));
        assert!(err.is_retryable());
    }
}
