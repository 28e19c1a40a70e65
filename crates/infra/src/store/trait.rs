use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use fibreflow_core::{MovementId, ProjectId, StockError};
use fibreflow_stock::{MovementStatus, StockMovement, StockMovementItem, StockPosition};

/// Store operation error.
///
/// These are **infrastructure errors** (connectivity, constraint violations,
/// corrupt rows) as opposed to ledger business errors. Processors convert them
/// into `StockError::Transaction` after rolling back, except `Duplicate` on a
/// movement insert, which becomes `StockError::DuplicateReference`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// A write was attempted in a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// A persisted row could not be mapped onto a domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Any other backend failure (connection, timeout, deadlock, ...).
    #[error("database error: {0}")]
    Database(String),
}

impl From<StoreError> for StockError {
    fn from(value: StoreError) -> Self {
        StockError::transaction(value.to_string())
    }
}

/// Access mode requested when opening a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TxMode {
    ReadWrite,
    ReadOnly,
}

/// Factory for transaction-scoped store handles.
///
/// Every ledger operation opens exactly one transaction, performs all of its
/// reads and writes through it, and then commits or rolls back. Dropping a
/// handle without committing must discard its writes.
#[async_trait::async_trait]
pub trait StockStore: Send + Sync {
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn StockTransaction>, StoreError>;
}

#[async_trait::async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn StockTransaction>, StoreError> {
        (**self).begin(mode).await
    }
}

/// One open transaction against the three ledger tables.
///
/// ## Locking
///
/// `lock_position` reads a position and holds an exclusive row lock on it until
/// the transaction ends, so read-modify-write cycles on the same
/// `(project_id, item_code)` from concurrent transactions serialize instead of
/// losing updates. Plain `find_*`/`list_*` reads take no locks.
///
/// ## Creation races
///
/// `insert_position` returns `false` instead of failing when a row for the same
/// `(project_id, item_code)` already exists (typically created by a concurrent
/// transaction that has since committed). Callers re-read with `lock_position`.
#[async_trait::async_trait]
pub trait StockTransaction: Send {
    /// Read a position and lock it for update.
    async fn lock_position(
        &mut self,
        project_id: ProjectId,
        item_code: &str,
    ) -> Result<Option<StockPosition>, StoreError>;

    async fn find_position(
        &mut self,
        project_id: ProjectId,
        item_code: &str,
    ) -> Result<Option<StockPosition>, StoreError>;

    /// Active positions of a project, ordered by item code.
    async fn list_positions(&mut self, project_id: ProjectId) -> Result<Vec<StockPosition>, StoreError>;

    /// Insert a new position. `Ok(false)` if one already exists for the key.
    async fn insert_position(&mut self, position: &StockPosition) -> Result<bool, StoreError>;

    /// Persist quantities, costs, activity flag and timestamps of an existing position.
    async fn update_position(&mut self, position: &StockPosition) -> Result<(), StoreError>;

    async fn find_movement_by_reference(
        &mut self,
        project_id: ProjectId,
        reference_number: &str,
    ) -> Result<Option<StockMovement>, StoreError>;

    async fn find_movement(
        &mut self,
        project_id: ProjectId,
        movement_id: MovementId,
    ) -> Result<Option<StockMovement>, StoreError>;

    /// Movements of a project, newest first.
    async fn list_movements(&mut self, project_id: ProjectId) -> Result<Vec<StockMovement>, StoreError>;

    /// Insert a movement. Fails with `Duplicate` if `(project_id, reference_number)` exists.
    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError>;

    /// Compare-and-set the movement status. `Ok(false)` if it was not `from`.
    async fn update_movement_status(
        &mut self,
        project_id: ProjectId,
        movement_id: MovementId,
        from: MovementStatus,
        to: MovementStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn insert_movement_item(&mut self, item: &StockMovementItem) -> Result<(), StoreError>;

    /// Lines of a movement in insertion order.
    async fn movement_items(&mut self, movement_id: MovementId) -> Result<Vec<StockMovementItem>, StoreError>;

    /// Trivial read against the movements table.
    async fn probe(&mut self) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
