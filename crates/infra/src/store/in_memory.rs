use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use fibreflow_core::{MovementId, ProjectId};
use fibreflow_stock::{MovementStatus, StockMovement, StockMovementItem, StockPosition};

use super::r#trait::{StockStore, StockTransaction, StoreError, TxMode};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PositionKey {
    project_id: ProjectId,
    item_code: String,
}

impl PositionKey {
    fn new(project_id: ProjectId, item_code: &str) -> Self {
        Self {
            project_id,
            item_code: item_code.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct LedgerTables {
    positions: HashMap<PositionKey, StockPosition>,
    movements: Vec<StockMovement>,
    items: Vec<StockMovementItem>,
}

/// Fault switches for exercising failure paths; only tests can set them.
#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    /// Fail the n-th movement-item insert of a transaction (0 = never).
    fail_item_insert_at: AtomicUsize,
}

/// In-memory stock store.
///
/// Intended for tests/dev. Not optimized for performance: a transaction holds
/// the store's single lock for its whole lifetime and works on a private copy
/// of the tables, which is written back on commit and dropped otherwise. This
/// makes every transaction serializable.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    tables: Arc<Mutex<LedgerTables>>,
    faults: Arc<Faults>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl InMemoryStockStore {
    /// Make `begin` fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the n-th movement-item insert of each transaction fail (0 disables).
    pub fn fail_item_insert_at(&self, n: usize) {
        self.faults.fail_item_insert_at.store(n, Ordering::SeqCst);
    }

    /// Committed movement count across all projects.
    pub async fn movement_count(&self) -> usize {
        self.tables.lock().await.movements.len()
    }
}

#[async_trait::async_trait]
impl StockStore for InMemoryStockStore {
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn StockTransaction>, StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Database("store unavailable".to_string()));
        }
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryStockTransaction {
            guard,
            working,
            mode,
            faults: self.faults.clone(),
            item_inserts: 0,
        }))
    }
}

/// Open in-memory transaction.
#[derive(Debug)]
pub struct InMemoryStockTransaction {
    guard: OwnedMutexGuard<LedgerTables>,
    working: LedgerTables,
    mode: TxMode,
    faults: Arc<Faults>,
    item_inserts: usize,
}

impl InMemoryStockTransaction {
    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(StoreError::ReadOnly),
        }
    }

    fn position(&self, project_id: ProjectId, item_code: &str) -> Option<StockPosition> {
        self.working
            .positions
            .get(&PositionKey::new(project_id, item_code))
            .cloned()
    }
}

#[async_trait::async_trait]
impl StockTransaction for InMemoryStockTransaction {
    async fn lock_position(
        &mut self,
        project_id: ProjectId,
        item_code: &str,
    ) -> Result<Option<StockPosition>, StoreError> {
        // The whole store is already held exclusively.
        Ok(self.position(project_id, item_code))
    }

    async fn find_position(
        &mut self,
        project_id: ProjectId,
        item_code: &str,
    ) -> Result<Option<StockPosition>, StoreError> {
        Ok(self.position(project_id, item_code))
    }

    async fn list_positions(&mut self, project_id: ProjectId) -> Result<Vec<StockPosition>, StoreError> {
        let mut positions: Vec<StockPosition> = self
            .working
            .positions
            .values()
            .filter(|p| p.project_id == project_id && p.is_active)
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.item_code.cmp(&b.item_code));
        Ok(positions)
    }

    async fn insert_position(&mut self, position: &StockPosition) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        let key = PositionKey::new(position.project_id, &position.item_code);
        if self.working.positions.contains_key(&key) {
            return Ok(false);
        }
        self.working.positions.insert(key, position.clone());
        Ok(true)
    }

    async fn update_position(&mut self, position: &StockPosition) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let key = PositionKey::new(position.project_id, &position.item_code);
        match self.working.positions.get_mut(&key) {
            Some(existing) if existing.id == position.id => {
                *existing = position.clone();
                Ok(())
            }
            _ => Err(StoreError::Database(format!(
                "position {} does not exist",
                position.id
            ))),
        }
    }

    async fn find_movement_by_reference(
        &mut self,
        project_id: ProjectId,
        reference_number: &str,
    ) -> Result<Option<StockMovement>, StoreError> {
        Ok(self
            .working
            .movements
            .iter()
            .find(|m| m.project_id == project_id && m.reference_number == reference_number)
            .cloned())
    }

    async fn find_movement(
        &mut self,
        project_id: ProjectId,
        movement_id: MovementId,
    ) -> Result<Option<StockMovement>, StoreError> {
        Ok(self
            .working
            .movements
            .iter()
            .find(|m| m.project_id == project_id && m.id == movement_id)
            .cloned())
    }

    async fn list_movements(&mut self, project_id: ProjectId) -> Result<Vec<StockMovement>, StoreError> {
        // Insertion order is chronological; reverse for newest first.
        Ok(self
            .working
            .movements
            .iter()
            .rev()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let exists = self.working.movements.iter().any(|m| {
            m.project_id == movement.project_id && m.reference_number == movement.reference_number
        });
        if exists {
            return Err(StoreError::Duplicate(format!(
                "movement reference '{}' already exists",
                movement.reference_number
            )));
        }
        self.working.movements.push(movement.clone());
        Ok(())
    }

    async fn update_movement_status(
        &mut self,
        project_id: ProjectId,
        movement_id: MovementId,
        from: MovementStatus,
        to: MovementStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        let movement = self
            .working
            .movements
            .iter_mut()
            .find(|m| m.project_id == project_id && m.id == movement_id && m.status == from);
        match movement {
            Some(m) => {
                m.status = to;
                m.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_movement_item(&mut self, item: &StockMovementItem) -> Result<(), StoreError> {
        self.ensure_writable()?;
        self.item_inserts += 1;
        let fail_at = self.faults.fail_item_insert_at.load(Ordering::SeqCst);
        if fail_at != 0 && self.item_inserts == fail_at {
            return Err(StoreError::Database("injected movement item failure".to_string()));
        }
        if !self.working.movements.iter().any(|m| m.id == item.movement_id) {
            return Err(StoreError::Database(format!(
                "movement {} does not exist",
                item.movement_id
            )));
        }
        self.working.items.push(item.clone());
        Ok(())
    }

    async fn movement_items(&mut self, movement_id: MovementId) -> Result<Vec<StockMovementItem>, StoreError> {
        Ok(self
            .working
            .items
            .iter()
            .filter(|i| i.movement_id == movement_id)
            .cloned()
            .collect())
    }

    async fn probe(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut guard = this.guard;
        if this.mode == TxMode::ReadWrite {
            *guard = this.working;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Dropping the working copy discards every write.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibreflow_core::MovementId;
    use fibreflow_stock::{MovementType, NewStockMovement};

    fn movement(project_id: ProjectId, reference: &str) -> StockMovement {
        NewStockMovement {
            id: MovementId::new(),
            project_id,
            movement_type: MovementType::Adjustment,
            reference_number: reference.to_string(),
            reference_type: None,
            reference_id: None,
            from_location: None,
            to_location: None,
            status: MovementStatus::Pending,
            movement_date: Utc::now(),
            requested_by: None,
            authorized_by: None,
            processed_by: None,
            reason: None,
            notes: None,
        }
        .into_movement(Utc::now())
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = InMemoryStockStore::new();
        let project_id = ProjectId::new();

        let mut tx = store.begin(TxMode::ReadWrite).await.unwrap();
        tx.insert_movement(&movement(project_id, "ADJ-1")).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin(TxMode::ReadWrite).await.unwrap();
        tx.insert_movement(&movement(project_id, "ADJ-2")).await.unwrap();
        drop(tx);

        assert_eq!(store.movement_count().await, 0);
    }

    #[tokio::test]
    async fn committed_writes_are_visible_to_later_transactions() {
        let store = InMemoryStockStore::new();
        let project_id = ProjectId::new();

        let mut tx = store.begin(TxMode::ReadWrite).await.unwrap();
        tx.insert_movement(&movement(project_id, "ADJ-1")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(TxMode::ReadOnly).await.unwrap();
        let found = tx.find_movement_by_reference(project_id, "ADJ-1").await.unwrap();
        assert!(found.is_some());
        let other_project = tx.find_movement_by_reference(ProjectId::new(), "ADJ-1").await.unwrap();
        assert!(other_project.is_none());
    }

    #[tokio::test]
    async fn duplicate_reference_insert_is_rejected() {
        let store = InMemoryStockStore::new();
        let project_id = ProjectId::new();

        let mut tx = store.begin(TxMode::ReadWrite).await.unwrap();
        tx.insert_movement(&movement(project_id, "ADJ-1")).await.unwrap();
        let err = tx.insert_movement(&movement(project_id, "ADJ-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn read_only_transactions_reject_writes() {
        let store = InMemoryStockStore::new();
        let mut tx = store.begin(TxMode::ReadOnly).await.unwrap();
        let err = tx.insert_movement(&movement(ProjectId::new(), "ADJ-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly));
    }
}
