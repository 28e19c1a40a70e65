use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn, Span};

use fibreflow_core::{MovementId, MovementItemId, ProjectId, StockError, StockResult};
use fibreflow_stock::{
    IssueData, IssueItem, ItemStatus, MovementResult, MovementStatus, MovementType,
    NewStockMovement, NewStockMovementItem, QualityCheckStatus, StockMovementItem, StockPosition,
    WAREHOUSE,
};

use super::{ensure_unique_reference, finish, insert_movement};
use crate::store::{StockStore, StockTransaction, TxMode};

/// Reference type recorded on issues.
const WORK_ORDER: &str = "WORK_ORDER";

/// Posts outbound issues against existing positions.
///
/// An issue is all-or-nothing: every position it draws from is locked and
/// checked before the first write, so one short line fails the whole issue
/// with no position touched. Average cost never changes on issue.
#[derive(Debug, Clone)]
pub struct IssueProcessor<S> {
    store: S,
    warehouse_location: String,
}

impl<S> IssueProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            warehouse_location: WAREHOUSE.to_string(),
        }
    }

    /// Warehouse recorded as the source of issued stock.
    pub fn with_warehouse(mut self, warehouse_location: impl Into<String>) -> Self {
        self.warehouse_location = warehouse_location.into();
        self
    }
}

impl<S: StockStore> IssueProcessor<S> {
    #[instrument(
        skip(self, issue),
        fields(
            project_id = %project_id,
            reference_number = %issue.reference_number,
            item_count = issue.items.len(),
            movement_id
        ),
        err
    )]
    pub async fn process_issue(&self, project_id: ProjectId, issue: &IssueData) -> StockResult<MovementResult> {
        issue.validate()?;

        let mut tx = self.store.begin(TxMode::ReadWrite).await?;
        let outcome = self.apply(tx.as_mut(), project_id, issue, Utc::now()).await;
        let result = finish(tx, outcome).await?;

        Span::current().record("movement_id", tracing::field::display(result.movement.id));
        info!(lines = result.items.len(), "issue posted");
        Ok(result)
    }

    async fn apply(
        &self,
        tx: &mut dyn StockTransaction,
        project_id: ProjectId,
        issue: &IssueData,
        now: DateTime<Utc>,
    ) -> StockResult<MovementResult> {
        ensure_unique_reference(tx, project_id, &issue.reference_number).await?;

        let mut positions = Self::reserve_positions(tx, project_id, issue).await?;

        let movement = NewStockMovement {
            id: MovementId::new(),
            project_id,
            movement_type: MovementType::Issue,
            reference_number: issue.reference_number.clone(),
            reference_type: Some(WORK_ORDER.to_string()),
            reference_id: issue.work_order_number.clone(),
            from_location: Some(self.warehouse_location.clone()),
            to_location: Some(issue.issued_to.clone()),
            status: MovementStatus::Completed,
            movement_date: issue.issue_date,
            requested_by: None,
            authorized_by: None,
            processed_by: issue.issued_by.clone(),
            reason: issue.purpose.clone(),
            notes: None,
        }
        .into_movement(now);
        insert_movement(tx, &movement).await?;

        let mut items = Vec::with_capacity(issue.items.len());
        for line in &issue.items {
            let position = positions
                .get_mut(&line.item_code)
                .ok_or_else(|| StockError::PositionNotFound(line.item_code.clone()))?;
            position.apply_issue(line.issued_quantity, now)?;
            tx.update_position(position).await?;
            debug!(
                item_code = %position.item_code,
                on_hand = %position.on_hand_quantity,
                "position issued"
            );
            items.push(issue_line(movement.id, position, line, now));
        }
        for item in &items {
            tx.insert_movement_item(item).await?;
        }

        Ok(MovementResult { movement, items })
    }

    /// Lock every drawn position and check the summed quantity per item code.
    async fn reserve_positions(
        tx: &mut dyn StockTransaction,
        project_id: ProjectId,
        issue: &IssueData,
    ) -> StockResult<HashMap<String, StockPosition>> {
        let mut positions = HashMap::new();
        for (code, requested) in issue.issued_by_item_code() {
            let Some(position) = tx.lock_position(project_id, code).await? else {
                // Nothing was ever received, so even a zero-quantity line fails.
                warn!(item_code = code, %requested, "no stock position");
                return Err(StockError::insufficient_stock(code, requested, Decimal::ZERO));
            };
            let available = position.issuable_quantity();
            if requested > available {
                warn!(item_code = code, %requested, %available, "insufficient stock");
                return Err(StockError::insufficient_stock(code, requested, available));
            }
            positions.insert(code.to_string(), position);
        }
        Ok(positions)
    }
}

fn issue_line(
    movement_id: MovementId,
    position: &StockPosition,
    line: &IssueItem,
    now: DateTime<Utc>,
) -> StockMovementItem {
    NewStockMovementItem {
        id: MovementItemId::new(),
        movement_id,
        position_id: position.id,
        item_code: line.item_code.clone(),
        description: Some(position.item_name.clone()),
        planned_quantity: line.requested_quantity,
        actual_quantity: line.issued_quantity,
        uom: position.uom.clone(),
        unit_cost: line.unit_cost.unwrap_or(position.average_unit_cost),
        lot_numbers: line.lot_numbers.clone(),
        serial_numbers: line.serial_numbers.clone(),
        quality_check_required: false,
        quality_check_status: QualityCheckStatus::Passed,
        item_status: ItemStatus::Completed,
        notes: line.notes.clone(),
    }
    .into_item(now)
}
