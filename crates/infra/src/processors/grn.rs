use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, Span};

use fibreflow_core::{MovementId, MovementItemId, ProjectId, StockError, StockResult};
use fibreflow_stock::{
    GrnData, GrnItem, ItemStatus, MovementResult, MovementStatus, MovementType, NewStockMovement,
    NewStockMovementItem, NewStockPosition, QualityCheckStatus, StockMovementItem, StockPosition,
    WAREHOUSE,
};

use super::{ensure_unique_reference, finish, insert_movement};
use crate::store::{StockStore, StockTransaction, TxMode};

/// Reference type recorded on receipts.
const PURCHASE_ORDER: &str = "PO";

/// Posts goods receipt notes: inbound stock at a weighted-average cost.
///
/// ## Execution Guarantees
///
/// - **Atomicity**: header, position updates and lines commit together or not at all
/// - **Idempotency**: a repeated `reference_number` is rejected before any write
/// - **No lost updates**: positions are row-locked (ascending item code) before mutation
#[derive(Debug, Clone)]
pub struct GrnProcessor<S> {
    store: S,
    warehouse_location: String,
}

impl<S> GrnProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            warehouse_location: WAREHOUSE.to_string(),
        }
    }

    /// Warehouse recorded on opened positions and as the receipt destination.
    pub fn with_warehouse(mut self, warehouse_location: impl Into<String>) -> Self {
        self.warehouse_location = warehouse_location.into();
        self
    }
}

impl<S: StockStore> GrnProcessor<S> {
    #[instrument(
        skip(self, grn),
        fields(
            project_id = %project_id,
            reference_number = %grn.reference_number,
            item_count = grn.items.len(),
            movement_id
        ),
        err
    )]
    pub async fn process_grn(&self, project_id: ProjectId, grn: &GrnData) -> StockResult<MovementResult> {
        grn.validate()?;

        let mut tx = self.store.begin(TxMode::ReadWrite).await?;
        let outcome = self.apply(tx.as_mut(), project_id, grn, Utc::now()).await;
        let result = finish(tx, outcome).await?;

        Span::current().record("movement_id", tracing::field::display(result.movement.id));
        info!(lines = result.items.len(), "goods receipt posted");
        Ok(result)
    }

    async fn apply(
        &self,
        tx: &mut dyn StockTransaction,
        project_id: ProjectId,
        grn: &GrnData,
        now: DateTime<Utc>,
    ) -> StockResult<MovementResult> {
        ensure_unique_reference(tx, project_id, &grn.reference_number).await?;

        let mut positions = self.lock_or_open_positions(tx, project_id, grn, now).await?;

        let movement = NewStockMovement {
            id: MovementId::new(),
            project_id,
            movement_type: MovementType::Grn,
            reference_number: grn.reference_number.clone(),
            reference_type: Some(PURCHASE_ORDER.to_string()),
            reference_id: grn.po_number.clone(),
            from_location: Some(grn.supplier_name.clone()),
            to_location: Some(self.warehouse_location.clone()),
            status: MovementStatus::Completed,
            movement_date: grn.received_date,
            requested_by: None,
            authorized_by: None,
            processed_by: grn.received_by.clone(),
            reason: None,
            notes: grn.notes.clone(),
        }
        .into_movement(now);
        insert_movement(tx, &movement).await?;

        let mut items = Vec::with_capacity(grn.items.len());
        for line in &grn.items {
            let position = positions
                .get_mut(&line.item_code)
                .ok_or_else(|| StockError::PositionNotFound(line.item_code.clone()))?;
            position.apply_receipt(line.received_quantity, line.unit_cost, now);
            tx.update_position(position).await?;
            debug!(
                item_code = %position.item_code,
                on_hand = %position.on_hand_quantity,
                average_unit_cost = %position.average_unit_cost,
                "position received"
            );
            items.push(receipt_line(movement.id, position, line, now));
        }
        for item in &items {
            tx.insert_movement_item(item).await?;
        }

        Ok(MovementResult { movement, items })
    }

    /// Lock the position of every received item code in ascending order,
    /// opening an empty one where none exists yet.
    ///
    /// Opening inserts the row, which locks its key, so new and existing
    /// positions are all acquired in the same order.
    async fn lock_or_open_positions(
        &self,
        tx: &mut dyn StockTransaction,
        project_id: ProjectId,
        grn: &GrnData,
        now: DateTime<Utc>,
    ) -> StockResult<HashMap<String, StockPosition>> {
        let mut positions = HashMap::new();
        for code in grn.item_codes() {
            let position = match tx.lock_position(project_id, code).await? {
                Some(position) => position,
                None => self.open_position(tx, project_id, grn, code, now).await?,
            };
            positions.insert(code.to_string(), position);
        }
        Ok(positions)
    }

    async fn open_position(
        &self,
        tx: &mut dyn StockTransaction,
        project_id: ProjectId,
        grn: &GrnData,
        code: &str,
        now: DateTime<Utc>,
    ) -> StockResult<StockPosition> {
        let line = grn
            .items
            .iter()
            .find(|line| line.item_code == code)
            .ok_or_else(|| StockError::PositionNotFound(code.to_string()))?;
        let opened = NewStockPosition::for_receipt_line(project_id, line, self.warehouse_location.clone(), now)
            .into_position();

        if tx.insert_position(&opened).await? {
            debug!(item_code = code, "position opened");
            return Ok(opened);
        }

        // Lost the creation race: take the committed row under lock.
        tx.lock_position(project_id, code)
            .await?
            .ok_or_else(|| StockError::PositionNotFound(code.to_string()))
    }
}

fn receipt_line(
    movement_id: MovementId,
    position: &StockPosition,
    line: &GrnItem,
    now: DateTime<Utc>,
) -> StockMovementItem {
    NewStockMovementItem {
        id: MovementItemId::new(),
        movement_id,
        position_id: position.id,
        item_code: line.item_code.clone(),
        description: Some(line.item_name.clone()),
        planned_quantity: line.planned_quantity,
        actual_quantity: line.received_quantity,
        uom: line.uom().to_string(),
        unit_cost: line.unit_cost,
        lot_numbers: line.lot_numbers.clone(),
        serial_numbers: line.serial_numbers.clone(),
        quality_check_required: line.quality_check_required,
        quality_check_status: QualityCheckStatus::for_receipt(line.quality_check_required),
        item_status: ItemStatus::Completed,
        notes: None,
    }
    .into_item(now)
}
