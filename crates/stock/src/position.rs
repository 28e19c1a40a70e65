use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fibreflow_core::{PositionId, ProjectId, StockError, StockResult};

use crate::costing::{extended_value, weighted_average_cost};
use crate::payload::GrnItem;

/// Current quantity-and-cost ledger entry for one item within one project.
///
/// Invariants (checked by [`StockPosition::check_invariants`]):
/// - `available_quantity == on_hand_quantity - reserved_quantity`
/// - `total_value == on_hand_quantity * average_unit_cost`
/// - `on_hand_quantity >= 0`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPosition {
    pub id: PositionId,
    pub project_id: ProjectId,
    pub item_code: String,
    pub item_name: String,
    pub uom: String,
    pub on_hand_quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub available_quantity: Decimal,
    pub average_unit_cost: Decimal,
    pub total_value: Decimal,
    pub warehouse_location: String,
    pub last_movement_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for a position opened by the first receipt of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStockPosition {
    pub id: PositionId,
    pub project_id: ProjectId,
    pub item_code: String,
    pub item_name: String,
    pub uom: String,
    pub average_unit_cost: Decimal,
    pub warehouse_location: String,
    pub opened_at: DateTime<Utc>,
}

impl NewStockPosition {
    /// Empty position for the item on `line`, costed at the line's unit cost.
    ///
    /// The received quantity is not included; it lands through
    /// [`StockPosition::apply_receipt`] like any later receipt.
    pub fn for_receipt_line(
        project_id: ProjectId,
        line: &GrnItem,
        warehouse_location: impl Into<String>,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PositionId::new(),
            project_id,
            item_code: line.item_code.clone(),
            item_name: line.item_name.clone(),
            uom: line.uom().to_string(),
            average_unit_cost: line.unit_cost,
            warehouse_location: warehouse_location.into(),
            opened_at,
        }
    }

    /// Materialise the row as it will be stored.
    pub fn into_position(self) -> StockPosition {
        StockPosition {
            id: self.id,
            project_id: self.project_id,
            item_code: self.item_code,
            item_name: self.item_name,
            uom: self.uom,
            on_hand_quantity: Decimal::ZERO,
            reserved_quantity: Decimal::ZERO,
            available_quantity: Decimal::ZERO,
            average_unit_cost: self.average_unit_cost,
            total_value: Decimal::ZERO,
            warehouse_location: self.warehouse_location,
            last_movement_date: None,
            is_active: true,
            created_at: self.opened_at,
            updated_at: self.opened_at,
        }
    }
}

impl StockPosition {
    /// Quantity an issue may draw. Deactivated positions offer nothing.
    pub fn issuable_quantity(&self) -> Decimal {
        if self.is_active {
            self.available_quantity
        } else {
            Decimal::ZERO
        }
    }

    /// Apply a goods receipt: add quantity and re-average cost.
    pub fn apply_receipt(&mut self, quantity: Decimal, unit_cost: Decimal, at: DateTime<Utc>) {
        let new_on_hand = self.on_hand_quantity + quantity;
        self.average_unit_cost =
            weighted_average_cost(self.on_hand_quantity, self.average_unit_cost, quantity, unit_cost);
        self.on_hand_quantity = new_on_hand;
        self.is_active = true;
        self.touch(at);
    }

    /// Apply an issue: remove quantity, keep average cost.
    ///
    /// Fails with `InsufficientStock` rather than letting on-hand go negative.
    pub fn apply_issue(&mut self, quantity: Decimal, at: DateTime<Utc>) -> StockResult<()> {
        if quantity > self.issuable_quantity() {
            return Err(StockError::insufficient_stock(
                self.item_code.clone(),
                quantity,
                self.issuable_quantity(),
            ));
        }
        self.on_hand_quantity -= quantity;
        self.touch(at);
        Ok(())
    }

    /// Stop offering the position for issue. The row is kept.
    pub fn deactivate(&mut self, at: DateTime<Utc>) {
        self.is_active = false;
        self.updated_at = at;
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.available_quantity = self.on_hand_quantity - self.reserved_quantity;
        self.total_value = extended_value(self.on_hand_quantity, self.average_unit_cost);
        self.last_movement_date = Some(at);
        self.updated_at = at;
    }

    pub fn check_invariants(&self) -> StockResult<()> {
        if self.on_hand_quantity < Decimal::ZERO {
            return Err(StockError::validation(format!(
                "on-hand quantity of '{}' is negative",
                self.item_code
            )));
        }
        if self.available_quantity != self.on_hand_quantity - self.reserved_quantity {
            return Err(StockError::validation(format!(
                "available quantity of '{}' does not equal on-hand minus reserved",
                self.item_code
            )));
        }
        if self.total_value != extended_value(self.on_hand_quantity, self.average_unit_cost) {
            return Err(StockError::validation(format!(
                "total value of '{}' does not equal on-hand times average cost",
                self.item_code
            )));
        }
        Ok(())
    }
}
