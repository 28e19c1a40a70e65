use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fibreflow_core::{MovementId, MovementItemId, PositionId, ProjectId, StockError, StockResult};

use crate::costing::extended_value;

/// Location recorded on the warehouse side of receipts and issues.
pub const WAREHOUSE: &str = "WAREHOUSE";

macro_rules! impl_text_enum {
    ($t:ty, $name:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $t {
            type Err = StockError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(StockError::validation(format!("unknown {}: '{}'", $name, other))),
                }
            }
        }
    };
}

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Grn,
    Issue,
    Transfer,
    Return,
    Adjustment,
}

impl_text_enum!(MovementType, "movement type", {
    Grn => "GRN",
    Issue => "ISSUE",
    Transfer => "TRANSFER",
    Return => "RETURN",
    Adjustment => "ADJUSTMENT",
});

/// Movement lifecycle. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    Pending,
    Completed,
}

impl_text_enum!(MovementStatus, "movement status", {
    Pending => "pending",
    Completed => "completed",
});

impl MovementStatus {
    /// `pending -> completed`; nothing else.
    pub fn complete(self) -> StockResult<Self> {
        match self {
            MovementStatus::Pending => Ok(MovementStatus::Completed),
            MovementStatus::Completed => Err(StockError::InvalidTransition(
                "movement is already completed".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityCheckStatus {
    Pending,
    Passed,
}

impl_text_enum!(QualityCheckStatus, "quality check status", {
    Pending => "pending",
    Passed => "passed",
});

impl QualityCheckStatus {
    pub fn for_receipt(quality_check_required: bool) -> Self {
        if quality_check_required {
            QualityCheckStatus::Pending
        } else {
            QualityCheckStatus::Passed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Completed,
}

impl_text_enum!(ItemStatus, "item status", {
    Pending => "pending",
    Completed => "completed",
});

/// One processed stock operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub project_id: ProjectId,
    pub movement_type: MovementType,
    pub reference_number: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub from_location: Option<String>,
    pub to_location: Option<String>,
    pub status: MovementStatus,
    pub movement_date: DateTime<Utc>,
    pub requested_by: Option<String>,
    pub authorized_by: Option<String>,
    pub processed_by: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Movement row to insert. `id` is assigned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStockMovement {
    pub id: MovementId,
    pub project_id: ProjectId,
    pub movement_type: MovementType,
    pub reference_number: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub from_location: Option<String>,
    pub to_location: Option<String>,
    pub status: MovementStatus,
    pub movement_date: DateTime<Utc>,
    pub requested_by: Option<String>,
    pub authorized_by: Option<String>,
    pub processed_by: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl NewStockMovement {
    pub fn into_movement(self, now: DateTime<Utc>) -> StockMovement {
        StockMovement {
            id: self.id,
            project_id: self.project_id,
            movement_type: self.movement_type,
            reference_number: self.reference_number,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            from_location: self.from_location,
            to_location: self.to_location,
            status: self.status,
            movement_date: self.movement_date,
            requested_by: self.requested_by,
            authorized_by: self.authorized_by,
            processed_by: self.processed_by,
            reason: self.reason,
            notes: self.notes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Line-level effect of one item within a movement. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovementItem {
    pub id: MovementItemId,
    pub movement_id: MovementId,
    pub position_id: PositionId,
    pub item_code: String,
    pub description: Option<String>,
    pub planned_quantity: Decimal,
    pub actual_quantity: Decimal,
    pub uom: String,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub lot_numbers: Vec<String>,
    pub serial_numbers: Vec<String>,
    pub quality_check_required: bool,
    pub quality_check_status: QualityCheckStatus,
    pub item_status: ItemStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Movement line to insert. `total_cost` is derived on materialisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStockMovementItem {
    pub id: MovementItemId,
    pub movement_id: MovementId,
    pub position_id: PositionId,
    pub item_code: String,
    pub description: Option<String>,
    pub planned_quantity: Decimal,
    pub actual_quantity: Decimal,
    pub uom: String,
    pub unit_cost: Decimal,
    pub lot_numbers: Vec<String>,
    pub serial_numbers: Vec<String>,
    pub quality_check_required: bool,
    pub quality_check_status: QualityCheckStatus,
    pub item_status: ItemStatus,
    pub notes: Option<String>,
}

impl NewStockMovementItem {
    pub fn total_cost(&self) -> Decimal {
        extended_value(self.actual_quantity, self.unit_cost)
    }

    pub fn into_item(self, now: DateTime<Utc>) -> StockMovementItem {
        let total_cost = self.total_cost();
        StockMovementItem {
            id: self.id,
            movement_id: self.movement_id,
            position_id: self.position_id,
            item_code: self.item_code,
            description: self.description,
            planned_quantity: self.planned_quantity,
            actual_quantity: self.actual_quantity,
            uom: self.uom,
            unit_cost: self.unit_cost,
            total_cost,
            lot_numbers: self.lot_numbers,
            serial_numbers: self.serial_numbers,
            quality_check_required: self.quality_check_required,
            quality_check_status: self.quality_check_status,
            item_status: self.item_status,
            notes: self.notes,
            created_at: now,
        }
    }
}

/// Outcome of a processed movement: the header plus its lines in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementResult {
    pub movement: StockMovement,
    pub items: Vec<StockMovementItem>,
}
