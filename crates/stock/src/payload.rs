//! Typed request payloads and their pre-I/O validation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fibreflow_core::{MovementId, ProjectId, StockError, StockResult};

use crate::movement::{MovementStatus, MovementType, NewStockMovement};

/// Unit of measure used when a receipt line does not name one.
pub const DEFAULT_UOM: &str = "EA";

/// Generic movement creation input (manual entry / adjustments).
///
/// The identifying fields are optional so that a missing value surfaces as a
/// `Validation` error instead of a deserialization failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementInput {
    pub project_id: Option<ProjectId>,
    pub movement_type: Option<MovementType>,
    pub reference_number: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub from_location: Option<String>,
    pub to_location: Option<String>,
    pub status: Option<MovementStatus>,
    pub movement_date: Option<DateTime<Utc>>,
    pub requested_by: Option<String>,
    pub authorized_by: Option<String>,
    pub processed_by: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl MovementInput {
    /// Validate and build the row to insert. Status defaults to `Pending`.
    pub fn into_new_movement(self, now: DateTime<Utc>) -> StockResult<NewStockMovement> {
        let project_id = self
            .project_id
            .ok_or_else(|| StockError::validation("project_id is required"))?;
        let movement_type = self
            .movement_type
            .ok_or_else(|| StockError::validation("movement_type is required"))?;
        let reference_number = required_text(self.reference_number, "reference_number")?;

        Ok(NewStockMovement {
            id: MovementId::new(),
            project_id,
            movement_type,
            reference_number,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            from_location: self.from_location,
            to_location: self.to_location,
            status: self.status.unwrap_or(MovementStatus::Pending),
            movement_date: self.movement_date.unwrap_or(now),
            requested_by: self.requested_by,
            authorized_by: self.authorized_by,
            processed_by: self.processed_by,
            reason: self.reason,
            notes: self.notes,
        })
    }
}

/// Goods receipt note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnData {
    pub reference_number: String,
    #[serde(default)]
    pub po_number: Option<String>,
    pub supplier_name: String,
    #[serde(default)]
    pub received_by: Option<String>,
    pub received_date: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
    pub items: Vec<GrnItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnItem {
    pub item_code: String,
    pub item_name: String,
    #[serde(default)]
    pub uom: Option<String>,
    pub planned_quantity: Decimal,
    pub received_quantity: Decimal,
    pub unit_cost: Decimal,
    #[serde(default)]
    pub lot_numbers: Vec<String>,
    #[serde(default)]
    pub serial_numbers: Vec<String>,
    #[serde(default)]
    pub quality_check_required: bool,
}

impl GrnItem {
    pub fn uom(&self) -> &str {
        self.uom.as_deref().unwrap_or(DEFAULT_UOM)
    }
}

impl GrnData {
    pub fn validate(&self) -> StockResult<()> {
        ensure_text(&self.reference_number, "reference_number")?;
        ensure_text(&self.supplier_name, "supplier_name")?;
        if self.items.is_empty() {
            return Err(StockError::validation("GRN must contain at least one item"));
        }
        for (idx, item) in self.items.iter().enumerate() {
            ensure_text(&item.item_code, &format!("items[{idx}].item_code"))?;
            ensure_non_negative(item.planned_quantity, &format!("items[{idx}].planned_quantity"))?;
            ensure_non_negative(item.received_quantity, &format!("items[{idx}].received_quantity"))?;
            ensure_non_negative(item.unit_cost, &format!("items[{idx}].unit_cost"))?;
        }
        Ok(())
    }

    /// Distinct item codes in ascending order (the lock acquisition order).
    pub fn item_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.items.iter().map(|i| i.item_code.as_str()).collect();
        codes.sort_unstable();
        codes.dedup();
        codes
    }
}

/// Outbound issue to a work order or assignee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueData {
    pub reference_number: String,
    #[serde(default)]
    pub work_order_number: Option<String>,
    pub issued_to: String,
    #[serde(default)]
    pub issued_by: Option<String>,
    pub issue_date: DateTime<Utc>,
    #[serde(default)]
    pub purpose: Option<String>,
    pub items: Vec<IssueItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueItem {
    pub item_code: String,
    pub requested_quantity: Decimal,
    pub issued_quantity: Decimal,
    /// Overrides the position's average cost on this line when present.
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
    #[serde(default)]
    pub lot_numbers: Vec<String>,
    #[serde(default)]
    pub serial_numbers: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl IssueData {
    pub fn validate(&self) -> StockResult<()> {
        ensure_text(&self.reference_number, "reference_number")?;
        ensure_text(&self.issued_to, "issued_to")?;
        if self.items.is_empty() {
            return Err(StockError::validation("issue must contain at least one item"));
        }
        for (idx, item) in self.items.iter().enumerate() {
            ensure_text(&item.item_code, &format!("items[{idx}].item_code"))?;
            ensure_non_negative(item.requested_quantity, &format!("items[{idx}].requested_quantity"))?;
            ensure_non_negative(item.issued_quantity, &format!("items[{idx}].issued_quantity"))?;
            if let Some(cost) = item.unit_cost {
                ensure_non_negative(cost, &format!("items[{idx}].unit_cost"))?;
            }
        }
        Ok(())
    }

    /// Issued quantity summed per item code, keyed in ascending code order.
    pub fn issued_by_item_code(&self) -> BTreeMap<&str, Decimal> {
        let mut totals = BTreeMap::new();
        for item in &self.items {
            *totals.entry(item.item_code.as_str()).or_insert(Decimal::ZERO) += item.issued_quantity;
        }
        totals
    }
}

fn required_text(value: Option<String>, field: &str) -> StockResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(StockError::validation(format!("{field} is required"))),
    }
}

fn ensure_text(value: &str, field: &str) -> StockResult<()> {
    if value.trim().is_empty() {
        return Err(StockError::validation(format!("{field} is required")));
    }
    Ok(())
}

fn ensure_non_negative(value: Decimal, field: &str) -> StockResult<()> {
    if value < Decimal::ZERO {
        return Err(StockError::validation(format!("{field} cannot be negative")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn grn_item(code: &str) -> GrnItem {
        GrnItem {
            item_code: code.to_string(),
            item_name: code.to_string(),
            uom: None,
            planned_quantity: dec!(10),
            received_quantity: dec!(10),
            unit_cost: dec!(1),
            lot_numbers: vec![],
            serial_numbers: vec![],
            quality_check_required: false,
        }
    }

    fn issue_item(code: &str, qty: Decimal) -> IssueItem {
        IssueItem {
            item_code: code.to_string(),
            requested_quantity: qty,
            issued_quantity: qty,
            unit_cost: None,
            lot_numbers: vec![],
            serial_numbers: vec![],
            notes: None,
        }
    }

    #[test]
    fn movement_input_requires_identifying_fields() {
        let now = Utc::now();
        let missing_project = MovementInput {
            movement_type: Some(MovementType::Adjustment),
            reference_number: Some("ADJ-1".to_string()),
            ..MovementInput::default()
        };
        assert_eq!(
            missing_project.into_new_movement(now).unwrap_err(),
            StockError::validation("project_id is required")
        );

        let blank_reference = MovementInput {
            project_id: Some(ProjectId::new()),
            movement_type: Some(MovementType::Adjustment),
            reference_number: Some("  ".to_string()),
            ..MovementInput::default()
        };
        assert_eq!(
            blank_reference.into_new_movement(now).unwrap_err(),
            StockError::validation("reference_number is required")
        );
    }

    #[test]
    fn movement_input_defaults_to_pending() {
        let input = MovementInput {
            project_id: Some(ProjectId::new()),
            movement_type: Some(MovementType::Adjustment),
            reference_number: Some("ADJ-1".to_string()),
            ..MovementInput::default()
        };
        let row = input.into_new_movement(Utc::now()).unwrap();
        assert_eq!(row.status, MovementStatus::Pending);
    }

    #[test]
    fn grn_rejects_negative_quantities_and_empty_batches() {
        let mut grn = GrnData {
            reference_number: "GRN-1".to_string(),
            po_number: None,
            supplier_name: "Acme Fibre".to_string(),
            received_by: None,
            received_date: Utc::now(),
            notes: None,
            items: vec![],
        };
        assert!(matches!(grn.validate(), Err(StockError::Validation(_))));

        let mut item = grn_item("A");
        item.received_quantity = dec!(-1);
        grn.items.push(item);
        assert_eq!(
            grn.validate().unwrap_err(),
            StockError::validation("items[0].received_quantity cannot be negative")
        );
    }

    #[test]
    fn grn_item_codes_are_sorted_and_distinct() {
        let grn = GrnData {
            reference_number: "GRN-1".to_string(),
            po_number: None,
            supplier_name: "Acme Fibre".to_string(),
            received_by: None,
            received_date: Utc::now(),
            notes: None,
            items: vec![grn_item("C"), grn_item("A"), grn_item("C")],
        };
        assert_eq!(grn.item_codes(), vec!["A", "C"]);
        assert_eq!(grn.items[0].uom(), DEFAULT_UOM);
    }

    #[test]
    fn issue_sums_lines_per_item_code() {
        let issue = IssueData {
            reference_number: "ISS-1".to_string(),
            work_order_number: Some("WO-7".to_string()),
            issued_to: "Team North".to_string(),
            issued_by: None,
            issue_date: Utc::now(),
            purpose: None,
            items: vec![issue_item("B", dec!(2)), issue_item("A", dec!(1)), issue_item("B", dec!(3))],
        };
        issue.validate().unwrap();
        let totals: Vec<_> = issue.issued_by_item_code().into_iter().collect();
        assert_eq!(totals, vec![("A", dec!(1)), ("B", dec!(5))]);
    }
}
