//! Row-locking behaviour against a real Postgres.
//!
//! Skipped unless `DATABASE_URL` is set. Every test works in a fresh project,
//! so runs do not interfere with each other or with existing data.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use fibreflow_core::{ProjectId, StockError};
use fibreflow_infra::{LedgerConfig, PostgresStockStore, StockLedger};
use fibreflow_stock::{GrnData, GrnItem, IssueData, IssueItem};

async fn ledger() -> Option<Arc<StockLedger<PostgresStockStore>>> {
    let config = LedgerConfig::from_env().ok()?;
    let url = config.database_url.clone()?;
    let store = PostgresStockStore::connect(&url, config.max_connections)
        .await
        .expect("connect to DATABASE_URL");
    store.ensure_schema().await.expect("apply stock ledger schema");
    Some(Arc::new(StockLedger::new(store, &config)))
}

fn receipt(reference: String, code: &str, quantity: Decimal, unit_cost: Decimal) -> GrnData {
    receipt_lines(reference, &[(code, quantity, unit_cost)])
}

fn receipt_lines(reference: String, lines: &[(&str, Decimal, Decimal)]) -> GrnData {
    GrnData {
        reference_number: reference,
        po_number: Some("PO-1".to_string()),
        supplier_name: "Acme Fibre Supplies".to_string(),
        received_by: None,
        received_date: Utc::now(),
        notes: None,
        items: lines
            .iter()
            .map(|(code, quantity, unit_cost)| GrnItem {
                item_code: code.to_string(),
                item_name: code.to_string(),
                uom: None,
                planned_quantity: *quantity,
                received_quantity: *quantity,
                unit_cost: *unit_cost,
                lot_numbers: vec!["LOT-A".to_string()],
                serial_numbers: Vec::new(),
                quality_check_required: true,
            })
            .collect(),
    }
}

fn issue(reference: String, code: &str, quantity: Decimal) -> IssueData {
    IssueData {
        reference_number: reference,
        work_order_number: None,
        issued_to: "Team Alpha".to_string(),
        issued_by: None,
        issue_date: Utc::now(),
        purpose: None,
        items: vec![IssueItem {
            item_code: code.to_string(),
            requested_quantity: quantity,
            issued_quantity: quantity,
            unit_cost: None,
            lot_numbers: Vec::new(),
            serial_numbers: Vec::new(),
            notes: None,
        }],
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_receipts_on_new_item_sum() {
    let Some(ledger) = ledger().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let project_id = ProjectId::new();

    // Every task races to open the same position.
    let handles: Vec<_> = (0..8)
        .map(|n| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .process_grn(project_id, &receipt(format!("GRN-{n}"), "CABLE-96F", dec!(10), dec!(5)))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let position = ledger.position(project_id, "CABLE-96F").await.unwrap();
    assert_eq!(position.on_hand_quantity, dec!(80));
    assert_eq!(position.total_value, dec!(400));
    assert_eq!(ledger.movements(project_id).await.unwrap().len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_issues_never_overdraw() {
    let Some(ledger) = ledger().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let project_id = ProjectId::new();
    ledger
        .process_grn(project_id, &receipt("GRN-0".to_string(), "DUCT-40", dec!(30), dec!(2)))
        .await
        .unwrap();

    let handles: Vec<_> = (0..6)
        .map(|n| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .process_issue(project_id, &issue(format!("ISS-{n}"), "DUCT-40", dec!(10)))
                    .await
            })
        })
        .collect();

    let mut issued = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => issued += 1,
            Err(StockError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(issued, 3);
    assert_eq!(ledger.position(project_id, "DUCT-40").await.unwrap().on_hand_quantity, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn new_items_in_opposite_line_order_do_not_deadlock() {
    let Some(ledger) = ledger().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };

    for round in 0..20 {
        // Fresh project per round, so both items are opened by the racing receipts.
        let project_id = ProjectId::new();
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let ledger = ledger.clone();
                let lines = if n % 2 == 0 {
                    [("CABLE-96F", dec!(10), dec!(5)), ("DUCT-40", dec!(2), dec!(3))]
                } else {
                    [("DUCT-40", dec!(2), dec!(3)), ("CABLE-96F", dec!(10), dec!(5))]
                };
                tokio::spawn(async move {
                    ledger
                        .process_grn(project_id, &receipt_lines(format!("GRN-{n}"), &lines))
                        .await
                })
            })
            .collect();
        for handle in handles {
            if let Err(err) = handle.await.unwrap() {
                panic!("round {round}: {err}");
            }
        }

        assert_eq!(ledger.position(project_id, "CABLE-96F").await.unwrap().on_hand_quantity, dec!(40));
        assert_eq!(ledger.position(project_id, "DUCT-40").await.unwrap().on_hand_quantity, dec!(8));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_receipts_and_issues_balance() {
    let Some(ledger) = ledger().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let project_id = ProjectId::new();
    ledger
        .process_grn(project_id, &receipt("GRN-0".to_string(), "SPLICE-TRAY", dec!(100), dec!(4)))
        .await
        .unwrap();

    let handles: Vec<_> = (0..12)
        .map(|n| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                if n % 2 == 0 {
                    ledger
                        .process_grn(project_id, &receipt(format!("GRN-{}", n + 1), "SPLICE-TRAY", dec!(10), dec!(6)))
                        .await
                } else {
                    ledger
                        .process_issue(project_id, &issue(format!("ISS-{n}"), "SPLICE-TRAY", dec!(15)))
                        .await
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // 100 + 6 * 10 received, 6 * 15 issued.
    let position = ledger.position(project_id, "SPLICE-TRAY").await.unwrap();
    assert_eq!(position.on_hand_quantity, dec!(70));
    assert_eq!(position.total_value, position.on_hand_quantity * position.average_unit_cost);
    position.check_invariants().unwrap();
    assert_eq!(ledger.movements(project_id).await.unwrap().len(), 13);
}

#[tokio::test]
async fn duplicate_reference_and_round_trip() {
    let Some(ledger) = ledger().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let project_id = ProjectId::new();
    let grn = receipt("GRN-DUP".to_string(), "CLOSURE-24", dec!(3), dec!(110.5));

    let posted = ledger.process_grn(project_id, &grn).await.unwrap();
    let err = ledger.process_grn(project_id, &grn).await.unwrap_err();
    assert_eq!(err, StockError::duplicate_reference(project_id, "GRN-DUP"));

    let fetched = ledger.movement(project_id, posted.movement.id).await.unwrap();
    assert_eq!(fetched.movement.reference_number, "GRN-DUP");
    assert_eq!(fetched.items.len(), 1);
    assert_eq!(fetched.items[0].lot_numbers, vec!["LOT-A".to_string()]);
    assert_eq!(fetched.items[0].quality_check_status.as_str(), "pending");
    assert_eq!(fetched.items[0].total_cost, dec!(331.5));

    assert!(ledger.health_status().await.is_healthy());
}
