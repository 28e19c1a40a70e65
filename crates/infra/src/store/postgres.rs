//! Postgres-backed stock store.
//!
//! Positions are locked with `SELECT … FOR UPDATE` for the lifetime of the
//! transaction, and the `(project_id, reference_number)` unique constraint backs
//! the duplicate-reference check against concurrent inserts.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Duplicate` | Concurrent insert of the same reference number |
//! | Database (read-only transaction) | `25006` | `ReadOnly` | Write attempted in a health/read transaction |
//! | Database (other) | Any other | `Database` | Check violations, deadlocks, serialization failures |
//! | Decode / ColumnDecode | N/A | `Corrupt` | Row does not map onto the domain type |
//! | Other | N/A | `Database` | Network errors, pool closed, timeouts |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use fibreflow_core::{MovementId, MovementItemId, PositionId, ProjectId};
use fibreflow_stock::{
    ItemStatus, MovementStatus, MovementType, QualityCheckStatus, StockMovement,
    StockMovementItem, StockPosition,
};

use super::r#trait::{StockStore, StockTransaction, StoreError, TxMode};

const SCHEMA: &str = include_str!("../../migrations/0001_stock_ledger.sql");

macro_rules! position_columns {
    () => {
        "id, project_id, item_code, item_name, uom, on_hand_quantity, reserved_quantity, \
         available_quantity, average_unit_cost, total_value, warehouse_location, \
         last_movement_date, is_active, created_at, updated_at"
    };
}

macro_rules! movement_columns {
    () => {
        "id, project_id, movement_type, reference_number, reference_type, reference_id, \
         from_location, to_location, status, movement_date, requested_by, authorized_by, \
         processed_by, reason, notes, created_at, updated_at"
    };
}

macro_rules! movement_item_columns {
    () => {
        "id, movement_id, position_id, item_code, description, planned_quantity, \
         actual_quantity, uom, unit_cost, total_cost, lot_numbers, serial_numbers, \
         quality_check_required, quality_check_status, item_status, notes, created_at"
    };
}

/// Postgres-backed stock store.
///
/// ## Thread Safety
///
/// Uses the SQLx connection pool, which is `Send + Sync`; clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    /// Create a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a connection pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the ledger tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StockStore for PostgresStockStore {
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn StockTransaction>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if mode == TxMode::ReadOnly {
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_read_only", e))?;
        }

        Ok(Box::new(PostgresStockTransaction { tx }))
    }
}

/// Open Postgres transaction. Dropping it without `commit` rolls back.
#[derive(Debug)]
pub struct PostgresStockTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresStockTransaction {
    async fn fetch_position(
        &mut self,
        project_id: ProjectId,
        item_code: &str,
        lock: bool,
    ) -> Result<Option<StockPosition>, StoreError> {
        let sql = if lock {
            concat!(
                "SELECT ",
                position_columns!(),
                " FROM stock_positions WHERE project_id = $1 AND item_code = $2 FOR UPDATE"
            )
        } else {
            concat!(
                "SELECT ",
                position_columns!(),
                " FROM stock_positions WHERE project_id = $1 AND item_code = $2"
            )
        };

        let row = sqlx::query(sql)
            .bind(project_id.as_uuid())
            .bind(item_code)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("fetch_position", e))?;

        row.map(|r| PositionRow::from_row(&r).map(StockPosition::from))
            .transpose()
            .map_err(|e| map_sqlx_error("decode_position", e))
    }
}

#[async_trait::async_trait]
impl StockTransaction for PostgresStockTransaction {
    async fn lock_position(
        &mut self,
        project_id: ProjectId,
        item_code: &str,
    ) -> Result<Option<StockPosition>, StoreError> {
        self.fetch_position(project_id, item_code, true).await
    }

    async fn find_position(
        &mut self,
        project_id: ProjectId,
        item_code: &str,
    ) -> Result<Option<StockPosition>, StoreError> {
        self.fetch_position(project_id, item_code, false).await
    }

    async fn list_positions(&mut self, project_id: ProjectId) -> Result<Vec<StockPosition>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            position_columns!(),
            " FROM stock_positions WHERE project_id = $1 AND is_active ORDER BY item_code ASC"
        ))
        .bind(project_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_positions", e))?;

        rows.iter()
            .map(|r| PositionRow::from_row(r).map(StockPosition::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("decode_position", e))
    }

    async fn insert_position(&mut self, position: &StockPosition) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO stock_positions (
                id, project_id, item_code, item_name, uom,
                on_hand_quantity, reserved_quantity, available_quantity,
                average_unit_cost, total_value, warehouse_location,
                last_movement_date, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (project_id, item_code) DO NOTHING
            "#,
        )
        .bind(position.id.as_uuid())
        .bind(position.project_id.as_uuid())
        .bind(&position.item_code)
        .bind(&position.item_name)
        .bind(&position.uom)
        .bind(position.on_hand_quantity)
        .bind(position.reserved_quantity)
        .bind(position.available_quantity)
        .bind(position.average_unit_cost)
        .bind(position.total_value)
        .bind(&position.warehouse_location)
        .bind(position.last_movement_date)
        .bind(position.is_active)
        .bind(position.created_at)
        .bind(position.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_position", e))?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!(item_code = %position.item_code, "position created concurrently");
        }
        Ok(inserted)
    }

    async fn update_position(&mut self, position: &StockPosition) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE stock_positions SET
                on_hand_quantity = $2,
                available_quantity = $3,
                average_unit_cost = $4,
                total_value = $5,
                last_movement_date = $6,
                is_active = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(position.id.as_uuid())
        .bind(position.on_hand_quantity)
        .bind(position.available_quantity)
        .bind(position.average_unit_cost)
        .bind(position.total_value)
        .bind(position.last_movement_date)
        .bind(position.is_active)
        .bind(position.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_position", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Database(format!(
                "position {} does not exist",
                position.id
            )));
        }
        Ok(())
    }

    async fn find_movement_by_reference(
        &mut self,
        project_id: ProjectId,
        reference_number: &str,
    ) -> Result<Option<StockMovement>, StoreError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            movement_columns!(),
            " FROM stock_movements WHERE project_id = $1 AND reference_number = $2"
        ))
        .bind(project_id.as_uuid())
        .bind(reference_number)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_movement_by_reference", e))?;

        row.map(|r| decode_movement(&r)).transpose()
    }

    async fn find_movement(
        &mut self,
        project_id: ProjectId,
        movement_id: MovementId,
    ) -> Result<Option<StockMovement>, StoreError> {
        let row = sqlx::query(concat!(
            "SELECT ",
            movement_columns!(),
            " FROM stock_movements WHERE project_id = $1 AND id = $2"
        ))
        .bind(project_id.as_uuid())
        .bind(movement_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_movement", e))?;

        row.map(|r| decode_movement(&r)).transpose()
    }

    async fn list_movements(&mut self, project_id: ProjectId) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            movement_columns!(),
            " FROM stock_movements WHERE project_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(project_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_movements", e))?;

        rows.iter().map(decode_movement).collect()
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, project_id, movement_type, reference_number, reference_type, reference_id,
                from_location, to_location, status, movement_date,
                requested_by, authorized_by, processed_by, reason, notes,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(movement.project_id.as_uuid())
        .bind(movement.movement_type.as_str())
        .bind(&movement.reference_number)
        .bind(&movement.reference_type)
        .bind(&movement.reference_id)
        .bind(&movement.from_location)
        .bind(&movement.to_location)
        .bind(movement.status.as_str())
        .bind(movement.movement_date)
        .bind(&movement.requested_by)
        .bind(&movement.authorized_by)
        .bind(&movement.processed_by)
        .bind(&movement.reason)
        .bind(&movement.notes)
        .bind(movement.created_at)
        .bind(movement.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;

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
        let result = sqlx::query(
            r#"
            UPDATE stock_movements
            SET status = $4, updated_at = $5
            WHERE project_id = $1 AND id = $2 AND status = $3
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(movement_id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_movement_status", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_movement_item(&mut self, item: &StockMovementItem) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_movement_items (
                id, movement_id, position_id, item_code, description,
                planned_quantity, actual_quantity, uom, unit_cost, total_cost,
                lot_numbers, serial_numbers, quality_check_required,
                quality_check_status, item_status, notes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.movement_id.as_uuid())
        .bind(item.position_id.as_uuid())
        .bind(&item.item_code)
        .bind(&item.description)
        .bind(item.planned_quantity)
        .bind(item.actual_quantity)
        .bind(&item.uom)
        .bind(item.unit_cost)
        .bind(item.total_cost)
        .bind(item.lot_numbers.as_slice())
        .bind(item.serial_numbers.as_slice())
        .bind(item.quality_check_required)
        .bind(item.quality_check_status.as_str())
        .bind(item.item_status.as_str())
        .bind(&item.notes)
        .bind(item.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement_item", e))?;

        Ok(())
    }

    async fn movement_items(&mut self, movement_id: MovementId) -> Result<Vec<StockMovementItem>, StoreError> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            movement_item_columns!(),
            " FROM stock_movement_items WHERE movement_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(movement_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("movement_items", e))?;

        rows.iter()
            .map(|r| {
                MovementItemRow::from_row(r)
                    .map_err(|e| map_sqlx_error("decode_movement_item", e))
                    .and_then(StockMovementItem::try_from)
            })
            .collect()
    }

    async fn probe(&mut self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1 FROM stock_movements LIMIT 1")
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("probe", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn decode_movement(row: &PgRow) -> Result<StockMovement, StoreError> {
    MovementRow::from_row(row)
        .map_err(|e| map_sqlx_error("decode_movement", e))
        .and_then(StockMovement::try_from)
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some("25006") => StoreError::ReadOnly,
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("{} in {}", err, operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn parse_column<T>(value: &str, column: &str) -> Result<T, StoreError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Corrupt(format!("{column}: {e}")))
}

// SQLx row types

#[derive(Debug)]
struct PositionRow {
    id: Uuid,
    project_id: Uuid,
    item_code: String,
    item_name: String,
    uom: String,
    on_hand_quantity: Decimal,
    reserved_quantity: Decimal,
    available_quantity: Decimal,
    average_unit_cost: Decimal,
    total_value: Decimal,
    warehouse_location: String,
    last_movement_date: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for PositionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PositionRow {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            item_code: row.try_get("item_code")?,
            item_name: row.try_get("item_name")?,
            uom: row.try_get("uom")?,
            on_hand_quantity: row.try_get("on_hand_quantity")?,
            reserved_quantity: row.try_get("reserved_quantity")?,
            available_quantity: row.try_get("available_quantity")?,
            average_unit_cost: row.try_get("average_unit_cost")?,
            total_value: row.try_get("total_value")?,
            warehouse_location: row.try_get("warehouse_location")?,
            last_movement_date: row.try_get("last_movement_date")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<PositionRow> for StockPosition {
    fn from(row: PositionRow) -> Self {
        StockPosition {
            id: PositionId::from_uuid(row.id),
            project_id: ProjectId::from_uuid(row.project_id),
            item_code: row.item_code,
            item_name: row.item_name,
            uom: row.uom,
            on_hand_quantity: row.on_hand_quantity,
            reserved_quantity: row.reserved_quantity,
            available_quantity: row.available_quantity,
            average_unit_cost: row.average_unit_cost,
            total_value: row.total_value,
            warehouse_location: row.warehouse_location,
            last_movement_date: row.last_movement_date,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug)]
struct MovementRow {
    id: Uuid,
    project_id: Uuid,
    movement_type: String,
    reference_number: String,
    reference_type: Option<String>,
    reference_id: Option<String>,
    from_location: Option<String>,
    to_location: Option<String>,
    status: String,
    movement_date: DateTime<Utc>,
    requested_by: Option<String>,
    authorized_by: Option<String>,
    processed_by: Option<String>,
    reason: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            movement_type: row.try_get("movement_type")?,
            reference_number: row.try_get("reference_number")?,
            reference_type: row.try_get("reference_type")?,
            reference_id: row.try_get("reference_id")?,
            from_location: row.try_get("from_location")?,
            to_location: row.try_get("to_location")?,
            status: row.try_get("status")?,
            movement_date: row.try_get("movement_date")?,
            requested_by: row.try_get("requested_by")?,
            authorized_by: row.try_get("authorized_by")?,
            processed_by: row.try_get("processed_by")?,
            reason: row.try_get("reason")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        Ok(StockMovement {
            id: MovementId::from_uuid(row.id),
            project_id: ProjectId::from_uuid(row.project_id),
            movement_type: parse_column::<MovementType>(&row.movement_type, "movement_type")?,
            reference_number: row.reference_number,
            reference_type: row.reference_type,
            reference_id: row.reference_id,
            from_location: row.from_location,
            to_location: row.to_location,
            status: parse_column::<MovementStatus>(&row.status, "status")?,
            movement_date: row.movement_date,
            requested_by: row.requested_by,
            authorized_by: row.authorized_by,
            processed_by: row.processed_by,
            reason: row.reason,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct MovementItemRow {
    id: Uuid,
    movement_id: Uuid,
    position_id: Uuid,
    item_code: String,
    description: Option<String>,
    planned_quantity: Decimal,
    actual_quantity: Decimal,
    uom: String,
    unit_cost: Decimal,
    total_cost: Decimal,
    lot_numbers: Vec<String>,
    serial_numbers: Vec<String>,
    quality_check_required: bool,
    quality_check_status: String,
    item_status: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementItemRow {
            id: row.try_get("id")?,
            movement_id: row.try_get("movement_id")?,
            position_id: row.try_get("position_id")?,
            item_code: row.try_get("item_code")?,
            description: row.try_get("description")?,
            planned_quantity: row.try_get("planned_quantity")?,
            actual_quantity: row.try_get("actual_quantity")?,
            uom: row.try_get("uom")?,
            unit_cost: row.try_get("unit_cost")?,
            total_cost: row.try_get("total_cost")?,
            lot_numbers: row.try_get("lot_numbers")?,
            serial_numbers: row.try_get("serial_numbers")?,
            quality_check_required: row.try_get("quality_check_required")?,
            quality_check_status: row.try_get("quality_check_status")?,
            item_status: row.try_get("item_status")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<MovementItemRow> for StockMovementItem {
    type Error = StoreError;

    fn try_from(row: MovementItemRow) -> Result<Self, Self::Error> {
        Ok(StockMovementItem {
            id: MovementItemId::from_uuid(row.id),
            movement_id: MovementId::from_uuid(row.movement_id),
            position_id: PositionId::from_uuid(row.position_id),
            item_code: row.item_code,
            description: row.description,
            planned_quantity: row.planned_quantity,
            actual_quantity: row.actual_quantity,
            uom: row.uom,
            unit_cost: row.unit_cost,
            total_cost: row.total_cost,
            lot_numbers: row.lot_numbers,
            serial_numbers: row.serial_numbers,
            quality_check_required: row.quality_check_required,
            quality_check_status: parse_column::<QualityCheckStatus>(
                &row.quality_check_status,
                "quality_check_status",
            )?,
            item_status: parse_column::<ItemStatus>(&row.item_status, "item_status")?,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}
