//! `StockLedger`: the processors, health probe and read queries over one store,
//! with a deadline on every operation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use fibreflow_core::{MovementId, ProjectId, StockError, StockResult};
use fibreflow_stock::{
    GrnData, IssueData, MovementInput, MovementResult, StockMovement, StockPosition,
};

use crate::config::LedgerConfig;
use crate::dispatcher::{MovementDispatcher, MovementRequest};
use crate::processors::{finish, HealthStatus, MovementHealth};
use crate::store::{InMemoryStockStore, PostgresStockStore, StockStore, StoreError, TxMode};

#[derive(Debug, Clone)]
pub struct StockLedger<S> {
    store: S,
    dispatcher: MovementDispatcher<S>,
    health: MovementHealth<S>,
    operation_timeout: Duration,
}

impl<S: StockStore + Clone> StockLedger<S> {
    pub fn new(store: S, config: &LedgerConfig) -> Self {
        Self {
            dispatcher: MovementDispatcher::new(store.clone(), config.warehouse_location.clone()),
            health: MovementHealth::new(store.clone()),
            store,
            operation_timeout: config.operation_timeout,
        }
    }
}

impl StockLedger<Arc<dyn StockStore>> {
    /// Open the store selected by `config`: Postgres when `database_url` is set
    /// (schema applied on connect), in-memory otherwise.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn StockStore> = match &config.database_url {
            Some(url) => {
                let store = PostgresStockStore::connect(url, config.max_connections).await?;
                store.ensure_schema().await?;
                info!(max_connections = config.max_connections, "using postgres stock store");
                Arc::new(store)
            }
            None => {
                warn!("DATABASE_URL not set, falling back to in-memory stock store");
                Arc::new(InMemoryStockStore::new())
            }
        };
        Ok(Self::new(store, config))
    }
}

impl<S: StockStore> StockLedger<S> {
    pub fn dispatcher(&self) -> &MovementDispatcher<S> {
        &self.dispatcher
    }

    pub async fn create_movement(&self, input: MovementInput) -> StockResult<StockMovement> {
        self.with_deadline(self.dispatcher.creator().create_movement(input))
            .await
    }

    pub async fn complete_movement(
        &self,
        project_id: ProjectId,
        movement_id: MovementId,
    ) -> StockResult<StockMovement> {
        self.with_deadline(
            self.dispatcher
                .creator()
                .complete_movement(project_id, movement_id),
        )
        .await
    }

    pub async fn process_grn(&self, project_id: ProjectId, grn: &GrnData) -> StockResult<MovementResult> {
        self.with_deadline(self.dispatcher.grn().process_grn(project_id, grn))
            .await
    }

    pub async fn process_issue(&self, project_id: ProjectId, issue: &IssueData) -> StockResult<MovementResult> {
        self.with_deadline(self.dispatcher.issue().process_issue(project_id, issue))
            .await
    }

    pub async fn dispatch(&self, project_id: ProjectId, request: MovementRequest) -> StockResult<MovementResult> {
        self.with_deadline(self.dispatcher.dispatch(project_id, request))
            .await
    }

    /// Health of the underlying store; a probe that exceeds the deadline is unhealthy.
    pub async fn health_status(&self) -> HealthStatus {
        match tokio::time::timeout(self.operation_timeout, self.health.health_status()).await {
            Ok(status) => status,
            Err(_) => HealthStatus::unhealthy(StockError::Timeout(self.operation_timeout).to_string()),
        }
    }

    #[instrument(skip(self), fields(project_id = %project_id), err)]
    pub async fn position(&self, project_id: ProjectId, item_code: &str) -> StockResult<StockPosition> {
        self.with_deadline(async {
            let mut tx = self.store.begin(TxMode::ReadOnly).await?;
            let outcome = tx
                .find_position(project_id, item_code)
                .await
                .map_err(StockError::from)
                .and_then(|p| p.ok_or_else(|| StockError::PositionNotFound(item_code.to_string())));
            finish(tx, outcome).await
        })
        .await
    }

    /// Active positions, ordered by item code.
    pub async fn positions(&self, project_id: ProjectId) -> StockResult<Vec<StockPosition>> {
        self.with_deadline(async {
            let mut tx = self.store.begin(TxMode::ReadOnly).await?;
            let outcome = tx.list_positions(project_id).await.map_err(StockError::from);
            finish(tx, outcome).await
        })
        .await
    }

    /// A movement together with its lines.
    #[instrument(skip(self), fields(project_id = %project_id, movement_id = %movement_id), err)]
    pub async fn movement(&self, project_id: ProjectId, movement_id: MovementId) -> StockResult<MovementResult> {
        self.with_deadline(async {
            let mut tx = self.store.begin(TxMode::ReadOnly).await?;
            let outcome = async {
                let movement = tx
                    .find_movement(project_id, movement_id)
                    .await?
                    .ok_or(StockError::MovementNotFound(movement_id))?;
                let items = tx.movement_items(movement.id).await?;
                Ok::<_, StockError>(MovementResult { movement, items })
            }
            .await;
            finish(tx, outcome).await
        })
        .await
    }

    /// Movements of a project, newest first.
    pub async fn movements(&self, project_id: ProjectId) -> StockResult<Vec<StockMovement>> {
        self.with_deadline(async {
            let mut tx = self.store.begin(TxMode::ReadOnly).await?;
            let outcome = tx.list_movements(project_id).await.map_err(StockError::from);
            finish(tx, outcome).await
        })
        .await
    }

    /// Stop a position from being issued. A later GRN reactivates it.
    #[instrument(skip(self), fields(project_id = %project_id), err)]
    pub async fn deactivate_position(&self, project_id: ProjectId, item_code: &str) -> StockResult<StockPosition> {
        self.with_deadline(async {
            let mut tx = self.store.begin(TxMode::ReadWrite).await?;
            let outcome = async {
                let mut position = tx
                    .lock_position(project_id, item_code)
                    .await?
                    .ok_or_else(|| StockError::PositionNotFound(item_code.to_string()))?;
                position.deactivate(Utc::now());
                tx.update_position(&position).await?;
                Ok::<_, StockError>(position)
            }
            .await;
            finish(tx, outcome).await
        })
        .await
    }

    /// Abandon `operation` after the configured deadline. Dropping the future
    /// drops its open transaction, which rolls it back.
    async fn with_deadline<T, F>(&self, operation: F) -> StockResult<T>
    where
        F: Future<Output = StockResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, operation).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(timeout = ?self.operation_timeout, "stock operation timed out");
                Err(StockError::Timeout(self.operation_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::test_support::{grn, grn_item, issue, issue_item};
    use rust_decimal_macros::dec;

    fn ledger() -> StockLedger<InMemoryStockStore> {
        StockLedger::new(InMemoryStockStore::new(), &LedgerConfig::default())
    }

    #[tokio::test]
    async fn queries_reflect_posted_movements() {
        let ledger = ledger();
        let project_id = ProjectId::new();

        let received = ledger
            .process_grn(
                project_id,
                &grn(
                    "GRN-200",
                    vec![grn_item("DUCT-40", dec!(50), dec!(2)), grn_item("CABLE-96F", dec!(100), dec!(10))],
                ),
            )
            .await
            .unwrap();
        ledger
            .process_issue(project_id, &issue("ISS-200", vec![issue_item("DUCT-40", dec!(20))]))
            .await
            .unwrap();

        let codes: Vec<String> = ledger
            .positions(project_id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.item_code)
            .collect();
        assert_eq!(codes, vec!["CABLE-96F".to_string(), "DUCT-40".to_string()]);

        let duct = ledger.position(project_id, "DUCT-40").await.unwrap();
        assert_eq!(duct.on_hand_quantity, dec!(30));

        let movements = ledger.movements(project_id).await.unwrap();
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[0].reference_number, "ISS-200");

        let fetched = ledger.movement(project_id, received.movement.id).await.unwrap();
        assert_eq!(fetched, received);
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let ledger = ledger();
        let project_id = ProjectId::new();

        let err = ledger.position(project_id, "NOPE").await.unwrap_err();
        assert_eq!(err, StockError::PositionNotFound("NOPE".to_string()));

        let movement_id = MovementId::new();
        let err = ledger.movement(project_id, movement_id).await.unwrap_err();
        assert_eq!(err, StockError::MovementNotFound(movement_id));

        let err = ledger.deactivate_position(project_id, "NOPE").await.unwrap_err();
        assert_eq!(err, StockError::PositionNotFound("NOPE".to_string()));
    }

    #[tokio::test]
    async fn deactivated_positions_leave_the_listing() {
        let ledger = ledger();
        let project_id = ProjectId::new();
        ledger
            .process_grn(project_id, &grn("GRN-201", vec![grn_item("DUCT-40", dec!(5), dec!(2))]))
            .await
            .unwrap();

        let deactivated = ledger.deactivate_position(project_id, "DUCT-40").await.unwrap();
        assert!(!deactivated.is_active);
        assert!(ledger.positions(project_id).await.unwrap().is_empty());
        // Still addressable directly.
        assert_eq!(ledger.position(project_id, "DUCT-40").await.unwrap().on_hand_quantity, dec!(5));
    }

    #[tokio::test(start_paused = true)]
    async fn operation_exceeding_deadline_times_out() {
        let store = InMemoryStockStore::new();
        let config = LedgerConfig {
            operation_timeout: Duration::from_secs(1),
            ..LedgerConfig::default()
        };
        let ledger = StockLedger::new(store.clone(), &config);

        // Hold the store so the GRN cannot begin its transaction.
        let held = store.begin(TxMode::ReadWrite).await.unwrap();
        let err = ledger
            .process_grn(ProjectId::new(), &grn("GRN-202", vec![grn_item("DUCT-40", dec!(5), dec!(2))]))
            .await
            .unwrap_err();
        assert_eq!(err, StockError::Timeout(Duration::from_secs(1)));
        assert!(err.is_retryable());
        assert!(!ledger.health_status().await.is_healthy());

        drop(held);
        assert!(ledger.health_status().await.is_healthy());
        assert_eq!(store.movement_count().await, 0);
    }

    #[tokio::test]
    async fn connect_without_database_url_uses_memory() {
        let ledger = StockLedger::connect(&LedgerConfig::default()).await.unwrap();
        assert!(ledger.health_status().await.is_healthy());
    }
}
