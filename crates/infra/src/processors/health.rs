use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::store::{StockStore, StoreError, TxMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub error: String,
}

/// Serialises as `{"status":"healthy"}` or
/// `{"status":"unhealthy","details":{"error":"..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            status: HealthState::Healthy,
            details: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: HealthState::Unhealthy,
            details: Some(HealthDetails { error: error.into() }),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Liveness probe for the movement store.
#[derive(Debug, Clone)]
pub struct MovementHealth<S> {
    store: S,
}

impl<S> MovementHealth<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: StockStore> MovementHealth<S> {
    /// Run a trivial read in a read-only transaction. Never fails; store
    /// errors are reported in the returned status.
    #[instrument(skip(self))]
    pub async fn health_status(&self) -> HealthStatus {
        match self.probe().await {
            Ok(()) => HealthStatus::healthy(),
            Err(err) => {
                warn!(error = %err, "stock store health check failed");
                HealthStatus::unhealthy(err.to_string())
            }
        }
    }

    async fn probe(&self) -> Result<(), StoreError> {
        let mut tx = self.store.begin(TxMode::ReadOnly).await?;
        tx.probe().await?;
        tx.rollback().await
    }
}
