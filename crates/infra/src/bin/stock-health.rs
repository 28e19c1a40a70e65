//! Probe the configured stock store and print its health as JSON.
//!
//! Exits non-zero when the store is unhealthy.

use anyhow::Context;

use fibreflow_infra::{LedgerConfig, StockLedger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fibreflow_observability::init();

    let config = LedgerConfig::from_env().context("invalid stock ledger configuration")?;
    let ledger = StockLedger::connect(&config)
        .await
        .context("failed to open stock store")?;

    let status = ledger.health_status().await;
    println!("{}", serde_json::to_string(&status)?);

    if !status.is_healthy() {
        tracing::error!("stock store is unhealthy");
        std::process::exit(1);
    }
    Ok(())
}
