//! Infrastructure layer: stock stores, ledger processors, configuration.
//!
//! ```text
//! StockLedger ──► MovementDispatcher ──► MovementCreator / GrnProcessor / IssueProcessor
//!      │                                         │
//!      └──────────────► StockStore ◄─────────────┘
//!                  (Postgres | in-memory)
//! ```

pub mod config;
pub mod dispatcher;
pub mod ledger;
pub mod processors;
pub mod store;

pub use config::{ConfigError, LedgerConfig};
pub use dispatcher::{MovementDispatcher, MovementProcessor, MovementRequest};
pub use ledger::StockLedger;
pub use processors::{
    GrnProcessor, HealthDetails, HealthState, HealthStatus, IssueProcessor, MovementCreator,
    MovementHealth,
};
pub use store::{InMemoryStockStore, PostgresStockStore, StockStore, StockTransaction, StoreError, TxMode};
