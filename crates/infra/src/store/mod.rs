//! Transactional position/movement storage.
//!
//! The ledger processors only talk to the [`StockStore`] / [`StockTransaction`]
//! traits, so the Postgres backend and the in-memory backend (tests/dev) are
//! interchangeable.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryStockStore, InMemoryStockTransaction};
pub use postgres::{PostgresStockStore, PostgresStockTransaction};
pub use r#trait::{StockStore, StockTransaction, StoreError, TxMode};
