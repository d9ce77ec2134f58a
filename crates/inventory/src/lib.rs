//! Inventory service: the stock ledger.
//!
//! One `Stock` row per product plus an append-only movement log. Every
//! mutation commits the row and its movement together; the event consumer keeps
//! the ledger in step with sales and purchases.

pub mod consumer;
pub mod ledger;
pub mod stock;
pub mod store;

pub use consumer::StockEventConsumer;
pub use ledger::{MovementRef, StockLedger, StockLedgerError};
pub use stock::{MovementType, Stock, StockMovement};
pub use store::{InMemoryStockStore, StockChange, StockStore, StoreError};
