//! Service wiring: bus backend, ledgers, consumers, saga and background workers.

pub mod app;
pub mod backend;

pub use app::{LedgerflowApp, ServiceError, ShutdownReport};
pub use backend::BusBackend;
