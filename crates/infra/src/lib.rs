//! Infrastructure layer: configuration, retry policy, background workers,
//! dead-letter storage and broker adapters.

pub mod config;
pub mod dead_letter;
pub mod event_bus;
pub mod retry;
pub mod workers;

pub use config::{AppConfig, BusKind, ConfigError};
pub use dead_letter::{DeadLetter, DeadLetterError, DeadLetterReason, DeadLetterStore, InMemoryDeadLetterStore};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use workers::{ConsumerStats, ConsumerWorker, OutboxRelay, RelayReport, RelayStats, WorkerError, WorkerHandle};
