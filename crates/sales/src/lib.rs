//! Sales service: the sale aggregate and the saga that announces it.
//!
//! A sale is persisted together with its outbox entries, then `sale.completed`
//! and (for credit sales) `sale.credit.requested` are published.

pub mod outbox;
pub mod repository;
pub mod saga;
pub mod sale;

pub use outbox::{OutboxEntry, OutboxStatus};
pub use repository::{InMemorySaleRepository, OutboxStore, RepositoryError, SaleRepository};
pub use saga::{SagaError, SaleCreated, SaleSagaInitiator, SaleSagaState};
pub use sale::{CreateSaleCommand, PaymentMethod, Sale, SaleItem, SaleItemInput};
