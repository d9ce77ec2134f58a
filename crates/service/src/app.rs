//! The running service: ledgers, consumers, the sale saga and the outbox relay
//! over one bus backend.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use ledgerflow_credit::{CreditEventConsumer, CreditLedger, InMemoryCreditStore};
use ledgerflow_events::EventBus;
use ledgerflow_infra::{
    AppConfig, ConsumerStats, ConsumerWorker, DeadLetterStore, OutboxRelay, RelayStats, WorkerError, WorkerHandle,
};
use ledgerflow_inventory::{InMemoryStockStore, StockEventConsumer, StockLedger};
use ledgerflow_sales::{CreateSaleCommand, InMemorySaleRepository, SagaError, SaleCreated, SaleSagaInitiator};

use crate::backend::BusBackend;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] ledgerflow_infra::ConfigError),

    #[error("event bus error: {0}")]
    Bus(String),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

pub type SharedStockLedger = Arc<StockLedger<InMemoryStockStore>>;
pub type SharedCreditLedger = Arc<CreditLedger<InMemoryCreditStore>>;
pub type SaleSaga = SaleSagaInitiator<Arc<InMemorySaleRepository>, Arc<dyn EventBus>>;

/// Final worker counters, reported on shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub stock_consumer: ConsumerStats,
    pub credit_consumer: ConsumerStats,
    pub outbox_relay: RelayStats,
}

pub struct LedgerflowApp {
    bus: Arc<dyn EventBus>,
    dead_letters: Arc<dyn DeadLetterStore>,
    stock: SharedStockLedger,
    credit: SharedCreditLedger,
    sales: Arc<InMemorySaleRepository>,
    saga: SaleSaga,
    stock_worker: WorkerHandle<ConsumerStats>,
    credit_worker: WorkerHandle<ConsumerStats>,
    relay_worker: WorkerHandle<RelayStats>,
}

impl LedgerflowApp {
    /// Build the ledgers and start every background worker.
    pub fn start(config: &AppConfig, backend: &BusBackend) -> Result<Self, ServiceError> {
        let bus = backend.event_bus();
        let dead_letters = backend.dead_letters();
        let policy = config.retry_policy();

        let stock = Arc::new(StockLedger::new(InMemoryStockStore::new()));
        let credit = Arc::new(CreditLedger::new(InMemoryCreditStore::new(), config.currency.clone()));
        let sales = Arc::new(InMemorySaleRepository::new());

        let stock_worker = ConsumerWorker::spawn(
            StockEventConsumer::new(Arc::clone(&stock), Arc::clone(&bus)),
            Arc::clone(&bus),
            Arc::clone(&dead_letters),
            policy.clone(),
        )?;
        let credit_worker = ConsumerWorker::spawn(
            CreditEventConsumer::new(Arc::clone(&credit)),
            Arc::clone(&bus),
            Arc::clone(&dead_letters),
            policy.clone(),
        )?;
        let relay_worker =
            OutboxRelay::new(Arc::clone(&sales), Arc::clone(&bus)).spawn(config.outbox_poll_interval, policy)?;

        let saga = SaleSagaInitiator::new(Arc::clone(&sales), Arc::clone(&bus), config.currency.clone());
        info!(currency = %config.currency.code(), "ledgerflow started");

        Ok(Self {
            bus,
            dead_letters,
            stock,
            credit,
            sales,
            saga,
            stock_worker,
            credit_worker,
            relay_worker,
        })
    }

    pub fn create_sale(&self, command: CreateSaleCommand) -> Result<SaleCreated, SagaError> {
        self.saga.create_sale(command)
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterStore> {
        &self.dead_letters
    }

    pub fn stock_ledger(&self) -> &SharedStockLedger {
        &self.stock
    }

    pub fn credit_ledger(&self) -> &SharedCreditLedger {
        &self.credit
    }

    pub fn sales(&self) -> &Arc<InMemorySaleRepository> {
        &self.sales
    }

    pub fn stats(&self) -> ShutdownReport {
        ShutdownReport {
            stock_consumer: self.stock_worker.stats(),
            credit_consumer: self.credit_worker.stats(),
            outbox_relay: self.relay_worker.stats(),
        }
    }

    /// Stop the relay first so nothing is published into stopped consumers,
    /// then the consumers.
    pub fn shutdown(self) -> ShutdownReport {
        let outbox_relay = self.relay_worker.shutdown();
        let stock_consumer = self.stock_worker.shutdown();
        let credit_consumer = self.credit_worker.shutdown();
        info!("ledgerflow workers stopped");
        ShutdownReport {
            stock_consumer,
            credit_consumer,
            outbox_relay,
        }
    }
}
