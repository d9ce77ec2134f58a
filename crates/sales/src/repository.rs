use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use uuid::Uuid;

use ledgerflow_core::{AggregateRoot, SaleId};

use crate::outbox::{OutboxEntry, OutboxStatus};
use crate::sale::Sale;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("sale {0} already exists")]
    Duplicate(String),

    #[error("outbox entry {0} not found")]
    UnknownOutboxEntry(Uuid),

    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Sale persistence. `add` stores the sale and its outbox entries as one unit.
pub trait SaleRepository: Send + Sync {
    fn add(&self, sale: &Sale, outbox: Vec<OutboxEntry>) -> Result<(), RepositoryError>;

    fn get_by_id(&self, id: SaleId) -> Result<Option<Sale>, RepositoryError>;

    /// All sales, oldest first.
    fn get_all(&self) -> Result<Vec<Sale>, RepositoryError>;
}

/// Outbox access for the saga and the relay.
pub trait OutboxStore: Send + Sync {
    /// Up to `limit` pending entries, oldest first.
    fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, RepositoryError>;

    fn mark_dispatched(&self, id: Uuid) -> Result<(), RepositoryError>;

    fn record_failure(&self, id: Uuid, error: &str) -> Result<(), RepositoryError>;
}

impl<R> SaleRepository for Arc<R>
where
    R: SaleRepository + ?Sized,
{
    fn add(&self, sale: &Sale, outbox: Vec<OutboxEntry>) -> Result<(), RepositoryError> {
        (**self).add(sale, outbox)
    }

    fn get_by_id(&self, id: SaleId) -> Result<Option<Sale>, RepositoryError> {
        (**self).get_by_id(id)
    }

    fn get_all(&self) -> Result<Vec<Sale>, RepositoryError> {
        (**self).get_all()
    }
}

impl<R> OutboxStore for Arc<R>
where
    R: OutboxStore + ?Sized,
{
    fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, RepositoryError> {
        (**self).pending(limit)
    }

    fn mark_dispatched(&self, id: Uuid) -> Result<(), RepositoryError> {
        (**self).mark_dispatched(id)
    }

    fn record_failure(&self, id: Uuid, error: &str) -> Result<(), RepositoryError> {
        (**self).record_failure(id, error)
    }
}

#[derive(Debug, Default)]
struct Tables {
    sales: HashMap<SaleId, Sale>,
    order: Vec<SaleId>,
    outbox: Vec<OutboxEntry>,
}

/// In-memory sale repository + outbox for tests/dev.
#[derive(Debug)]
pub struct InMemorySaleRepository {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl InMemorySaleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every outbox entry regardless of status, in insertion order.
    pub fn outbox(&self) -> Vec<OutboxEntry> {
        self.tables
            .read()
            .map(|t| t.outbox.clone())
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> Result<(), RepositoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepositoryError::Unavailable("in-memory sale repository is down".to_string()))
        }
    }

    fn poisoned() -> RepositoryError {
        RepositoryError::Unavailable("lock poisoned".to_string())
    }

    fn update_entry(&self, id: Uuid, f: impl FnOnce(&mut OutboxEntry)) -> Result<(), RepositoryError> {
        self.ensure_available()?;
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        let entry = tables
            .outbox
            .iter_mut()
            .find(|e| e.id() == id)
            .ok_or(RepositoryError::UnknownOutboxEntry(id))?;
        f(entry);
        Ok(())
    }
}

impl Default for InMemorySaleRepository {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl SaleRepository for InMemorySaleRepository {
    fn add(&self, sale: &Sale, outbox: Vec<OutboxEntry>) -> Result<(), RepositoryError> {
        self.ensure_available()?;
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        let id = *sale.id();
        if tables.sales.contains_key(&id) {
            return Err(RepositoryError::Duplicate(id.to_string()));
        }
        tables.sales.insert(id, sale.clone());
        tables.order.push(id);
        tables.outbox.extend(outbox);
        Ok(())
    }

    fn get_by_id(&self, id: SaleId) -> Result<Option<Sale>, RepositoryError> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.sales.get(&id).cloned())
    }

    fn get_all(&self) -> Result<Vec<Sale>, RepositoryError> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .order
            .iter()
            .filter_map(|id| tables.sales.get(id).cloned())
            .collect())
    }
}

impl OutboxStore for InMemorySaleRepository {
    fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, RepositoryError> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .outbox
            .iter()
            .filter(|e| e.status() == OutboxStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_dispatched(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.update_entry(id, OutboxEntry::mark_dispatched)
    }

    fn record_failure(&self, id: Uuid, error: &str) -> Result<(), RepositoryError> {
        self.update_entry(id, |entry| entry.record_failure(error))
    }
}
