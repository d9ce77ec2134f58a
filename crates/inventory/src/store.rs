use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use uuid::Uuid;

use ledgerflow_core::{AggregateRoot, ExpectedVersion, ProductId};

use crate::stock::{MovementType, Stock, StockMovement};

/// A stock row change and the movement that explains it, committed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub stock: Stock,
    pub movement: StockMovement,
    /// Version the caller read the row at (`NoRow` when creating it).
    pub expected: ExpectedVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed.
    #[error("concurrency conflict: {0}")]
    Conflict(String),

    /// A movement with the same `(product, type, reference)` is already recorded.
    #[error("duplicate movement reference: {0}")]
    DuplicateReference(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence port for stock rows and their movement log.
///
/// `commit` is atomic: either the row update and the movement both land, or
/// neither does. Movements carrying a reference id are unique per
/// `(product_id, movement_type, reference_id)`.
pub trait StockStore: Send + Sync {
    fn get(&self, product_id: ProductId) -> Result<Option<Stock>, StoreError>;

    /// Movements for a product, oldest first.
    fn movements(&self, product_id: ProductId) -> Result<Vec<StockMovement>, StoreError>;

    fn find_movement(
        &self,
        product_id: ProductId,
        movement_type: MovementType,
        reference_id: Uuid,
    ) -> Result<Option<StockMovement>, StoreError>;

    fn commit(&self, change: StockChange) -> Result<(), StoreError>;
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn get(&self, product_id: ProductId) -> Result<Option<Stock>, StoreError> {
        (**self).get(product_id)
    }

    fn movements(&self, product_id: ProductId) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements(product_id)
    }

    fn find_movement(
        &self,
        product_id: ProductId,
        movement_type: MovementType,
        reference_id: Uuid,
    ) -> Result<Option<StockMovement>, StoreError> {
        (**self).find_movement(product_id, movement_type, reference_id)
    }

    fn commit(&self, change: StockChange) -> Result<(), StoreError> {
        (**self).commit(change)
    }
}

#[derive(Debug, Default)]
struct Tables {
    stocks: HashMap<ProductId, Stock>,
    movements: Vec<StockMovement>,
}

/// In-memory stock store for tests/dev.
///
/// A single write lock covers both tables, which gives `commit` its atomicity.
#[derive(Debug)]
pub struct InMemoryStockStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a database outage: every call fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory stock store is down".to_string()))
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("lock poisoned".to_string())
    }
}

impl Default for InMemoryStockStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl StockStore for InMemoryStockStore {
    fn get(&self, product_id: ProductId) -> Result<Option<Stock>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.stocks.get(&product_id).cloned())
    }

    fn movements(&self, product_id: ProductId) -> Result<Vec<StockMovement>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .movements
            .iter()
            .filter(|m| m.product_id() == product_id)
            .cloned()
            .collect())
    }

    fn find_movement(
        &self,
        product_id: ProductId,
        movement_type: MovementType,
        reference_id: Uuid,
    ) -> Result<Option<StockMovement>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .movements
            .iter()
            .find(|m| {
                m.product_id() == product_id
                    && m.movement_type() == movement_type
                    && m.reference_id() == Some(reference_id)
            })
            .cloned())
    }

    fn commit(&self, change: StockChange) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;

        let product_id = change.stock.product_id();
        let current = tables.stocks.get(&product_id).map(|s| s.version());
        if !change.expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "stock {product_id}: expected {:?}, found {current:?}",
                change.expected
            )));
        }

        if let Some(reference) = change.movement.reference_id() {
            let duplicate = tables.movements.iter().any(|m| {
                m.product_id() == product_id
                    && m.movement_type() == change.movement.movement_type()
                    && m.reference_id() == Some(reference)
            });
            if duplicate {
                return Err(StoreError::DuplicateReference(format!(
                    "{} {} for product {product_id}",
                    change.movement.movement_type(),
                    reference
                )));
            }
        }

        tables.stocks.insert(product_id, change.stock);
        tables.movements.push(change.movement);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn creation(product_id: ProductId) -> StockChange {
        StockChange {
            stock: Stock::create(product_id, Utc::now()),
            movement: StockMovement::record(
                product_id,
                MovementType::Creation,
                0,
                Some(*product_id.as_uuid()),
                Utc::now(),
            ),
            expected: ExpectedVersion::NoRow,
        }
    }

    #[test]
    fn stale_version_is_rejected_and_nothing_is_written() {
        let store = InMemoryStockStore::new();
        let product_id = ProductId::new();
        store.commit(creation(product_id)).unwrap();

        let stock = store.get(product_id).unwrap().unwrap();
        let next = stock.increase(10, Utc::now()).unwrap();
        let change = StockChange {
            stock: next,
            movement: StockMovement::record(product_id, MovementType::Purchase, 10, None, Utc::now()),
            expected: ExpectedVersion::Exact(stock.version() + 5),
        };

        assert!(matches!(store.commit(change), Err(StoreError::Conflict(_))));
        assert_eq!(store.get(product_id).unwrap().unwrap().quantity(), 0);
        assert_eq!(store.movements(product_id).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_reference_is_rejected() {
        let store = InMemoryStockStore::new();
        let product_id = ProductId::new();
        store.commit(creation(product_id)).unwrap();

        let sale = Uuid::now_v7();
        let commit_sale = |expected: u64| {
            let stock = store.get(product_id).unwrap().unwrap();
            StockChange {
                stock: stock.set_quantity(5, Utc::now()).unwrap(),
                movement: StockMovement::record(product_id, MovementType::Sale, 1, Some(sale), Utc::now()),
                expected: ExpectedVersion::Exact(expected),
            }
        };

        store.commit(commit_sale(1)).unwrap();
        let err = store.commit(commit_sale(2)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateReference(_)));
        assert!(
            store
                .find_movement(product_id, MovementType::Sale, sale)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn outage_fails_every_call() {
        let store = InMemoryStockStore::new();
        store.set_available(false);
        assert!(matches!(store.get(ProductId::new()), Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.commit(creation(ProductId::new())),
            Err(StoreError::Unavailable(_))
        ));
    }
}
