use chrono::Utc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use ledgerflow_core::{AggregateRoot, DomainError, ExpectedVersion, ProductId, PurchaseId, SaleId};

use crate::stock::{MovementType, Stock, StockMovement};
use crate::store::{StockChange, StockStore, StoreError};

const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockLedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StockLedgerError {
    /// The movement's reference was already recorded: the operation happened before.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StockLedgerError::Store(StoreError::DuplicateReference(_)))
    }
}

/// Semantic tag and optional originating id for a stock movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MovementRef {
    pub movement_type: MovementType,
    pub reference_id: Option<Uuid>,
}

impl MovementRef {
    pub fn sale(sale_id: SaleId) -> Self {
        Self {
            movement_type: MovementType::Sale,
            reference_id: Some(*sale_id.as_uuid()),
        }
    }

    pub fn purchase(purchase_id: PurchaseId) -> Self {
        Self {
            movement_type: MovementType::Purchase,
            reference_id: Some(*purchase_id.as_uuid()),
        }
    }

    pub fn sale_return(sale_id: SaleId) -> Self {
        Self {
            movement_type: MovementType::Return,
            reference_id: Some(*sale_id.as_uuid()),
        }
    }

    pub fn adjustment() -> Self {
        Self {
            movement_type: MovementType::Adjustment,
            reference_id: None,
        }
    }
}

/// Stock ledger service.
///
/// Each mutation reads the row, computes the next state through `Stock`, and
/// commits row + movement atomically under `ExpectedVersion::Exact`. A lost
/// race surfaces as `StoreError::Conflict` and the whole read-modify-write is
/// retried, up to `max_conflict_retries` times.
#[derive(Debug)]
pub struct StockLedger<S> {
    store: S,
    max_conflict_retries: u32,
}

impl<S: StockStore> StockLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get_quantity(&self, product_id: ProductId) -> Result<Stock, StockLedgerError> {
        self.store
            .get(product_id)?
            .ok_or_else(|| DomainError::not_found(format!("stock for product {product_id}")).into())
    }

    /// Create the zero stock row for a product. Returns the existing row unchanged
    /// when one is already there.
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub fn create_for_product(&self, product_id: ProductId) -> Result<Stock, StockLedgerError> {
        if let Some(existing) = self.store.get(product_id)? {
            return Ok(existing);
        }

        let now = Utc::now();
        let stock = Stock::create(product_id, now);
        let change = StockChange {
            stock: stock.clone(),
            movement: StockMovement::record(
                product_id,
                MovementType::Creation,
                0,
                Some(*product_id.as_uuid()),
                now,
            ),
            expected: ExpectedVersion::NoRow,
        };

        match self.store.commit(change) {
            Ok(()) => {
                debug!(product_id = %product_id, "stock created");
                Ok(stock)
            }
            // Someone else created it between our read and our commit.
            Err(StoreError::Conflict(_)) | Err(StoreError::DuplicateReference(_)) => {
                self.get_quantity(product_id)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub fn increase(
        &self,
        product_id: ProductId,
        amount: i64,
        reference: MovementRef,
    ) -> Result<Stock, StockLedgerError> {
        self.mutate(product_id, |stock| {
            let now = Utc::now();
            let next = stock.increase(amount, now)?;
            let movement = StockMovement::record(
                product_id,
                reference.movement_type,
                amount,
                reference.reference_id,
                now,
            );
            Ok((next, movement))
        })
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub fn decrease(
        &self,
        product_id: ProductId,
        amount: i64,
        reference: MovementRef,
    ) -> Result<Stock, StockLedgerError> {
        self.mutate(product_id, |stock| {
            let now = Utc::now();
            let next = stock.decrease(amount, now)?;
            let movement = StockMovement::record(
                product_id,
                reference.movement_type,
                amount,
                reference.reference_id,
                now,
            );
            Ok((next, movement))
        })
    }

    /// Overwrite the on-hand quantity. Logged as an `Adjustment` whose movement
    /// quantity is the signed difference.
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub fn set_quantity(
        &self,
        product_id: ProductId,
        amount: i64,
        reference_id: Option<Uuid>,
    ) -> Result<Stock, StockLedgerError> {
        self.mutate(product_id, |stock| {
            let now = Utc::now();
            let next = stock.set_quantity(amount, now)?;
            let movement = StockMovement::record(
                product_id,
                MovementType::Adjustment,
                next.quantity() - stock.quantity(),
                reference_id,
                now,
            );
            Ok((next, movement))
        })
    }

    pub fn movements_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<StockMovement>, StockLedgerError> {
        Ok(self.store.movements(product_id)?)
    }

    /// Whether a movement with this tag and reference was already recorded.
    pub fn has_movement(
        &self,
        product_id: ProductId,
        reference: MovementRef,
    ) -> Result<bool, StockLedgerError> {
        let Some(reference_id) = reference.reference_id else {
            return Ok(false);
        };
        Ok(self
            .store
            .find_movement(product_id, reference.movement_type, reference_id)?
            .is_some())
    }

    fn mutate<F>(&self, product_id: ProductId, op: F) -> Result<Stock, StockLedgerError>
    where
        F: Fn(&Stock) -> Result<(Stock, StockMovement), DomainError>,
    {
        let mut attempt = 0;
        loop {
            let current = self.get_quantity(product_id)?;
            let (next, movement) = op(&current)?;
            let change = StockChange {
                stock: next.clone(),
                movement,
                expected: ExpectedVersion::Exact(current.version()),
            };

            match self.store.commit(change) {
                Ok(()) => return Ok(next),
                Err(StoreError::Conflict(msg)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(product_id = %product_id, attempt, conflict = %msg, "stock write conflict, retrying");
                }
                Err(StoreError::Conflict(msg)) => return Err(DomainError::conflict(msg).into()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
