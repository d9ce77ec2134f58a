//! Stock aggregate and its append-only movement log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ledgerflow_core::{AggregateRoot, DomainError, DomainResult, Entity, MovementId, ProductId};

/// Why a stock movement happened.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Sale,
    Purchase,
    Adjustment,
    Return,
    Creation,
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            MovementType::Sale => "sale",
            MovementType::Purchase => "purchase",
            MovementType::Adjustment => "adjustment",
            MovementType::Return => "return",
            MovementType::Creation => "creation",
        };
        f.write_str(s)
    }
}

/// Aggregate root: the on-hand quantity of one product.
///
/// There is no public way to build a `Stock` with arbitrary fields: it starts at
/// zero through `Stock::create` and changes only through `increase`, `decrease`
/// and `set_quantity`, each of which returns the next state and leaves `self`
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StockRepr")]
pub struct Stock {
    product_id: ProductId,
    quantity: i64,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StockRepr {
    product_id: ProductId,
    quantity: i64,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StockRepr> for Stock {
    type Error = DomainError;

    fn try_from(repr: StockRepr) -> Result<Self, Self::Error> {
        if repr.quantity < 0 {
            return Err(DomainError::invariant(format!(
                "stock for product {} cannot be negative, got {}",
                repr.product_id, repr.quantity
            )));
        }
        if repr.version == 0 {
            return Err(DomainError::invariant("stock version starts at 1"));
        }
        Ok(Self {
            product_id: repr.product_id,
            quantity: repr.quantity,
            version: repr.version,
            created_at: repr.created_at,
            updated_at: repr.updated_at,
        })
    }
}

impl Stock {
    /// First reference to a product: zero on hand, version 1.
    pub fn create(product_id: ProductId, now: DateTime<Utc>) -> Self {
        Self {
            product_id,
            quantity: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn increase(&self, amount: i64, now: DateTime<Utc>) -> DomainResult<Stock> {
        ensure_positive(amount)?;
        let quantity = self
            .quantity
            .checked_add(amount)
            .ok_or_else(|| DomainError::invalid_quantity("stock quantity overflow"))?;
        Ok(self.next(quantity, now))
    }

    pub fn decrease(&self, amount: i64, now: DateTime<Utc>) -> DomainResult<Stock> {
        ensure_positive(amount)?;
        if self.quantity - amount < 0 {
            return Err(DomainError::InsufficientStock {
                product: self.product_id.to_string(),
                available: self.quantity,
                requested: amount,
            });
        }
        Ok(self.next(self.quantity - amount, now))
    }

    pub fn set_quantity(&self, amount: i64, now: DateTime<Utc>) -> DomainResult<Stock> {
        if amount < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "quantity cannot be negative, got {amount}"
            )));
        }
        Ok(self.next(amount, now))
    }

    fn next(&self, quantity: i64, now: DateTime<Utc>) -> Stock {
        Stock {
            quantity,
            version: self.version + 1,
            updated_at: now,
            ..self.clone()
        }
    }
}

fn ensure_positive(amount: i64) -> DomainResult<()> {
    if amount <= 0 {
        return Err(DomainError::invalid_quantity(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

impl AggregateRoot for Stock {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Append-only movement log row.
///
/// `quantity` is the amount moved for sales, purchases, returns and creation;
/// for adjustments it is the signed difference the adjustment introduced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    id: MovementId,
    product_id: ProductId,
    movement_type: MovementType,
    quantity: i64,
    reference_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn record(
        product_id: ProductId,
        movement_type: MovementType,
        quantity: i64,
        reference_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            product_id,
            movement_type,
            quantity,
            reference_id,
            created_at: now,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn movement_type(&self) -> MovementType {
        self.movement_type
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn reference_id(&self) -> Option<Uuid> {
        self.reference_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for StockMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
