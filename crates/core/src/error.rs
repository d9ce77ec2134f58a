//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, ledger rule rejections). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or missing input. Carries every message found, not just the first.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A monetary value could not be constructed.
    #[error("invalid money: {0}")]
    InvalidMoney(String),

    /// Arithmetic between two amounts tagged with different currencies.
    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: String, found: String },

    /// A quantity (or multiplication factor) was out of range.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A monetary amount was out of range for the operation.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A requested resource was not found (domain-level).
    #[error("not found: {0}")]
    NotFound(String),

    /// A stock decrease would leave the product with negative quantity.
    #[error("insufficient stock for product {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// A charge exceeds the account's available credit.
    #[error("insufficient credit: available {available}, requested {requested}")]
    InsufficientCredit {
        available: Decimal,
        requested: Decimal,
    },

    /// An account with the same identification type + number already exists.
    #[error("duplicate identification: {0}")]
    DuplicateIdentification(String),

    /// A credit sale is missing the data required to request the charge.
    #[error("invalid credit sale request: {}", .0.join("; "))]
    InvalidCreditSaleRequest(Vec<String>),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(vec![msg.into()])
    }

    pub fn invalid_money(msg: impl Into<String>) -> Self {
        Self::InvalidMoney(msg.into())
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// `true` for rejections that will fail the same way on every retry.
    ///
    /// Only `Conflict` is worth retrying: it signals a lost optimistic race,
    /// not a broken rule.
    pub fn is_business_rejection(&self) -> bool {
        !matches!(self, DomainError::Conflict(_))
    }

    /// Messages suitable for a client-error response body.
    pub fn messages(&self) -> Vec<String> {
        match self {
            DomainError::Validation(msgs) | DomainError::InvalidCreditSaleRequest(msgs) => {
                msgs.clone()
            }
            other => vec![other.to_string()],
        }
    }
}
