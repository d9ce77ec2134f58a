//! `ledgerflow-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by every service
//! (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CreditAccountId, CustomerId, MovementId, ProductId, PurchaseId, SaleId};
pub use money::{Currency, Money};
pub use value_object::ValueObject;
