//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two `Money`
/// instances with the same amount and currency are the same money. To "modify" a
/// value object, build a new one; operations such as `Money::add` return fresh
/// values and never mutate their operands.
///
/// - **Value Object**: `Money`, `Currency`, `Identification`
/// - **Entity**: `Stock`, `CreditAccount` (identity survives state changes)
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
