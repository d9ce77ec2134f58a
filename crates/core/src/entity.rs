//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Ledger movement rows are entities too: they have an id and are never
/// mutated after insertion.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
