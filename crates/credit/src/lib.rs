//! Credit service: the accounts-receivable ledger.
//!
//! A `CreditAccount` per customer identification, bounded by its credit limit,
//! plus an append-only log of charges with their due dates.

pub mod account;
pub mod consumer;
pub mod ledger;
pub mod store;

pub use account::{CreditAccount, CreditMovement, CreditMovementStatus, Identification};
pub use consumer::CreditEventConsumer;
pub use ledger::{CreditLedger, CreditLedgerError, NewCreditAccount};
pub use store::{CreditChange, CreditStore, InMemoryCreditStore, StoreError};
