use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use ledgerflow_core::{AggregateRoot, CreditAccountId, ExpectedVersion, SaleId};

use crate::account::{CreditAccount, CreditMovement, Identification};

/// An account write, optionally with the charge movement that explains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditChange {
    pub account: CreditAccount,
    pub movement: Option<CreditMovement>,
    /// `NoRow` opens a new account.
    pub expected: ExpectedVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("concurrency conflict: {0}")]
    Conflict(String),

    #[error("identification already registered: {0}")]
    DuplicateIdentification(String),

    /// A sale can be charged at most once.
    #[error("sale already charged: {0}")]
    DuplicateSale(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence port for credit accounts and their movement log.
///
/// `commit` writes the account and its movement atomically. Identification is
/// unique across accounts; a sale id is unique across movements.
pub trait CreditStore: Send + Sync {
    fn get(&self, id: CreditAccountId) -> Result<Option<CreditAccount>, StoreError>;

    fn find_by_identification(
        &self,
        identification: &Identification,
    ) -> Result<Option<CreditAccount>, StoreError>;

    fn movements_for_account(&self, id: CreditAccountId) -> Result<Vec<CreditMovement>, StoreError>;

    fn find_movement_by_sale(&self, sale_id: SaleId) -> Result<Option<CreditMovement>, StoreError>;

    fn commit(&self, change: CreditChange) -> Result<(), StoreError>;
}

impl<S> CreditStore for Arc<S>
where
    S: CreditStore + ?Sized,
{
    fn get(&self, id: CreditAccountId) -> Result<Option<CreditAccount>, StoreError> {
        (**self).get(id)
    }

    fn find_by_identification(
        &self,
        identification: &Identification,
    ) -> Result<Option<CreditAccount>, StoreError> {
        (**self).find_by_identification(identification)
    }

    fn movements_for_account(&self, id: CreditAccountId) -> Result<Vec<CreditMovement>, StoreError> {
        (**self).movements_for_account(id)
    }

    fn find_movement_by_sale(&self, sale_id: SaleId) -> Result<Option<CreditMovement>, StoreError> {
        (**self).find_movement_by_sale(sale_id)
    }

    fn commit(&self, change: CreditChange) -> Result<(), StoreError> {
        (**self).commit(change)
    }
}

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<CreditAccountId, CreditAccount>,
    by_identification: HashMap<Identification, CreditAccountId>,
    movements: Vec<CreditMovement>,
}

/// In-memory credit store for tests/dev.
#[derive(Debug)]
pub struct InMemoryCreditStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
}

impl InMemoryCreditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory credit store is down".to_string()))
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("lock poisoned".to_string())
    }
}

impl Default for InMemoryCreditStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl CreditStore for InMemoryCreditStore {
    fn get(&self, id: CreditAccountId) -> Result<Option<CreditAccount>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.accounts.get(&id).cloned())
    }

    fn find_by_identification(
        &self,
        identification: &Identification,
    ) -> Result<Option<CreditAccount>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .by_identification
            .get(identification)
            .and_then(|id| tables.accounts.get(id))
            .cloned())
    }

    fn movements_for_account(&self, id: CreditAccountId) -> Result<Vec<CreditMovement>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .movements
            .iter()
            .filter(|m| m.credit_account_id() == id)
            .cloned()
            .collect())
    }

    fn find_movement_by_sale(&self, sale_id: SaleId) -> Result<Option<CreditMovement>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .movements
            .iter()
            .find(|m| m.sale_id() == Some(sale_id))
            .cloned())
    }

    fn commit(&self, change: CreditChange) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;

        let id = *change.account.id();
        let identification = change.account.identification().clone();

        if change.expected == ExpectedVersion::NoRow {
            if tables.by_identification.contains_key(&identification) {
                return Err(StoreError::DuplicateIdentification(identification.to_string()));
            }
        } else if tables.by_identification.get(&identification) != Some(&id) {
            return Err(StoreError::Conflict(format!(
                "account {id} does not own identification {identification}"
            )));
        }

        let current = tables.accounts.get(&id).map(|a| a.version());
        if !change.expected.matches(current) {
            return Err(StoreError::Conflict(format!(
                "account {id}: expected {:?}, found {current:?}",
                change.expected
            )));
        }

        if let Some(sale_id) = change.movement.as_ref().and_then(|m| m.sale_id()) {
            if tables.movements.iter().any(|m| m.sale_id() == Some(sale_id)) {
                return Err(StoreError::DuplicateSale(sale_id.to_string()));
            }
        }

        tables.by_identification.insert(identification, id);
        tables.accounts.insert(id, change.account);
        if let Some(movement) = change.movement {
            tables.movements.push(movement);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledgerflow_core::Money;
    use rust_decimal_macros::dec;

    fn open(number: &str) -> CreditAccount {
        CreditAccount::open(
            None,
            "Cliente",
            Identification::new("CC", number).unwrap(),
            Money::new(dec!(1000), "COP").unwrap(),
            30,
            Utc::now(),
        )
        .unwrap()
    }

    fn create(account: CreditAccount) -> CreditChange {
        CreditChange {
            account,
            movement: None,
            expected: ExpectedVersion::NoRow,
        }
    }

    #[test]
    fn identification_is_unique() {
        let store = InMemoryCreditStore::new();
        store.commit(create(open("123"))).unwrap();
        let err = store.commit(create(open("123"))).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentification(_)));
    }

    #[test]
    fn each_sale_is_charged_at_most_once() {
        let store = InMemoryCreditStore::new();
        let account = open("456");
        store.commit(create(account.clone())).unwrap();

        let sale_id = SaleId::new();
        let charge = |current: &CreditAccount| {
            let amount = Money::new(dec!(10), "COP").unwrap();
            CreditChange {
                account: current.charge(&amount, Utc::now()).unwrap(),
                movement: Some(
                    CreditMovement::pending(current, Some(sale_id), amount, Utc::now(), Utc::now()).unwrap(),
                ),
                expected: ExpectedVersion::Exact(current.version()),
            }
        };

        store.commit(charge(&account)).unwrap();
        let current = store.get(*account.id()).unwrap().unwrap();
        assert!(matches!(store.commit(charge(&current)), Err(StoreError::DuplicateSale(_))));

        let stored = store.get(*account.id()).unwrap().unwrap();
        assert_eq!(stored.current_balance().amount(), dec!(10));
        assert_eq!(store.movements_for_account(*account.id()).unwrap().len(), 1);
        assert!(store.find_movement_by_sale(sale_id).unwrap().is_some());
    }

    #[test]
    fn stale_write_conflicts() {
        let store = InMemoryCreditStore::new();
        let account = open("789");
        store.commit(create(account.clone())).unwrap();

        let raised = account
            .update_terms(Money::new(dec!(5000), "COP").unwrap(), 60, Utc::now())
            .unwrap();
        let stale = CreditChange {
            account: raised,
            movement: None,
            expected: ExpectedVersion::Exact(7),
        };
        assert!(matches!(store.commit(stale), Err(StoreError::Conflict(_))));
    }
}
