use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use ledgerflow_core::{
    AggregateRoot, CreditAccountId, Currency, CustomerId, DomainError, ExpectedVersion, Money, SaleId,
};

use crate::account::{CreditAccount, CreditMovement, Identification};
use crate::store::{CreditChange, CreditStore, StoreError};

const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreditLedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CreditLedgerError {
    /// The sale was already charged by an earlier delivery.
    pub fn is_duplicate_sale(&self) -> bool {
        matches!(self, CreditLedgerError::Store(StoreError::DuplicateSale(_)))
    }
}

/// Input for opening a credit account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCreditAccount {
    pub customer_id: Option<CustomerId>,
    pub customer_name: String,
    pub identification_type: String,
    pub identification_number: String,
    pub credit_limit: Decimal,
    pub payment_term_days: u32,
}

/// Credit ledger service. All amounts are in the ledger's configured currency.
#[derive(Debug)]
pub struct CreditLedger<S> {
    store: S,
    currency: Currency,
    max_conflict_retries: u32,
}

impl<S: CreditStore> CreditLedger<S> {
    pub fn new(store: S, currency: Currency) -> Self {
        Self {
            store,
            currency,
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

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn find_account(
        &self,
        identification_type: &str,
        identification_number: &str,
    ) -> Result<CreditAccount, CreditLedgerError> {
        let identification = Identification::new(identification_type, identification_number)?;
        self.lookup(&identification)
    }

    /// Charge an account, recording a `Pending` movement due
    /// `occurred_on + payment_term_days`.
    #[instrument(skip(self), err)]
    pub fn register_charge(
        &self,
        identification_type: &str,
        identification_number: &str,
        amount: Decimal,
        sale_id: Option<SaleId>,
        occurred_on: DateTime<Utc>,
    ) -> Result<CreditMovement, CreditLedgerError> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::invalid_amount(format!("charge amount must be positive, got {amount}")).into());
        }
        let amount = Money::in_currency(amount, self.currency.clone())?;
        let identification = Identification::new(identification_type, identification_number)?;

        let mut attempt = 0;
        loop {
            let account = self.lookup(&identification)?;
            let now = Utc::now();
            let charged = account.charge(&amount, now)?;
            let movement = CreditMovement::pending(&account, sale_id, amount.clone(), occurred_on, now)?;

            let change = CreditChange {
                account: charged,
                movement: Some(movement.clone()),
                expected: ExpectedVersion::Exact(account.version()),
            };
            match self.store.commit(change) {
                Ok(()) => {
                    info!(
                        account_id = %account.id(),
                        amount = %amount,
                        due_date = %movement.due_date(),
                        "credit charge registered"
                    );
                    return Ok(movement);
                }
                Err(StoreError::Conflict(msg)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(account_id = %account.id(), attempt, conflict = %msg, "credit write conflict, retrying");
                }
                Err(StoreError::Conflict(msg)) => return Err(DomainError::conflict(msg).into()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    #[instrument(skip(self, request), fields(identification_type = %request.identification_type), err)]
    pub fn create_account(&self, request: NewCreditAccount) -> Result<CreditAccount, CreditLedgerError> {
        let identification = Identification::new(&request.identification_type, &request.identification_number)?;
        let credit_limit = self.limit(request.credit_limit)?;

        if self.store.find_by_identification(&identification)?.is_some() {
            return Err(DomainError::DuplicateIdentification(identification.to_string()).into());
        }

        let account = CreditAccount::open(
            request.customer_id,
            request.customer_name,
            identification,
            credit_limit,
            request.payment_term_days,
            Utc::now(),
        )?;

        let change = CreditChange {
            account: account.clone(),
            movement: None,
            expected: ExpectedVersion::NoRow,
        };
        match self.store.commit(change) {
            Ok(()) => {
                debug!(account_id = %account.id(), "credit account opened");
                Ok(account)
            }
            Err(StoreError::DuplicateIdentification(id)) => {
                Err(DomainError::DuplicateIdentification(id).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the limit and payment terms of an existing account.
    #[instrument(skip(self), err)]
    pub fn update_credit_terms(
        &self,
        identification_type: &str,
        identification_number: &str,
        credit_limit: Decimal,
        payment_term_days: u32,
    ) -> Result<CreditAccount, CreditLedgerError> {
        let identification = Identification::new(identification_type, identification_number)?;
        let credit_limit = self.limit(credit_limit)?;

        let mut attempt = 0;
        loop {
            let account = self.lookup(&identification)?;
            let updated = account.update_terms(credit_limit.clone(), payment_term_days, Utc::now())?;
            let change = CreditChange {
                account: updated.clone(),
                movement: None,
                expected: ExpectedVersion::Exact(account.version()),
            };
            match self.store.commit(change) {
                Ok(()) => return Ok(updated),
                Err(StoreError::Conflict(msg)) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(account_id = %account.id(), attempt, conflict = %msg, "credit write conflict, retrying");
                }
                Err(StoreError::Conflict(msg)) => return Err(DomainError::conflict(msg).into()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn find_movement_by_sale(&self, sale_id: SaleId) -> Result<Option<CreditMovement>, CreditLedgerError> {
        Ok(self.store.find_movement_by_sale(sale_id)?)
    }

    pub fn movements_for_account(
        &self,
        account_id: CreditAccountId,
    ) -> Result<Vec<CreditMovement>, CreditLedgerError> {
        Ok(self.store.movements_for_account(account_id)?)
    }

    fn lookup(&self, identification: &Identification) -> Result<CreditAccount, CreditLedgerError> {
        self.store
            .find_by_identification(identification)?
            .ok_or_else(|| DomainError::not_found(format!("credit account {identification}")).into())
    }

    fn limit(&self, amount: Decimal) -> Result<Money, CreditLedgerError> {
        if amount < Decimal::ZERO {
            return Err(DomainError::invalid_amount(format!("credit limit cannot be negative, got {amount}")).into());
        }
        Ok(Money::in_currency(amount, self.currency.clone())?)
    }
}
