//! Credit accounts and the charges recorded against them.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ledgerflow_core::{
    AggregateRoot, CreditAccountId, CustomerId, DomainError, DomainResult, Entity, Money, MovementId,
    SaleId, ValueObject,
};

/// Customer identification document: type (e.g. `CC`, `NIT`) plus number.
///
/// The pair is the natural key of a credit account. Both parts are trimmed;
/// the type is uppercased so `cc` and `CC` name the same document kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "IdentificationRepr")]
pub struct Identification {
    id_type: String,
    number: String,
}

#[derive(Deserialize)]
struct IdentificationRepr {
    id_type: String,
    number: String,
}

impl TryFrom<IdentificationRepr> for Identification {
    type Error = DomainError;

    fn try_from(repr: IdentificationRepr) -> Result<Self, Self::Error> {
        Identification::new(repr.id_type, repr.number)
    }
}

impl Identification {
    pub fn new(id_type: impl AsRef<str>, number: impl AsRef<str>) -> DomainResult<Self> {
        let id_type = id_type.as_ref().trim().to_ascii_uppercase();
        let number = number.as_ref().trim().to_string();

        let mut errors = Vec::new();
        if id_type.is_empty() {
            errors.push("identification type is required".to_string());
        }
        if number.is_empty() {
            errors.push("identification number is required".to_string());
        }
        if !errors.is_empty() {
            return Err(DomainError::Validation(errors));
        }

        Ok(Self { id_type, number })
    }

    pub fn id_type(&self) -> &str {
        &self.id_type
    }

    pub fn number(&self) -> &str {
        &self.number
    }
}

impl core::fmt::Display for Identification {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.id_type, self.number)
    }
}

impl ValueObject for Identification {}

/// Aggregate root: a customer's credit line.
///
/// Invariant: `0 <= current_balance <= credit_limit`, both in the same currency.
/// Charges that would break it are rejected, never clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CreditAccountRepr")]
pub struct CreditAccount {
    id: CreditAccountId,
    customer_id: Option<CustomerId>,
    customer_name: String,
    identification: Identification,
    credit_limit: Money,
    payment_term_days: u32,
    current_balance: Money,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct CreditAccountRepr {
    id: CreditAccountId,
    customer_id: Option<CustomerId>,
    customer_name: String,
    identification: Identification,
    credit_limit: Money,
    payment_term_days: u32,
    current_balance: Money,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CreditAccountRepr> for CreditAccount {
    type Error = DomainError;

    fn try_from(repr: CreditAccountRepr) -> Result<Self, Self::Error> {
        if repr.customer_name.trim().is_empty() {
            return Err(DomainError::validation("customer name is required"));
        }
        if repr.version == 0 {
            return Err(DomainError::invariant("credit account version starts at 1"));
        }
        if repr.credit_limit.currency() != repr.current_balance.currency() {
            return Err(DomainError::invariant("credit limit and balance currencies differ"));
        }
        if repr.current_balance.amount() > repr.credit_limit.amount() {
            return Err(DomainError::invariant(format!(
                "balance {} exceeds credit limit {} for {}",
                repr.current_balance, repr.credit_limit, repr.identification
            )));
        }
        Ok(Self {
            id: repr.id,
            customer_id: repr.customer_id,
            customer_name: repr.customer_name,
            identification: repr.identification,
            credit_limit: repr.credit_limit,
            payment_term_days: repr.payment_term_days,
            current_balance: repr.current_balance,
            version: repr.version,
            created_at: repr.created_at,
            updated_at: repr.updated_at,
        })
    }
}

impl CreditAccount {
    pub fn open(
        customer_id: Option<CustomerId>,
        customer_name: impl Into<String>,
        identification: Identification,
        credit_limit: Money,
        payment_term_days: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let customer_name = customer_name.into().trim().to_string();
        if customer_name.is_empty() {
            return Err(DomainError::validation("customer name is required"));
        }

        Ok(Self {
            id: CreditAccountId::new(),
            customer_id,
            customer_name,
            identification,
            current_balance: Money::zero(credit_limit.currency().clone()),
            credit_limit,
            payment_term_days,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    pub fn identification(&self) -> &Identification {
        &self.identification
    }

    pub fn credit_limit(&self) -> &Money {
        &self.credit_limit
    }

    pub fn payment_term_days(&self) -> u32 {
        self.payment_term_days
    }

    pub fn current_balance(&self) -> &Money {
        &self.current_balance
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// `credit_limit - current_balance`.
    pub fn available_credit(&self) -> DomainResult<Money> {
        self.credit_limit.subtract(&self.current_balance)
    }

    /// Next state after charging `amount`.
    pub fn charge(&self, amount: &Money, now: DateTime<Utc>) -> DomainResult<CreditAccount> {
        if amount.is_zero() {
            return Err(DomainError::invalid_amount("charge amount must be positive"));
        }

        let available = self.available_credit()?;
        let balance = self.current_balance.add(amount)?;
        if amount.amount() > available.amount() {
            return Err(DomainError::InsufficientCredit {
                available: available.amount(),
                requested: amount.amount(),
            });
        }

        Ok(CreditAccount {
            current_balance: balance,
            version: self.version + 1,
            updated_at: now,
            ..self.clone()
        })
    }

    /// Next state with new limit and payment terms. A limit below the
    /// outstanding balance is refused.
    pub fn update_terms(
        &self,
        credit_limit: Money,
        payment_term_days: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<CreditAccount> {
        if credit_limit.currency() != self.credit_limit.currency() {
            return Err(DomainError::CurrencyMismatch {
                expected: self.credit_limit.currency().to_string(),
                found: credit_limit.currency().to_string(),
            });
        }
        if credit_limit.amount() < self.current_balance.amount() {
            return Err(DomainError::invariant(format!(
                "credit limit {credit_limit} is below the outstanding balance {}",
                self.current_balance
            )));
        }

        Ok(CreditAccount {
            credit_limit,
            payment_term_days,
            version: self.version + 1,
            updated_at: now,
            ..self.clone()
        })
    }

    pub fn has_terms(&self, credit_limit: &Money, payment_term_days: u32) -> bool {
        &self.credit_limit == credit_limit && self.payment_term_days == payment_term_days
    }

    /// Calendar due date for a charge made at `occurred_on`.
    pub fn due_date(&self, occurred_on: DateTime<Utc>) -> DomainResult<NaiveDate> {
        occurred_on
            .date_naive()
            .checked_add_days(Days::new(u64::from(self.payment_term_days)))
            .ok_or_else(|| DomainError::invariant("due date out of range"))
    }
}

impl AggregateRoot for CreditAccount {
    type Id = CreditAccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreditMovementStatus {
    Pending,
    Settled,
    Overdue,
    Cancelled,
}

/// One accepted charge against a credit account. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditMovement {
    id: MovementId,
    credit_account_id: CreditAccountId,
    sale_id: Option<SaleId>,
    amount: Money,
    due_date: NaiveDate,
    status: CreditMovementStatus,
    created_at: DateTime<Utc>,
}

impl CreditMovement {
    pub fn pending(
        account: &CreditAccount,
        sale_id: Option<SaleId>,
        amount: Money,
        occurred_on: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if amount.is_zero() {
            return Err(DomainError::invalid_amount("movement amount must be positive"));
        }
        Ok(Self {
            id: MovementId::new(),
            credit_account_id: *account.id(),
            sale_id,
            due_date: account.due_date(occurred_on)?,
            amount,
            status: CreditMovementStatus::Pending,
            created_at: now,
        })
    }

    pub fn credit_account_id(&self) -> CreditAccountId {
        self.credit_account_id
    }

    pub fn sale_id(&self) -> Option<SaleId> {
        self.sale_id
    }

    pub fn amount(&self) -> &Money {
        &self.amount
    }

    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    pub fn status(&self) -> CreditMovementStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Entity for CreditMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn cop(amount: Decimal) -> Money {
        Money::new(amount, "COP").unwrap()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn account(limit: Decimal, term: u32) -> CreditAccount {
        CreditAccount::open(
            None,
            "Ana Gómez",
            Identification::new("cc", " 1020304050 ").unwrap(),
            cop(limit),
            term,
            test_time(),
        )
        .unwrap()
    }

    #[test]
    fn deserialising_enforces_account_invariants() {
        let acc = account(dec!(1000), 30).charge(&cop(dec!(400)), test_time()).unwrap();
        let json = serde_json::to_value(&acc).unwrap();
        assert_eq!(serde_json::from_value::<CreditAccount>(json.clone()).unwrap(), acc);

        let mut over_limit = json.clone();
        over_limit["current_balance"]["amount"] = serde_json::json!("1500");
        assert!(serde_json::from_value::<CreditAccount>(over_limit).is_err());

        let mut blank_id = json;
        blank_id["identification"]["number"] = serde_json::json!("  ");
        assert!(serde_json::from_value::<CreditAccount>(blank_id).is_err());
    }

    #[test]
    fn identification_is_normalised_and_required() {
        let id = Identification::new(" nit ", " 900123 ").unwrap();
        assert_eq!(id.id_type(), "NIT");
        assert_eq!(id.number(), "900123");

        match Identification::new(" ", "").unwrap_err() {
            DomainError::Validation(msgs) => assert_eq!(msgs.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn charge_within_limit_then_rejected_over_limit() {
        let acc = account(dec!(1200000), 30);
        let charged = acc.charge(&cop(dec!(500000)), test_time()).unwrap();
        assert_eq!(charged.current_balance().amount(), dec!(500000));
        assert_eq!(charged.version(), acc.version() + 1);

        match charged.charge(&cop(dec!(800000)), test_time()).unwrap_err() {
            DomainError::InsufficientCredit {
                available,
                requested,
            } => {
                assert_eq!(available, dec!(700000));
                assert_eq!(requested, dec!(800000));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(charged.current_balance().amount(), dec!(500000));
    }

    #[test]
    fn zero_and_foreign_currency_charges_are_rejected() {
        let acc = account(dec!(100), 0);
        assert!(matches!(
            acc.charge(&cop(dec!(0)), test_time()),
            Err(DomainError::InvalidAmount(_))
        ));
        assert!(matches!(
            acc.charge(&Money::new(dec!(1), "USD").unwrap(), test_time()),
            Err(DomainError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn due_date_adds_calendar_days() {
        let acc = account(dec!(1000), 30);
        let occurred_on = Utc.with_ymd_and_hms(2024, 1, 10, 15, 30, 0).unwrap();
        assert_eq!(
            acc.due_date(occurred_on).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 9).unwrap()
        );

        let movement =
            CreditMovement::pending(&acc, Some(SaleId::new()), cop(dec!(10)), occurred_on, test_time()).unwrap();
        assert_eq!(movement.status(), CreditMovementStatus::Pending);
        assert_eq!(movement.due_date(), NaiveDate::from_ymd_opt(2024, 2, 9).unwrap());
        assert_eq!(movement.credit_account_id(), *acc.id());
    }

    #[test]
    fn limit_cannot_drop_below_balance() {
        let acc = account(dec!(1000), 30)
            .charge(&cop(dec!(600)), test_time())
            .unwrap();
        assert!(matches!(
            acc.update_terms(cop(dec!(500)), 15, test_time()),
            Err(DomainError::InvariantViolation(_))
        ));

        let raised = acc.update_terms(cop(dec!(2000)), 45, test_time()).unwrap();
        assert!(raised.has_terms(&cop(dec!(2000)), 45));
        assert_eq!(raised.current_balance().amount(), dec!(600));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of charges the balance stays within the
        /// limit, and rejected charges leave the account untouched.
        #[test]
        fn balance_never_exceeds_limit(
            limit in 0u64..5_000_000,
            charges in prop::collection::vec(0u64..2_000_000, 1..30),
        ) {
            let mut acc = account(Decimal::from(limit), 30);
            for c in charges {
                let before = acc.clone();
                match acc.charge(&cop(Decimal::from(c)), test_time()) {
                    Ok(next) => acc = next,
                    Err(_) => prop_assert_eq!(&acc, &before),
                }
                prop_assert!(acc.current_balance().amount() <= acc.credit_limit().amount());
                prop_assert!(acc.current_balance().amount() >= Decimal::ZERO);
            }
        }
    }
}
