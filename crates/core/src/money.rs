//! Currency-tagged decimal amounts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// ISO-4217 style currency code, stored trimmed and uppercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> DomainResult<Self> {
        let code = code.as_ref().trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(DomainError::invalid_money("currency cannot be blank"));
        }
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::invalid_money(format!(
                "currency must be a 3-letter code, got '{code}'"
            )));
        }
        Ok(Self(code))
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl ValueObject for Currency {}

/// Non-negative amount in a single currency.
///
/// Every constructor validates, including deserialization, so a `Money` in hand
/// always satisfies `amount >= 0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr")]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

#[derive(Deserialize)]
struct MoneyRepr {
    amount: Decimal,
    currency: String,
}

impl TryFrom<MoneyRepr> for Money {
    type Error = DomainError;

    fn try_from(value: MoneyRepr) -> Result<Self, Self::Error> {
        Money::new(value.amount, value.currency)
    }
}

impl Money {
    pub fn new(amount: Decimal, currency: impl AsRef<str>) -> DomainResult<Self> {
        let currency = Currency::new(currency)?;
        Self::in_currency(amount, currency)
    }

    pub fn in_currency(amount: Decimal, currency: Currency) -> DomainResult<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(DomainError::invalid_money(format!(
                "amount cannot be negative, got {amount}"
            )));
        }
        Ok(Self {
            amount: amount.normalize(),
            currency,
        })
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn add(&self, other: &Money) -> DomainResult<Money> {
        self.ensure_same_currency(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| DomainError::invalid_money("addition overflow"))?;
        Ok(Money {
            amount: amount.normalize(),
            currency: self.currency.clone(),
        })
    }

    /// Subtract `other`, failing instead of going below zero.
    pub fn subtract(&self, other: &Money) -> DomainResult<Money> {
        self.ensure_same_currency(other)?;
        if other.amount > self.amount {
            return Err(DomainError::invalid_money(format!(
                "subtraction would be negative ({} - {})",
                self.amount, other.amount
            )));
        }
        Ok(Money {
            amount: (self.amount - other.amount).normalize(),
            currency: self.currency.clone(),
        })
    }

    pub fn multiply(&self, factor: i64) -> DomainResult<Money> {
        if factor <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "factor must be positive, got {factor}"
            )));
        }
        let amount = self
            .amount
            .checked_mul(Decimal::from(factor))
            .ok_or_else(|| DomainError::invalid_money("multiplication overflow"))?;
        Ok(Money {
            amount: amount.normalize(),
            currency: self.currency.clone(),
        })
    }

    fn ensure_same_currency(&self, other: &Money) -> DomainResult<()> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                expected: self.currency.0.clone(),
                found: other.currency.0.clone(),
            });
        }
        Ok(())
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

impl ValueObject for Money {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn cop(amount: Decimal) -> Money {
        Money::new(amount, "COP").unwrap()
    }

    #[test]
    fn currency_is_trimmed_and_uppercased() {
        let m = Money::new(dec!(10), "  usd ").unwrap();
        assert_eq!(m.currency().code(), "USD");
    }

    #[test]
    fn negative_amount_is_invalid_money() {
        let err = Money::new(dec!(-0.01), "USD").unwrap_err();
        assert!(matches!(err, DomainError::InvalidMoney(_)));
    }

    #[test]
    fn blank_currency_is_invalid_money() {
        let err = Money::new(dec!(1), "   ").unwrap_err();
        assert!(matches!(err, DomainError::InvalidMoney(_)));
    }

    #[test]
    fn add_across_currencies_fails() {
        let usd = Money::new(dec!(1), "USD").unwrap();
        let eur = Money::new(dec!(1), "EUR").unwrap();
        let err = usd.add(&eur).unwrap_err();
        assert_eq!(
            err,
            DomainError::CurrencyMismatch {
                expected: "USD".to_string(),
                found: "EUR".to_string(),
            }
        );
    }

    #[test]
    fn multiply_rejects_non_positive_factor() {
        let m = cop(dec!(5));
        assert!(matches!(m.multiply(0), Err(DomainError::InvalidQuantity(_))));
        assert!(matches!(m.multiply(-3), Err(DomainError::InvalidQuantity(_))));
        assert_eq!(m.multiply(3).unwrap(), cop(dec!(15)));
    }

    #[test]
    fn subtract_never_goes_negative() {
        let limit = cop(dec!(1200000));
        let balance = cop(dec!(500000));
        assert_eq!(limit.subtract(&balance).unwrap(), cop(dec!(700000)));
        assert!(matches!(
            balance.subtract(&limit),
            Err(DomainError::InvalidMoney(_))
        ));
    }

    #[test]
    fn deserialization_validates() {
        let ok: Money = serde_json::from_str(r#"{"amount":"12.50","currency":"cop"}"#).unwrap();
        assert_eq!(ok, cop(dec!(12.5)));

        let bad = serde_json::from_str::<Money>(r#"{"amount":"-1","currency":"COP"}"#);
        assert!(bad.is_err());
    }

    fn amount_strategy() -> impl Strategy<Value = Decimal> {
        (0i64..1_000_000_000_000i64, 0u32..4).prop_map(|(n, scale)| Decimal::new(n, scale))
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn add_is_commutative(a in amount_strategy(), b in amount_strategy()) {
            let (a, b) = (cop(a), cop(b));
            prop_assert_eq!(a.add(&b).unwrap(), b.add(&a).unwrap());
        }

        #[test]
        fn add_is_associative(
            a in amount_strategy(),
            b in amount_strategy(),
            c in amount_strategy(),
        ) {
            let (a, b, c) = (cop(a), cop(b), cop(c));
            let left = a.add(&b).unwrap().add(&c).unwrap();
            let right = a.add(&b.add(&c).unwrap()).unwrap();
            prop_assert_eq!(left, right);
        }

        #[test]
        fn add_across_currencies_always_fails(a in amount_strategy(), b in amount_strategy()) {
            let usd = Money::new(a, "USD").unwrap();
            let eur = Money::new(b, "EUR").unwrap();
            let is_mismatch = matches!(usd.add(&eur), Err(DomainError::CurrencyMismatch { .. }));
            prop_assert!(is_mismatch);
        }
    }
}
