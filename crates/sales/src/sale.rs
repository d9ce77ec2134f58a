use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerflow_core::{
    AggregateRoot, Currency, CustomerId, DomainError, DomainResult, Money, ProductId, SaleId,
};
use ledgerflow_events::{CreditSaleRequested, IntegrationEvent, SaleCompleted, SaleCompletedItem};

/// How a sale is paid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Credit,
    /// A label this service does not interpret; settled outside the credit ledger.
    Other(String),
}

impl PaymentMethod {
    /// Parse a payment label as clients send it (`"credito"`, `"Crédito"`,
    /// `"credit"`, `"efectivo"`, ...). Blank labels yield `None`.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase();
        let method = match normalized.as_str() {
            "" => return None,
            "credito" | "crédito" | "credit" => PaymentMethod::Credit,
            "efectivo" | "cash" => PaymentMethod::Cash,
            "tarjeta" | "card" => PaymentMethod::Card,
            "transferencia" | "transfer" => PaymentMethod::Transfer,
            _ => PaymentMethod::Other(normalized),
        };
        Some(method)
    }

    pub fn is_credit(&self) -> bool {
        matches!(self, PaymentMethod::Credit)
    }
}

/// A sale line as received from the command layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItemInput {
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

/// Command: create a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSaleCommand {
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub identification_type: Option<String>,
    #[serde(default)]
    pub identification_number: Option<String>,
    pub items: Vec<SaleItemInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleItem {
    product_id: ProductId,
    quantity: i64,
    unit_price: Option<Money>,
}

impl SaleItem {
    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_price(&self) -> Option<&Money> {
        self.unit_price.as_ref()
    }
}

/// Aggregate root: a persisted sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    id: SaleId,
    customer_id: Option<CustomerId>,
    payment_method: Option<PaymentMethod>,
    total: Option<Money>,
    identification_type: Option<String>,
    identification_number: Option<String>,
    items: Vec<SaleItem>,
    version: u64,
    created_at: DateTime<Utc>,
}

impl Sale {
    /// Validate a command and build the sale it describes.
    ///
    /// Every line problem is reported, not only the first. The total is the
    /// command's explicit amount when given, else the sum of priced lines when
    /// every line carries a price.
    pub fn create(command: CreateSaleCommand, currency: &Currency, now: DateTime<Utc>) -> DomainResult<Sale> {
        let mut errors = Vec::new();
        if command.items.is_empty() {
            errors.push("a sale needs at least one item".to_string());
        }
        for (idx, item) in command.items.iter().enumerate() {
            if item.quantity <= 0 {
                errors.push(format!("item {}: quantity must be positive, got {}", idx + 1, item.quantity));
            }
            if let Some(price) = item.unit_price {
                if price < Decimal::ZERO {
                    errors.push(format!("item {}: unit price cannot be negative", idx + 1));
                }
            }
        }
        if matches!(command.total_amount, Some(total) if total < Decimal::ZERO) {
            errors.push("total amount cannot be negative".to_string());
        }
        if !errors.is_empty() {
            return Err(DomainError::Validation(errors));
        }

        let items = command
            .items
            .into_iter()
            .map(|item| -> DomainResult<SaleItem> {
                Ok(SaleItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item
                        .unit_price
                        .map(|p| Money::in_currency(p, currency.clone()))
                        .transpose()?,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let total = match command.total_amount {
            Some(amount) => Some(Money::in_currency(amount, currency.clone())?),
            None => line_total(&items, currency)?,
        };

        Ok(Sale {
            id: SaleId::new(),
            customer_id: command.customer_id,
            payment_method: command.payment_method.as_deref().and_then(PaymentMethod::parse),
            total,
            identification_type: non_blank(command.identification_type),
            identification_number: non_blank(command.identification_number),
            items,
            version: 1,
            created_at: now,
        })
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn payment_method(&self) -> Option<&PaymentMethod> {
        self.payment_method.as_ref()
    }

    pub fn is_credit(&self) -> bool {
        self.payment_method.as_ref().is_some_and(PaymentMethod::is_credit)
    }

    pub fn total(&self) -> Option<&Money> {
        self.total.as_ref()
    }

    pub fn items(&self) -> &[SaleItem] {
        &self.items
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_event(&self) -> IntegrationEvent<SaleCompleted> {
        IntegrationEvent::now(SaleCompleted {
            sale_id: self.id,
            items: self
                .items
                .iter()
                .map(|item| SaleCompletedItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .collect(),
        })
    }

    /// The credit charge request for this sale, or `InvalidCreditSaleRequest`
    /// listing everything that is missing.
    pub fn credit_request(&self) -> DomainResult<IntegrationEvent<CreditSaleRequested>> {
        let mut errors = Vec::new();
        if self.identification_type.is_none() {
            errors.push("identification type is required for credit sales".to_string());
        }
        if self.identification_number.is_none() {
            errors.push("identification number is required for credit sales".to_string());
        }
        let amount = self.total.as_ref().map(Money::amount).unwrap_or_default();
        if amount <= Decimal::ZERO {
            errors.push("credit sales need a positive total amount".to_string());
        }

        match (&self.identification_type, &self.identification_number) {
            (Some(id_type), Some(number)) if errors.is_empty() => {
                Ok(IntegrationEvent::now(CreditSaleRequested {
                    sale_id: self.id,
                    identification_type: id_type.clone(),
                    identification_number: number.clone(),
                    amount,
                    occurred_on: self.created_at,
                }))
            }
            _ => Err(DomainError::InvalidCreditSaleRequest(errors)),
        }
    }
}

impl AggregateRoot for Sale {
    type Id = SaleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn line_total(items: &[SaleItem], currency: &Currency) -> DomainResult<Option<Money>> {
    let mut total = Money::zero(currency.clone());
    for item in items {
        let Some(price) = &item.unit_price else {
            return Ok(None);
        };
        total = total.add(&price.multiply(item.quantity)?)?;
    }
    Ok(Some(total))
}
