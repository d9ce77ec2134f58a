//! Integration event payloads exchanged between the services.
//!
//! Field names serialize in camelCase, flattened into the envelope.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ledgerflow_core::{CustomerId, ProductId, PurchaseId, SaleId};

use crate::event::IntegrationPayload;
use crate::routing;

/// A line of a completed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleCompletedItem {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Published by sales once a sale is persisted. Inventory decrements stock per item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleCompleted {
    pub sale_id: SaleId,
    pub items: Vec<SaleCompletedItem>,
}

impl IntegrationPayload for SaleCompleted {
    const ROUTING_KEY: &'static str = routing::SALE_COMPLETED;
}

/// Published by sales for credit sales. The credit service charges the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditSaleRequested {
    pub sale_id: SaleId,
    pub identification_type: String,
    pub identification_number: String,
    pub amount: Decimal,
    pub occurred_on: DateTime<Utc>,
}

impl IntegrationPayload for CreditSaleRequested {
    const ROUTING_KEY: &'static str = routing::SALE_CREDIT_REQUESTED;
}

/// Published by the customer service when a customer is granted credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerCreditApproved {
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub identification_type: String,
    pub identification_number: String,
    pub credit_limit: Decimal,
    pub payment_term_days: u32,
}

impl IntegrationPayload for CustomerCreditApproved {
    const ROUTING_KEY: &'static str = routing::CUSTOMER_CREDIT_APPROVED;
}

/// Published by purchasing when goods for a purchase arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReceived {
    pub purchase_id: PurchaseId,
    pub product_id: ProductId,
    pub quantity: i64,
}

impl IntegrationPayload for StockReceived {
    const ROUTING_KEY: &'static str = routing::STOCK_RECEIVED;
}

/// Published by inventory after stock leaves through a sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDecreased {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl IntegrationPayload for StockDecreased {
    const ROUTING_KEY: &'static str = routing::STOCK_DECREASED;
}

/// Published by the product catalogue when a product is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreated {
    pub product_id: ProductId,
    pub name: String,
}

impl IntegrationPayload for ProductCreated {
    const ROUTING_KEY: &'static str = routing::PRODUCT_CREATED;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IntegrationEvent;
    use rust_decimal_macros::dec;

    #[test]
    fn envelope_flattens_payload_in_camel_case() {
        let sale_id = SaleId::new();
        let product_id = ProductId::new();
        let event = IntegrationEvent::now(SaleCompleted {
            sale_id,
            items: vec![SaleCompletedItem {
                product_id,
                quantity: 3,
            }],
        });

        let json = serde_json::to_value(&event).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("eventId"));
        assert!(obj.contains_key("occurredAt"));
        assert_eq!(obj["saleId"], serde_json::json!(sale_id.to_string()));
        assert_eq!(obj["items"][0]["productId"], serde_json::json!(product_id.to_string()));
        assert_eq!(obj["items"][0]["quantity"], serde_json::json!(3));
        assert_eq!(event.routing_key(), "sale.completed");
    }

    #[test]
    fn credit_request_accepts_numeric_or_string_amounts() {
        let raw = serde_json::json!({
            "eventId": "0190f1a4-7c1e-7d4e-9b7a-5f0e1c2d3e4f",
            "occurredAt": "2024-01-10T00:00:00Z",
            "saleId": "0190f1a4-7c1e-7d4e-9b7a-5f0e1c2d3e50",
            "identificationType": "CC",
            "identificationNumber": "1020304050",
            "amount": 500000,
            "occurredOn": "2024-01-10T00:00:00Z"
        });
        let event: IntegrationEvent<CreditSaleRequested> = serde_json::from_value(raw).unwrap();
        assert_eq!(event.payload().amount, dec!(500000));
        assert_eq!(event.payload().identification_type, "CC");
    }
}
