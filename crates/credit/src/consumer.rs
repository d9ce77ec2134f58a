//! Credit ledger consumer: opens accounts and updates terms on approvals,
//! and registers charges for credit sales exactly once per sale.

use std::sync::Arc;

use tracing::{info, warn};

use ledgerflow_core::{DomainError, Money};
use ledgerflow_events::{
    ConsumerError, CreditSaleRequested, CustomerCreditApproved, Delivery, EventHandler, HandleOutcome,
    IntegrationEvent, decode, routing,
};

use crate::ledger::{CreditLedger, CreditLedgerError, NewCreditAccount};
use crate::store::{CreditStore, StoreError};

pub const QUEUE_NAME: &str = "credit.accounts";

/// Drives the credit ledger from `sale.credit.requested` and
/// `customer.credit-approved`.
pub struct CreditEventConsumer<S> {
    ledger: Arc<CreditLedger<S>>,
}

impl<S: CreditStore> CreditEventConsumer<S> {
    pub fn new(ledger: Arc<CreditLedger<S>>) -> Self {
        Self { ledger }
    }

    fn on_credit_sale_requested(
        &self,
        event: IntegrationEvent<CreditSaleRequested>,
    ) -> Result<HandleOutcome, ConsumerError> {
        let request = event.payload();
        if self.ledger.find_movement_by_sale(request.sale_id).map_err(classify)?.is_some() {
            info!(sale_id = %request.sale_id, event_id = %event.event_id(), "sale already charged, skipping");
            return Ok(HandleOutcome::AlreadyApplied);
        }

        match self.ledger.register_charge(
            &request.identification_type,
            &request.identification_number,
            request.amount,
            Some(request.sale_id),
            request.occurred_on,
        ) {
            Ok(_) => Ok(HandleOutcome::Applied),
            Err(e) if e.is_duplicate_sale() => Ok(HandleOutcome::AlreadyApplied),
            // The approval opening the account may not have been delivered yet.
            Err(CreditLedgerError::Domain(e @ DomainError::NotFound(_))) => {
                warn!(sale_id = %request.sale_id, event_id = %event.event_id(), "no credit account yet, will retry");
                Err(ConsumerError::Transient(e.to_string()))
            }
            Err(e) => Err(classify(e)),
        }
    }

    fn on_customer_credit_approved(
        &self,
        event: IntegrationEvent<CustomerCreditApproved>,
    ) -> Result<HandleOutcome, ConsumerError> {
        let approved = event.payload();
        let existing = match self
            .ledger
            .find_account(&approved.identification_type, &approved.identification_number)
        {
            Ok(account) => Some(account),
            Err(CreditLedgerError::Domain(DomainError::NotFound(_))) => None,
            Err(e) => return Err(classify(e)),
        };

        match existing {
            Some(account) => {
                let limit = Money::in_currency(approved.credit_limit, self.ledger.currency().clone())
                    .map_err(|e| classify(e.into()))?;
                if account.has_terms(&limit, approved.payment_term_days) {
                    return Ok(HandleOutcome::AlreadyApplied);
                }
                self.ledger
                    .update_credit_terms(
                        &approved.identification_type,
                        &approved.identification_number,
                        approved.credit_limit,
                        approved.payment_term_days,
                    )
                    .map_err(classify)?;
                info!(customer_id = %approved.customer_id, "credit terms updated");
                Ok(HandleOutcome::Applied)
            }
            None => {
                let request = NewCreditAccount {
                    customer_id: Some(approved.customer_id),
                    customer_name: approved.customer_name.clone(),
                    identification_type: approved.identification_type.clone(),
                    identification_number: approved.identification_number.clone(),
                    credit_limit: approved.credit_limit,
                    payment_term_days: approved.payment_term_days,
                };
                match self.ledger.create_account(request) {
                    Ok(_) => Ok(HandleOutcome::Applied),
                    // Lost a race with a concurrent delivery; the retry takes the update path.
                    Err(CreditLedgerError::Domain(DomainError::DuplicateIdentification(id))) => {
                        warn!(identification = %id, "account created concurrently, retrying as update");
                        Err(ConsumerError::Transient(format!("account {id} created concurrently")))
                    }
                    Err(e) => Err(classify(e)),
                }
            }
        }
    }
}

impl<S: CreditStore> EventHandler for CreditEventConsumer<S> {
    fn name(&self) -> &'static str {
        QUEUE_NAME
    }

    fn routing_keys(&self) -> Vec<&'static str> {
        vec![routing::SALE_CREDIT_REQUESTED, routing::CUSTOMER_CREDIT_APPROVED]
    }

    fn handle(&self, delivery: &Delivery) -> Result<HandleOutcome, ConsumerError> {
        let message = &delivery.message;
        match message.routing_key.as_str() {
            routing::SALE_CREDIT_REQUESTED => self.on_credit_sale_requested(decode(message)?),
            routing::CUSTOMER_CREDIT_APPROVED => self.on_customer_credit_approved(decode(message)?),
            _ => Ok(HandleOutcome::Ignored),
        }
    }
}

fn classify(err: CreditLedgerError) -> ConsumerError {
    match err {
        CreditLedgerError::Domain(e) if e.is_business_rejection() => ConsumerError::Permanent(e.to_string()),
        CreditLedgerError::Domain(e) => ConsumerError::Transient(e.to_string()),
        CreditLedgerError::Store(e @ (StoreError::Unavailable(_) | StoreError::Conflict(_))) => {
            ConsumerError::Transient(e.to_string())
        }
        CreditLedgerError::Store(e) => ConsumerError::Permanent(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use ledgerflow_core::{Currency, CustomerId, SaleId};
    use ledgerflow_events::{BusMessage, IntegrationPayload};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::store::InMemoryCreditStore;

    fn setup() -> (CreditEventConsumer<InMemoryCreditStore>, Arc<CreditLedger<InMemoryCreditStore>>) {
        let ledger = Arc::new(CreditLedger::new(
            InMemoryCreditStore::new(),
            Currency::new("COP").unwrap(),
        ));
        (CreditEventConsumer::new(Arc::clone(&ledger)), ledger)
    }

    fn delivery<E: IntegrationPayload>(event: &IntegrationEvent<E>) -> Delivery {
        Delivery {
            delivery_tag: 1,
            queue: QUEUE_NAME.to_string(),
            redelivered: false,
            message: BusMessage::from_event(event, E::ROUTING_KEY).unwrap(),
        }
    }

    fn approval(limit: Decimal, term: u32) -> IntegrationEvent<CustomerCreditApproved> {
        IntegrationEvent::now(CustomerCreditApproved {
            customer_id: CustomerId::new(),
            customer_name: "Ana Gómez".to_string(),
            identification_type: "CC".to_string(),
            identification_number: "1020304050".to_string(),
            credit_limit: limit,
            payment_term_days: term,
        })
    }

    fn credit_request(sale_id: SaleId, amount: Decimal) -> IntegrationEvent<CreditSaleRequested> {
        IntegrationEvent::now(CreditSaleRequested {
            sale_id,
            identification_type: "CC".to_string(),
            identification_number: "1020304050".to_string(),
            amount,
            occurred_on: Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
        })
    }

    #[test]
    fn approval_opens_then_updates_account() {
        let (consumer, ledger) = setup();
        let first = approval(dec!(1200000), 30);
        assert_eq!(consumer.handle(&delivery(&first)).unwrap(), HandleOutcome::Applied);
        assert_eq!(consumer.handle(&delivery(&first)).unwrap(), HandleOutcome::AlreadyApplied);

        let raised = approval(dec!(2000000), 45);
        assert_eq!(consumer.handle(&delivery(&raised)).unwrap(), HandleOutcome::Applied);

        let account = ledger.find_account("CC", "1020304050").unwrap();
        assert_eq!(account.credit_limit().amount(), dec!(2000000));
        assert_eq!(account.payment_term_days(), 45);
    }

    #[test]
    fn redelivered_credit_request_charges_once() {
        let (consumer, ledger) = setup();
        consumer.handle(&delivery(&approval(dec!(1200000), 30))).unwrap();

        let sale_id = SaleId::new();
        let event = credit_request(sale_id, dec!(500000));
        assert_eq!(consumer.handle(&delivery(&event)).unwrap(), HandleOutcome::Applied);
        assert_eq!(consumer.handle(&delivery(&event)).unwrap(), HandleOutcome::AlreadyApplied);

        let account = ledger.find_account("CC", "1020304050").unwrap();
        assert_eq!(account.current_balance().amount(), dec!(500000));
        let movement = ledger.find_movement_by_sale(sale_id).unwrap().unwrap();
        assert_eq!(movement.due_date(), NaiveDate::from_ymd_opt(2024, 2, 9).unwrap());
    }

    #[test]
    fn over_limit_request_is_permanent() {
        let (consumer, ledger) = setup();
        consumer.handle(&delivery(&approval(dec!(1200000), 30))).unwrap();
        consumer.handle(&delivery(&credit_request(SaleId::new(), dec!(500000)))).unwrap();

        let err = consumer
            .handle(&delivery(&credit_request(SaleId::new(), dec!(800000))))
            .unwrap_err();
        assert!(matches!(err, ConsumerError::Permanent(_)));
        assert_eq!(
            ledger.find_account("CC", "1020304050").unwrap().current_balance().amount(),
            dec!(500000)
        );
    }

    #[test]
    fn unknown_account_and_outage_are_transient() {
        let (consumer, ledger) = setup();
        let event = credit_request(SaleId::new(), dec!(10));
        assert!(matches!(consumer.handle(&delivery(&event)), Err(ConsumerError::Transient(_))));

        ledger.store().set_available(false);
        assert!(consumer.handle(&delivery(&event)).unwrap_err().is_transient());
    }

    #[test]
    fn credit_request_before_approval_applies_once_account_opens() {
        let (consumer, ledger) = setup();
        let sale_id = SaleId::new();
        let request = credit_request(sale_id, dec!(300000));

        assert!(consumer.handle(&delivery(&request)).unwrap_err().is_transient());

        consumer.handle(&delivery(&approval(dec!(1200000), 30))).unwrap();
        assert_eq!(consumer.handle(&delivery(&request)).unwrap(), HandleOutcome::Applied);
        assert_eq!(
            ledger.find_account("CC", "1020304050").unwrap().current_balance().amount(),
            dec!(300000)
        );
        assert!(ledger.find_movement_by_sale(sale_id).unwrap().is_some());
    }

    #[test]
    fn lowering_limit_below_balance_is_permanent() {
        let (consumer, _ledger) = setup();
        consumer.handle(&delivery(&approval(dec!(1000), 30))).unwrap();
        consumer.handle(&delivery(&credit_request(SaleId::new(), dec!(800)))).unwrap();

        let err = consumer.handle(&delivery(&approval(dec!(500), 30))).unwrap_err();
        assert!(matches!(err, ConsumerError::Permanent(_)));
    }
}
