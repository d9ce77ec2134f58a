//! Stock ledger consumer: applies sales, purchases and new products to the
//! stock rows, skipping deliveries whose movement is already recorded.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use ledgerflow_core::{DomainError, ProductId};
use ledgerflow_events::{
    ConsumerError, Delivery, EventBus, EventHandler, HandleOutcome, IntegrationEvent, ProductCreated,
    SaleCompleted, StockDecreased, StockReceived, decode, publish_event, routing,
};

use crate::ledger::{MovementRef, StockLedger, StockLedgerError};
use crate::store::{StockStore, StoreError};

pub const QUEUE_NAME: &str = "inventory.stock";

/// Drives the stock ledger from `sale.completed`, `stock.received` and
/// `product.created`.
pub struct StockEventConsumer<S, B> {
    ledger: Arc<StockLedger<S>>,
    bus: B,
}

impl<S, B> StockEventConsumer<S, B>
where
    S: StockStore,
    B: EventBus,
{
    pub fn new(ledger: Arc<StockLedger<S>>, bus: B) -> Self {
        Self { ledger, bus }
    }

    fn on_sale_completed(&self, event: IntegrationEvent<SaleCompleted>) -> Result<HandleOutcome, ConsumerError> {
        let sale = event.payload();
        if sale.items.is_empty() {
            return Err(ConsumerError::Permanent(format!("sale {} has no items", sale.sale_id)));
        }

        // Several lines may name the same product; one movement per product per sale.
        let mut lines: BTreeMap<ProductId, i64> = BTreeMap::new();
        for item in &sale.items {
            if item.quantity <= 0 {
                return Err(ConsumerError::Permanent(format!(
                    "sale {} has non-positive quantity {} for product {}",
                    sale.sale_id, item.quantity, item.product_id
                )));
            }
            let total = lines.entry(item.product_id).or_default();
            *total = total.checked_add(item.quantity).ok_or_else(|| {
                ConsumerError::Permanent(format!(
                    "sale {} quantities for product {} overflow",
                    sale.sale_id, item.product_id
                ))
            })?;
        }

        let reference = MovementRef::sale(sale.sale_id);

        // Reject the whole sale up front rather than decrementing some lines only.
        let mut pending = Vec::with_capacity(lines.len());
        for (&product_id, &quantity) in &lines {
            if self.ledger.has_movement(product_id, reference).map_err(classify)? {
                continue;
            }
            let stock = self.ledger.get_quantity(product_id).map_err(awaiting_stock_row)?;
            if stock.quantity() < quantity {
                return Err(classify(
                    DomainError::InsufficientStock {
                        product: product_id.to_string(),
                        available: stock.quantity(),
                        requested: quantity,
                    }
                    .into(),
                ));
            }
            pending.push((product_id, quantity));
        }

        if pending.is_empty() {
            info!(sale_id = %sale.sale_id, event_id = %event.event_id(), "sale already applied to stock, skipping");
            return Ok(HandleOutcome::AlreadyApplied);
        }

        let mut applied = 0;
        for (product_id, quantity) in pending {
            match self.ledger.decrease(product_id, quantity, reference) {
                Ok(_) => {
                    applied += 1;
                    self.announce_decrease(product_id, quantity);
                }
                Err(e) if e.is_duplicate() => {
                    debug!(sale_id = %sale.sale_id, product_id = %product_id, "line already applied");
                }
                Err(e) => return Err(classify(e)),
            }
        }

        Ok(if applied > 0 {
            HandleOutcome::Applied
        } else {
            HandleOutcome::AlreadyApplied
        })
    }

    fn on_stock_received(&self, event: IntegrationEvent<StockReceived>) -> Result<HandleOutcome, ConsumerError> {
        let received = event.payload();
        if received.quantity <= 0 {
            return Err(ConsumerError::Permanent(format!(
                "purchase {} received non-positive quantity {}",
                received.purchase_id, received.quantity
            )));
        }

        let reference = MovementRef::purchase(received.purchase_id);
        if self.ledger.has_movement(received.product_id, reference).map_err(classify)? {
            info!(purchase_id = %received.purchase_id, event_id = %event.event_id(), "purchase already applied to stock, skipping");
            return Ok(HandleOutcome::AlreadyApplied);
        }

        self.ledger.create_for_product(received.product_id).map_err(classify)?;
        match self.ledger.increase(received.product_id, received.quantity, reference) {
            Ok(_) => Ok(HandleOutcome::Applied),
            Err(e) if e.is_duplicate() => Ok(HandleOutcome::AlreadyApplied),
            Err(e) => Err(classify(e)),
        }
    }

    fn on_product_created(&self, event: IntegrationEvent<ProductCreated>) -> Result<HandleOutcome, ConsumerError> {
        let product_id = event.payload().product_id;
        let existed = self.ledger.store().get(product_id).map_err(|e| classify(e.into()))?.is_some();
        self.ledger.create_for_product(product_id).map_err(classify)?;
        Ok(if existed {
            HandleOutcome::AlreadyApplied
        } else {
            HandleOutcome::Applied
        })
    }

    /// `stock.decreased` is a notification; failing to send it does not undo the decrement.
    fn announce_decrease(&self, product_id: ProductId, quantity: i64) {
        let event = IntegrationEvent::now(StockDecreased { product_id, quantity });
        if let Err(e) = publish_event(&self.bus, &event, routing::STOCK_DECREASED) {
            warn!(product_id = %product_id, error = %e, "failed to publish stock.decreased");
        }
    }
}

impl<S, B> EventHandler for StockEventConsumer<S, B>
where
    S: StockStore,
    B: EventBus,
{
    fn name(&self) -> &'static str {
        QUEUE_NAME
    }

    fn routing_keys(&self) -> Vec<&'static str> {
        vec![routing::SALE_COMPLETED, routing::STOCK_RECEIVED, routing::PRODUCT_CREATED]
    }

    fn handle(&self, delivery: &Delivery) -> Result<HandleOutcome, ConsumerError> {
        let message = &delivery.message;
        match message.routing_key.as_str() {
            routing::SALE_COMPLETED => self.on_sale_completed(decode(message)?),
            routing::STOCK_RECEIVED => self.on_stock_received(decode(message)?),
            routing::PRODUCT_CREATED => self.on_product_created(decode(message)?),
            _ => Ok(HandleOutcome::Ignored),
        }
    }
}

/// A sale may be delivered before the `product.created` or `stock.received`
/// that opens the product's stock row, so a missing row is retried.
fn awaiting_stock_row(err: StockLedgerError) -> ConsumerError {
    match err {
        StockLedgerError::Domain(e @ DomainError::NotFound(_)) => ConsumerError::Transient(e.to_string()),
        other => classify(other),
    }
}

fn classify(err: StockLedgerError) -> ConsumerError {
    match err {
        StockLedgerError::Domain(e) if e.is_business_rejection() => ConsumerError::Permanent(e.to_string()),
        StockLedgerError::Domain(e) => ConsumerError::Transient(e.to_string()),
        StockLedgerError::Store(e @ StoreError::DuplicateReference(_)) => ConsumerError::Permanent(e.to_string()),
        StockLedgerError::Store(e) => ConsumerError::Transient(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerflow_core::{PurchaseId, SaleId};
    use ledgerflow_events::{BusMessage, InMemoryEventBus, SaleCompletedItem};

    use crate::stock::MovementType;
    use crate::store::InMemoryStockStore;

    type Consumer = StockEventConsumer<InMemoryStockStore, Arc<InMemoryEventBus>>;

    fn setup() -> (Consumer, Arc<StockLedger<InMemoryStockStore>>, Arc<InMemoryEventBus>) {
        let ledger = Arc::new(StockLedger::new(InMemoryStockStore::new()));
        let bus = Arc::new(InMemoryEventBus::new());
        (StockEventConsumer::new(Arc::clone(&ledger), Arc::clone(&bus)), ledger, bus)
    }

    fn delivery<E: ledgerflow_events::IntegrationPayload>(event: &IntegrationEvent<E>) -> Delivery {
        Delivery {
            delivery_tag: 1,
            queue: QUEUE_NAME.to_string(),
            redelivered: false,
            message: BusMessage::from_event(event, E::ROUTING_KEY).unwrap(),
        }
    }

    fn stocked(ledger: &StockLedger<InMemoryStockStore>, quantity: i64) -> ProductId {
        let product_id = ProductId::new();
        ledger.create_for_product(product_id).unwrap();
        ledger.set_quantity(product_id, quantity, None).unwrap();
        product_id
    }

    fn sale_of(items: &[(ProductId, i64)]) -> IntegrationEvent<SaleCompleted> {
        IntegrationEvent::now(SaleCompleted {
            sale_id: SaleId::new(),
            items: items
                .iter()
                .map(|&(product_id, quantity)| SaleCompletedItem { product_id, quantity })
                .collect(),
        })
    }

    fn sale_movements(ledger: &StockLedger<InMemoryStockStore>, product_id: ProductId) -> usize {
        ledger
            .movements_for_product(product_id)
            .unwrap()
            .iter()
            .filter(|m| m.movement_type() == MovementType::Sale)
            .count()
    }

    #[test]
    fn duplicate_sale_completed_applies_once() {
        let (consumer, ledger, bus) = setup();
        let p1 = stocked(&ledger, 100);
        let p2 = stocked(&ledger, 10);
        let event = sale_of(&[(p1, 30), (p2, 4)]);

        assert_eq!(consumer.handle(&delivery(&event)).unwrap(), HandleOutcome::Applied);
        let mut redelivery = delivery(&event);
        redelivery.redelivered = true;
        assert_eq!(consumer.handle(&redelivery).unwrap(), HandleOutcome::AlreadyApplied);

        assert_eq!(ledger.get_quantity(p1).unwrap().quantity(), 70);
        assert_eq!(ledger.get_quantity(p2).unwrap().quantity(), 6);
        assert_eq!(sale_movements(&ledger, p1), 1);
        assert_eq!(sale_movements(&ledger, p2), 1);
        assert_eq!(bus.published_with_key(routing::STOCK_DECREASED).len(), 2);
    }

    #[test]
    fn repeated_product_lines_are_one_movement() {
        let (consumer, ledger, _bus) = setup();
        let p1 = stocked(&ledger, 10);
        consumer.handle(&delivery(&sale_of(&[(p1, 2), (p1, 3)]))).unwrap();

        let movements = ledger.movements_for_product(p1).unwrap();
        let sale = movements
            .iter()
            .find(|m| m.movement_type() == MovementType::Sale)
            .unwrap();
        assert_eq!(sale.quantity(), 5);
        assert_eq!(ledger.get_quantity(p1).unwrap().quantity(), 5);
    }

    #[test]
    fn insufficient_stock_rejects_whole_sale_permanently() {
        let (consumer, ledger, bus) = setup();
        let p1 = stocked(&ledger, 100);
        let p2 = stocked(&ledger, 1);

        let err = consumer.handle(&delivery(&sale_of(&[(p1, 30), (p2, 5)]))).unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(ledger.get_quantity(p1).unwrap().quantity(), 100);
        assert!(bus.published().is_empty());
    }

    #[test]
    fn sale_before_stock_row_is_retried_until_it_exists() {
        let (consumer, ledger, _bus) = setup();
        let product_id = ProductId::new();
        let event = sale_of(&[(product_id, 2)]);

        let err = consumer.handle(&delivery(&event)).unwrap_err();
        assert!(err.is_transient());

        let received = IntegrationEvent::now(StockReceived {
            purchase_id: PurchaseId::new(),
            product_id,
            quantity: 5,
        });
        consumer.handle(&delivery(&received)).unwrap();
        assert_eq!(consumer.handle(&delivery(&event)).unwrap(), HandleOutcome::Applied);
        assert_eq!(ledger.get_quantity(product_id).unwrap().quantity(), 3);
    }

    #[test]
    fn overflowing_line_sum_is_permanent() {
        let (consumer, ledger, bus) = setup();
        let p1 = stocked(&ledger, 10);
        let err = consumer
            .handle(&delivery(&sale_of(&[(p1, i64::MAX), (p1, 1)])))
            .unwrap_err();
        assert!(matches!(err, ConsumerError::Permanent(_)));
        assert_eq!(ledger.get_quantity(p1).unwrap().quantity(), 10);
        assert!(bus.published().is_empty());
    }

    #[test]
    fn stock_received_creates_row_and_is_idempotent() {
        let (consumer, ledger, _bus) = setup();
        let product_id = ProductId::new();
        let event = IntegrationEvent::now(StockReceived {
            purchase_id: PurchaseId::new(),
            product_id,
            quantity: 12,
        });

        assert_eq!(consumer.handle(&delivery(&event)).unwrap(), HandleOutcome::Applied);
        assert_eq!(consumer.handle(&delivery(&event)).unwrap(), HandleOutcome::AlreadyApplied);
        assert_eq!(ledger.get_quantity(product_id).unwrap().quantity(), 12);

        let purchases = ledger
            .movements_for_product(product_id)
            .unwrap()
            .into_iter()
            .filter(|m| m.movement_type() == MovementType::Purchase)
            .count();
        assert_eq!(purchases, 1);
    }

    #[test]
    fn product_created_registers_zero_stock_once() {
        let (consumer, ledger, _bus) = setup();
        let event = IntegrationEvent::now(ProductCreated {
            product_id: ProductId::new(),
            name: "Cuaderno".to_string(),
        });

        assert_eq!(consumer.handle(&delivery(&event)).unwrap(), HandleOutcome::Applied);
        assert_eq!(consumer.handle(&delivery(&event)).unwrap(), HandleOutcome::AlreadyApplied);
        assert_eq!(ledger.get_quantity(event.payload().product_id).unwrap().quantity(), 0);
    }

    #[test]
    fn store_outage_is_transient() {
        let (consumer, ledger, _bus) = setup();
        let p1 = stocked(&ledger, 5);
        ledger.store().set_available(false);
        let err = consumer.handle(&delivery(&sale_of(&[(p1, 1)]))).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn malformed_payload_is_permanent_and_other_keys_are_ignored() {
        let (consumer, _ledger, _bus) = setup();
        let mut bad = delivery(&sale_of(&[(ProductId::new(), 1)]));
        bad.message.body = b"not json".to_vec();
        assert!(matches!(consumer.handle(&bad), Err(ConsumerError::Permanent(_))));

        let mut other = delivery(&sale_of(&[(ProductId::new(), 1)]));
        other.message.routing_key = routing::PRODUCT_DELETED.to_string();
        assert_eq!(consumer.handle(&other).unwrap(), HandleOutcome::Ignored);
    }
}
