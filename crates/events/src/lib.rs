//! Integration events: envelope, typed payloads, routing and the bus contract.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod integration;
pub mod routing;

pub use bus::{
    BusError, BusMessage, CONTENT_TYPE_JSON, Delivery, EventBus, PublishError, QueueBinding,
    Subscription, publish_event,
};
pub use envelope::IntegrationEvent;
pub use event::IntegrationPayload;
pub use handler::{ConsumerError, EventHandler, HandleOutcome, decode};
pub use in_memory_bus::InMemoryEventBus;
pub use integration::{
    CreditSaleRequested, CustomerCreditApproved, ProductCreated, SaleCompleted, SaleCompletedItem,
    StockDecreased, StockReceived,
};
