//! Integration event bus contract (mechanics only).
//!
//! The bus models a **durable topic exchange**:
//!
//! - Publishers send persistent messages tagged with a hierarchical routing key.
//! - Every consumer declares its own named queue and binds it with topic patterns,
//!   so independently deployed services each receive their own copy of a stream.
//! - `publish()` returns only once the broker has confirmed the message
//!   (publisher confirms). Anything else is a `PublishError`.
//! - Delivery is **at-least-once**: a message may arrive more than once and
//!   ordering is only approximate within one routing key from one publisher.
//!   Consumers must be idempotent.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::envelope::IntegrationEvent;
use crate::event::IntegrationPayload;
use crate::routing::is_valid_routing_key;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A serialized message as it travels through the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// The envelope's `eventId`; stable across redeliveries.
    pub message_id: Uuid,
    pub routing_key: String,
    pub content_type: String,
    /// Delivery mode: persistent messages survive a broker restart.
    pub persistent: bool,
    pub body: Vec<u8>,
}

impl BusMessage {
    /// Serialize an integration event for publication under `routing_key`.
    pub fn from_event<E: IntegrationPayload>(
        event: &IntegrationEvent<E>,
        routing_key: &str,
    ) -> Result<Self, PublishError> {
        if !is_valid_routing_key(routing_key) {
            return Err(PublishError::InvalidRoutingKey(routing_key.to_string()));
        }
        let body = serde_json::to_vec(event)
            .map_err(|e| PublishError::Serialization(e.to_string()))?;
        Ok(Self {
            message_id: event.event_id(),
            routing_key: routing_key.to_string(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            persistent: true,
            body,
        })
    }
}

/// A message handed to a consumer, with the metadata needed to settle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned tag, unique per delivery attempt.
    pub delivery_tag: u64,
    pub queue: String,
    /// `true` when the broker has handed this message out before.
    pub redelivered: bool,
    pub message: BusMessage,
}

/// A named, durable queue bound to one or more topic patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub patterns: Vec<String>,
}

impl QueueBinding {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            patterns: Vec::new(),
        }
    }

    pub fn bind(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }
}

/// Publication failed: the broker did not confirm durable persistence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("invalid routing key '{0}'")]
    InvalidRoutingKey(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker did not confirm message: {0}")]
    NotConfirmed(String),
}

/// Subscription/settlement failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("unknown queue '{0}'")]
    UnknownQueue(String),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error("internal bus error: {0}")]
    Internal(String),
}

/// A subscription to a queue.
///
/// Subscriptions are designed for single-threaded consumption: one worker thread
/// owns the subscription and settles each delivery with `ack`/`nack`.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Transport-agnostic integration event bus.
///
/// The trait requires `Send + Sync`; many request threads publish concurrently
/// while consumer workers own their subscriptions.
pub trait EventBus: Send + Sync {
    /// Publish a persistent message and block until the broker confirms it.
    fn publish(&self, message: BusMessage) -> Result<(), PublishError>;

    /// Declare (idempotently) a durable queue with its bindings without consuming.
    ///
    /// Messages routed to a declared queue are retained until a consumer attaches.
    fn declare_queue(&self, binding: &QueueBinding) -> Result<(), BusError>;

    /// Declare the queue and start consuming from it.
    fn subscribe(&self, binding: &QueueBinding) -> Result<Subscription<Delivery>, BusError>;

    /// Settle a delivery as processed.
    fn ack(&self, delivery: &Delivery) -> Result<(), BusError>;

    /// Reject a delivery; with `requeue` the broker hands it out again.
    fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BusError>;
}

impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    fn publish(&self, message: BusMessage) -> Result<(), PublishError> {
        (**self).publish(message)
    }

    fn declare_queue(&self, binding: &QueueBinding) -> Result<(), BusError> {
        (**self).declare_queue(binding)
    }

    fn subscribe(&self, binding: &QueueBinding) -> Result<Subscription<Delivery>, BusError> {
        (**self).subscribe(binding)
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        (**self).ack(delivery)
    }

    fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BusError> {
        (**self).nack(delivery, requeue)
    }
}

/// Publish a typed integration event under an explicit routing key.
pub fn publish_event<B, E>(
    bus: &B,
    event: &IntegrationEvent<E>,
    routing_key: &str,
) -> Result<(), PublishError>
where
    B: EventBus + ?Sized,
    E: IntegrationPayload,
{
    let message = BusMessage::from_event(event, routing_key)?;
    bus.publish(message)
}
