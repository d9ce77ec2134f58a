use thiserror::Error;

use crate::bus::{BusMessage, Delivery};
use crate::envelope::IntegrationEvent;
use crate::event::IntegrationPayload;

/// What a consumer did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The ledger mutation was applied.
    Applied,
    /// A previous delivery of the same fact was already applied; nothing changed.
    AlreadyApplied,
    /// The routing key is not one this consumer acts on.
    Ignored,
}

/// Consumer-side failure, classified for the worker's retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsumerError {
    /// Store or broker unavailable, lost optimistic race: retry with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed payload or business rejection: retrying cannot help, dead-letter it.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl ConsumerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConsumerError::Transient(_))
    }
}

/// Translates inbound integration events into ledger mutations.
///
/// ## Idempotency
///
/// Delivery is at-least-once, so `handle` will see the same fact more than once.
/// Implementations must detect an already-applied event (for ledgers: a movement
/// whose reference id matches the event's originating id) and report
/// `HandleOutcome::AlreadyApplied` instead of mutating again.
pub trait EventHandler: Send + Sync {
    /// Stable consumer name, also used as the queue name.
    fn name(&self) -> &'static str;

    /// Topic patterns the consumer's queue is bound to.
    fn routing_keys(&self) -> Vec<&'static str>;

    fn handle(&self, delivery: &Delivery) -> Result<HandleOutcome, ConsumerError>;
}

/// Decode a message body into a typed envelope. A body that does not parse is
/// poison: it fails the same way on every delivery.
pub fn decode<E: IntegrationPayload>(message: &BusMessage) -> Result<IntegrationEvent<E>, ConsumerError> {
    serde_json::from_slice(&message.body).map_err(|e| {
        ConsumerError::Permanent(format!(
            "malformed {} payload (message {}): {e}",
            message.routing_key, message.message_id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::CONTENT_TYPE_JSON;
    use crate::integration::StockReceived;

    #[test]
    fn malformed_body_is_permanent() {
        let message = BusMessage {
            message_id: uuid::Uuid::now_v7(),
            routing_key: "stock.received".to_string(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            persistent: true,
            body: br#"{"eventId": 42}"#.to_vec(),
        };
        let err = decode::<StockReceived>(&message).unwrap_err();
        assert!(!err.is_transient());
    }
}
