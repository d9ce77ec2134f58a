use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::IntegrationPayload;

/// Envelope for an integration event: a fresh id per publish, the time the fact
/// occurred, and the typed payload.
///
/// On the wire the payload fields are flattened next to the metadata:
///
/// ```text
/// {"eventId": "...", "occurredAt": "2024-01-10T12:00:00Z", "saleId": "...", "items": [...]}
/// ```
///
/// Envelopes are immutable once built; consumers only ever read them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationEvent<E> {
    event_id: Uuid,
    occurred_at: DateTime<Utc>,

    #[serde(flatten)]
    payload: E,
}

impl<E> IntegrationEvent<E> {
    pub fn new(event_id: Uuid, occurred_at: DateTime<Utc>, payload: E) -> Self {
        Self {
            event_id,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: IntegrationPayload> IntegrationEvent<E> {
    /// Wrap a payload with a new UUIDv7 event id, occurring now.
    pub fn now(payload: E) -> Self {
        Self::new(Uuid::now_v7(), Utc::now(), payload)
    }

    pub fn routing_key(&self) -> &'static str {
        E::ROUTING_KEY
    }
}
