//! Transactional outbox: integration events written alongside the sale.
//!
//! An entry is committed in the same unit as the sale it describes, so the
//! event can never be lost once the sale exists. The saga publishes entries
//! right away; whatever it could not publish stays `Pending` for the relay.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use ledgerflow_events::BusMessage;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Dispatched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    message: BusMessage,
    status: OutboxStatus,
    attempts: u32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn pending(message: BusMessage, now: DateTime<Utc>) -> Self {
        Self {
            message,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
        }
    }

    /// The envelope's event id; also the entry's key.
    pub fn id(&self) -> Uuid {
        self.message.message_id
    }

    pub fn message(&self) -> &BusMessage {
        &self.message
    }

    pub fn routing_key(&self) -> &str {
        &self.message.routing_key
    }

    pub fn status(&self) -> OutboxStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn mark_dispatched(&mut self) {
        self.status = OutboxStatus::Dispatched;
        self.attempts += 1;
        self.last_error = None;
    }

    pub(crate) fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
    }
}
