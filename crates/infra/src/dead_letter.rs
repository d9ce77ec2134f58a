//! Dead-letter storage for deliveries that could not be applied.
//!
//! A message lands here when its handler rejected it permanently (malformed
//! payload, business rule) or when transient failures outlasted the retry
//! policy. The broker delivery is settled afterwards, so the dead-letter
//! record is the only remaining copy.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use ledgerflow_events::BusMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The handler reported a permanent failure.
    Rejected,
    /// Transient failures on every allowed attempt.
    RetriesExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub consumer: String,
    pub message: BusMessage,
    pub reason: DeadLetterReason,
    pub error: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn event_id(&self) -> Uuid {
        self.message.message_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeadLetterError {
    #[error("dead-letter store unavailable: {0}")]
    Unavailable(String),
}

pub trait DeadLetterStore: Send + Sync {
    fn push(&self, letter: DeadLetter) -> Result<(), DeadLetterError>;

    /// Dead letters recorded so far, oldest first.
    fn list(&self) -> Result<Vec<DeadLetter>, DeadLetterError>;
}

impl<D> DeadLetterStore for Arc<D>
where
    D: DeadLetterStore + ?Sized,
{
    fn push(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        (**self).push(letter)
    }

    fn list(&self) -> Result<Vec<DeadLetter>, DeadLetterError> {
        (**self).list()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDeadLetterStore {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.letters.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterStore for InMemoryDeadLetterStore {
    fn push(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        self.letters
            .lock()
            .map_err(|_| DeadLetterError::Unavailable("lock poisoned".to_string()))?
            .push(letter);
        Ok(())
    }

    fn list(&self) -> Result<Vec<DeadLetter>, DeadLetterError> {
        self.letters
            .lock()
            .map(|l| l.clone())
            .map_err(|_| DeadLetterError::Unavailable("lock poisoned".to_string()))
    }
}
