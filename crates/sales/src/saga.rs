//! Sale saga initiator.
//!
//! Orchestrates the flow:
//! 1. Validate and persist the sale together with its outbox entries
//! 2. Publish `sale.completed` (always; inventory decrements stock from it)
//! 3. For credit sales, publish `sale.credit.requested` (credit charges the account)
//!
//! Once step 1 succeeds nothing is rolled back. Publication failures leave the
//! entries pending in the outbox for the relay and are reported to the caller.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use ledgerflow_core::{AggregateRoot, Currency, DomainError, SaleId};
use ledgerflow_events::{BusMessage, EventBus, PublishError, routing};

use crate::outbox::OutboxEntry;
use crate::repository::{OutboxStore, RepositoryError, SaleRepository};
use crate::sale::{CreateSaleCommand, Sale};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaleSagaState {
    #[default]
    Created,
    CompletedPublished,
    CreditRequestedPublished,
    Done,
}

impl SaleSagaState {
    fn advance(self, step: SagaStep) -> SaleSagaState {
        match (self, step) {
            (SaleSagaState::Created, SagaStep::CompletedPublished) => SaleSagaState::CompletedPublished,
            (SaleSagaState::CompletedPublished, SagaStep::CreditRequestPublished) => {
                SaleSagaState::CreditRequestedPublished
            }
            (SaleSagaState::CompletedPublished, SagaStep::NoCreditNeeded) => SaleSagaState::Done,
            (state, _) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SaleSagaState::CreditRequestedPublished | SaleSagaState::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SagaStep {
    CompletedPublished,
    CreditRequestPublished,
    NoCreditNeeded,
}

/// Result of a successful saga run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleCreated {
    pub sale: Sale,
    pub state: SaleSagaState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SagaError {
    /// The command was rejected; nothing was persisted.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The sale is persisted and `sale.completed` published, but the credit
    /// request could not be built. No credit event was emitted.
    #[error("sale persisted, credit request rejected: {error}")]
    CreditRequestRejected { sale: Box<Sale>, error: DomainError },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The sale is persisted; the event stays pending in the outbox.
    #[error("sale {sale_id} persisted, publish of {routing_key} failed: {source}")]
    Publish {
        sale_id: SaleId,
        routing_key: String,
        #[source]
        source: PublishError,
    },
}

impl SagaError {
    /// The domain rejection behind this error, if any.
    pub fn domain_error(&self) -> Option<&DomainError> {
        match self {
            SagaError::Domain(e) => Some(e),
            SagaError::CreditRequestRejected { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The sale id when the sale was persisted before the failure.
    pub fn persisted_sale_id(&self) -> Option<SaleId> {
        match self {
            SagaError::CreditRequestRejected { sale, .. } => Some(*sale.id()),
            SagaError::Publish { sale_id, .. } => Some(*sale_id),
            _ => None,
        }
    }
}

pub struct SaleSagaInitiator<R, B> {
    repository: R,
    bus: B,
    currency: Currency,
}

impl<R, B> SaleSagaInitiator<R, B>
where
    R: SaleRepository + OutboxStore,
    B: EventBus,
{
    pub fn new(repository: R, bus: B, currency: Currency) -> Self {
        Self {
            repository,
            bus,
            currency,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    #[instrument(skip(self, command), fields(items = command.items.len()), err)]
    pub fn create_sale(&self, command: CreateSaleCommand) -> Result<SaleCreated, SagaError> {
        let now = Utc::now();
        let sale = Sale::create(command, &self.currency, now)?;
        let sale_id = *sale.id();

        let completed = BusMessage::from_event(&sale.completed_event(), routing::SALE_COMPLETED)
            .map_err(|source| publish_failure(sale_id, routing::SALE_COMPLETED, source))?;

        let credit = if sale.is_credit() {
            Some(sale.credit_request().and_then(|event| {
                BusMessage::from_event(&event, routing::SALE_CREDIT_REQUESTED)
                    .map_err(|e| DomainError::invariant(e.to_string()))
            }))
        } else {
            None
        };

        let mut outbox = vec![OutboxEntry::pending(completed.clone(), now)];
        if let Some(Ok(message)) = &credit {
            outbox.push(OutboxEntry::pending(message.clone(), now));
        }
        self.repository.add(&sale, outbox)?;
        info!(sale_id = %sale_id, credit = sale.is_credit(), "sale persisted");

        let mut state = SaleSagaState::Created;
        self.dispatch(sale_id, completed)?;
        state = state.advance(SagaStep::CompletedPublished);

        match credit {
            None => state = state.advance(SagaStep::NoCreditNeeded),
            Some(Err(error)) => {
                warn!(sale_id = %sale_id, error = %error, "credit sale persisted without credit request");
                return Err(SagaError::CreditRequestRejected {
                    sale: Box::new(sale),
                    error,
                });
            }
            Some(Ok(message)) => {
                self.dispatch(sale_id, message)?;
                state = state.advance(SagaStep::CreditRequestPublished);
            }
        }

        Ok(SaleCreated { sale, state })
    }

    fn dispatch(&self, sale_id: SaleId, message: BusMessage) -> Result<(), SagaError> {
        let id = message.message_id;
        let routing_key = message.routing_key.clone();
        match self.bus.publish(message) {
            Ok(()) => {
                if let Err(e) = self.repository.mark_dispatched(id) {
                    // The relay will publish it again; consumers are idempotent.
                    warn!(event_id = %id, error = %e, "published but outbox not updated");
                }
                Ok(())
            }
            Err(source) => {
                if let Err(e) = self.repository.record_failure(id, &source.to_string()) {
                    warn!(event_id = %id, error = %e, "failed to record outbox failure");
                }
                Err(publish_failure(sale_id, &routing_key, source))
            }
        }
    }
}

fn publish_failure(sale_id: SaleId, routing_key: &str, source: PublishError) -> SagaError {
    SagaError::Publish {
        sale_id,
        routing_key: routing_key.to_string(),
        source,
    }
}
