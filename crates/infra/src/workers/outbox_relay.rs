//! Outbox relay: publishes outbox entries the saga could not publish itself.
//!
//! Entries are relayed oldest first. The first publish failure ends the pass
//! (the broker is most likely down), and the background loop backs off
//! according to its retry policy before polling again.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use ledgerflow_events::EventBus;
use ledgerflow_sales::{OutboxStore, RepositoryError};

use crate::retry::RetryPolicy;
use crate::workers::{WorkerError, WorkerHandle, spawn_worker, update, wait_or_shutdown};

const DEFAULT_BATCH_SIZE: usize = 100;

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub passes: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub store_failures: u64,
}

pub struct OutboxRelay<O, B> {
    outbox: O,
    bus: B,
    batch_size: usize,
}

impl<O, B> OutboxRelay<O, B>
where
    O: OutboxStore,
    B: EventBus,
{
    pub fn new(outbox: O, bus: B) -> Self {
        Self {
            outbox,
            bus,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Publish up to one batch of pending entries.
    #[instrument(skip(self), err)]
    pub fn relay_pending(&self) -> Result<RelayReport, RepositoryError> {
        let mut report = RelayReport::default();
        for entry in self.outbox.pending(self.batch_size)? {
            match self.bus.publish(entry.message().clone()) {
                Ok(()) => {
                    report.published += 1;
                    if let Err(e) = self.outbox.mark_dispatched(entry.id()) {
                        // Left pending; the next pass publishes it again.
                        warn!(event_id = %entry.id(), error = %e, "published but outbox not updated");
                    }
                    debug!(event_id = %entry.id(), routing_key = %entry.routing_key(), "outbox entry relayed");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        event_id = %entry.id(),
                        routing_key = %entry.routing_key(),
                        attempt = entry.attempts() + 1,
                        error = %e,
                        "outbox relay publish failed"
                    );
                    self.outbox.record_failure(entry.id(), &e.to_string())?;
                    break;
                }
            }
        }
        Ok(report)
    }
}

impl<O, B> OutboxRelay<O, B>
where
    O: OutboxStore + 'static,
    B: EventBus + 'static,
{
    /// Run relay passes every `poll_interval`; after failures, wait according
    /// to `policy` instead.
    pub fn spawn(self, poll_interval: Duration, policy: RetryPolicy) -> Result<WorkerHandle<RelayStats>, WorkerError> {
        let stats = Arc::new(Mutex::new(RelayStats::default()));
        let loop_stats = Arc::clone(&stats);

        spawn_worker("outbox-relay", stats, move |shutdown_rx| {
            let mut consecutive_failures: u32 = 0;
            loop {
                let failed = match self.relay_pending() {
                    Ok(report) => {
                        update(&loop_stats, |s| {
                            s.passes += 1;
                            s.published += report.published as u64;
                            s.publish_failures += report.failed as u64;
                        });
                        report.failed > 0
                    }
                    Err(_) => {
                        update(&loop_stats, |s| {
                            s.passes += 1;
                            s.store_failures += 1;
                        });
                        true
                    }
                };

                let wait = if failed {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    policy.delay_for_attempt(consecutive_failures).max(poll_interval)
                } else {
                    consecutive_failures = 0;
                    poll_interval
                };

                if wait_or_shutdown(&shutdown_rx, wait) {
                    break;
                }
            }
            info!("outbox relay stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use chrono::Utc;
    use ledgerflow_core::{Currency, ProductId};
    use ledgerflow_events::{BusMessage, InMemoryEventBus, routing};
    use ledgerflow_sales::{
        CreateSaleCommand, InMemorySaleRepository, OutboxEntry, Sale, SaleItemInput, SaleRepository,
    };

    fn persisted_sale(repo: &InMemorySaleRepository) -> Sale {
        let sale = Sale::create(
            CreateSaleCommand {
                customer_id: None,
                payment_method: Some("efectivo".to_string()),
                total_amount: None,
                identification_type: None,
                identification_number: None,
                items: vec![SaleItemInput {
                    product_id: ProductId::new(),
                    quantity: 1,
                    unit_price: None,
                }],
            },
            &Currency::new("COP").unwrap(),
            Utc::now(),
        )
        .unwrap();
        let message = BusMessage::from_event(&sale.completed_event(), routing::SALE_COMPLETED).unwrap();
        repo.add(&sale, vec![OutboxEntry::pending(message, Utc::now())]).unwrap();
        sale
    }

    #[test]
    fn pending_entries_are_published_and_marked() {
        let repo = Arc::new(InMemorySaleRepository::new());
        let bus = Arc::new(InMemoryEventBus::new());
        persisted_sale(&repo);
        persisted_sale(&repo);

        let relay = OutboxRelay::new(Arc::clone(&repo), Arc::clone(&bus));
        let report = relay.relay_pending().unwrap();
        assert_eq!(report, RelayReport { published: 2, failed: 0 });
        assert_eq!(bus.published_with_key(routing::SALE_COMPLETED).len(), 2);
        assert!(repo.pending(10).unwrap().is_empty());

        assert_eq!(relay.relay_pending().unwrap(), RelayReport::default());
    }

    #[test]
    fn broker_outage_stops_the_pass_and_records_the_attempt() {
        let repo = Arc::new(InMemorySaleRepository::new());
        let bus = Arc::new(InMemoryEventBus::new());
        persisted_sale(&repo);
        persisted_sale(&repo);
        bus.set_available(false);

        let relay = OutboxRelay::new(Arc::clone(&repo), Arc::clone(&bus)).with_batch_size(10);
        assert_eq!(relay.relay_pending().unwrap(), RelayReport { published: 0, failed: 1 });
        let pending = repo.pending(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].attempts(), 1);
        assert_eq!(pending[1].attempts(), 0);

        bus.set_available(true);
        assert_eq!(relay.relay_pending().unwrap().published, 2);
    }

    #[test]
    fn background_relay_drains_once_the_broker_recovers() {
        let repo = Arc::new(InMemorySaleRepository::new());
        let bus = Arc::new(InMemoryEventBus::new());
        bus.set_available(false);
        persisted_sale(&repo);

        let handle = OutboxRelay::new(Arc::clone(&repo), Arc::clone(&bus))
            .spawn(Duration::from_millis(10), RetryPolicy::fixed(5, Duration::from_millis(10)))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().publish_failures == 0 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
        bus.set_available(true);
        while !repo.pending(10).unwrap().is_empty() {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }

        let stats = handle.shutdown();
        assert_eq!(stats.published, 1);
        assert!(stats.publish_failures >= 1);
    }
}
