//! Consumer worker: drives an [`EventHandler`] from its bus queue.
//!
//! - Subscribes the handler's queue with the handler's bindings
//! - Retries transient failures in place with backoff, up to the policy's attempts
//! - Dead-letters permanent failures and exhausted retries, then acks
//! - Acks after success, so a crash mid-handler means redelivery, never loss
//! - Stops between deliveries (or during a backoff wait) on shutdown

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use ledgerflow_events::{
    ConsumerError, Delivery, EventBus, EventHandler, HandleOutcome, QueueBinding, Subscription,
};

use crate::dead_letter::{DeadLetter, DeadLetterReason, DeadLetterStore};
use crate::retry::RetryPolicy;
use crate::workers::{WorkerError, WorkerHandle, shutdown_requested, spawn_worker, update, wait_or_shutdown};

const TICK: Duration = Duration::from_millis(250);

/// Runtime counters for one consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub applied: u64,
    pub already_applied: u64,
    pub ignored: u64,
    pub retries: u64,
    pub dead_lettered: u64,
    /// Deliveries returned to the queue (shutdown mid-retry, dead-letter store down).
    pub requeued: u64,
    pub settle_failures: u64,
}

#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    /// Subscribe `handler`'s queue on `bus` and process it on a dedicated thread.
    pub fn spawn<H, B, D>(
        handler: H,
        bus: B,
        dead_letters: D,
        policy: RetryPolicy,
    ) -> Result<WorkerHandle<ConsumerStats>, WorkerError>
    where
        H: EventHandler + 'static,
        B: EventBus + 'static,
        D: DeadLetterStore + 'static,
    {
        let binding = handler
            .routing_keys()
            .into_iter()
            .fold(QueueBinding::new(handler.name()), QueueBinding::bind);
        let subscription = bus.subscribe(&binding)?;
        info!(queue = %binding.queue, patterns = ?binding.patterns, "consumer subscribed");

        let stats = Arc::new(Mutex::new(ConsumerStats::default()));
        let worker = ConsumerLoop {
            handler,
            bus,
            dead_letters,
            policy,
            stats: Arc::clone(&stats),
        };
        let name = format!("consumer-{}", binding.queue);
        spawn_worker(&name, stats, move |shutdown_rx| worker.run(subscription, shutdown_rx))
    }
}

enum Flow {
    Continue,
    Stop,
}

struct ConsumerLoop<H, B, D> {
    handler: H,
    bus: B,
    dead_letters: D,
    policy: RetryPolicy,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl<H, B, D> ConsumerLoop<H, B, D>
where
    H: EventHandler,
    B: EventBus,
    D: DeadLetterStore,
{
    fn run(self, subscription: Subscription<Delivery>, shutdown_rx: Receiver<()>) {
        let name = self.handler.name();
        loop {
            if shutdown_requested(&shutdown_rx) {
                break;
            }

            match subscription.recv_timeout(TICK) {
                Ok(delivery) => {
                    if let Flow::Stop = self.process(&delivery, &shutdown_rx) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(consumer = name, "subscription closed");
                    break;
                }
            }
        }
        info!(consumer = name, "consumer stopped");
    }

    fn process(&self, delivery: &Delivery, shutdown_rx: &Receiver<()>) -> Flow {
        let name = self.handler.name();
        let message = &delivery.message;
        update(&self.stats, |s| s.received += 1);

        let mut attempt = 1;
        loop {
            match self.handler.handle(delivery) {
                Ok(outcome) => {
                    match outcome {
                        HandleOutcome::Applied => {
                            update(&self.stats, |s| s.applied += 1);
                            debug!(
                                consumer = name,
                                routing_key = %message.routing_key,
                                event_id = %message.message_id,
                                "event applied"
                            );
                        }
                        HandleOutcome::AlreadyApplied => {
                            update(&self.stats, |s| s.already_applied += 1);
                            info!(
                                consumer = name,
                                routing_key = %message.routing_key,
                                event_id = %message.message_id,
                                redelivered = delivery.redelivered,
                                "duplicate delivery skipped"
                            );
                        }
                        HandleOutcome::Ignored => update(&self.stats, |s| s.ignored += 1),
                    }
                    self.ack(delivery);
                    return Flow::Continue;
                }
                Err(ConsumerError::Transient(reason)) if self.policy.should_retry(attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        consumer = name,
                        routing_key = %message.routing_key,
                        event_id = %message.message_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "transient failure, retrying"
                    );
                    update(&self.stats, |s| s.retries += 1);
                    if wait_or_shutdown(shutdown_rx, delay) {
                        self.requeue(delivery);
                        return Flow::Stop;
                    }
                    attempt += 1;
                }
                Err(ConsumerError::Transient(reason)) => {
                    self.dead_letter(delivery, DeadLetterReason::RetriesExhausted, reason, attempt);
                    return Flow::Continue;
                }
                Err(ConsumerError::Permanent(reason)) => {
                    self.dead_letter(delivery, DeadLetterReason::Rejected, reason, attempt);
                    return Flow::Continue;
                }
            }
        }
    }

    fn dead_letter(&self, delivery: &Delivery, reason: DeadLetterReason, error: String, attempts: u32) {
        let message = &delivery.message;
        error!(
            consumer = self.handler.name(),
            routing_key = %message.routing_key,
            event_id = %message.message_id,
            attempt = attempts,
            reason = ?reason,
            error = %error,
            "dead-lettering message"
        );

        let letter = DeadLetter {
            consumer: self.handler.name().to_string(),
            message: message.clone(),
            reason,
            error,
            attempts,
            dead_lettered_at: Utc::now(),
        };
        match self.dead_letters.push(letter) {
            Ok(()) => {
                update(&self.stats, |s| s.dead_lettered += 1);
                self.ack(delivery);
            }
            Err(e) => {
                // Keep the only copy on the broker.
                error!(event_id = %message.message_id, error = %e, "dead-letter store failed, requeueing");
                self.requeue(delivery);
            }
        }
    }

    fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.bus.ack(delivery) {
            update(&self.stats, |s| s.settle_failures += 1);
            warn!(
                consumer = self.handler.name(),
                event_id = %delivery.message.message_id,
                error = %e,
                "ack failed; the broker will redeliver"
            );
        }
    }

    fn requeue(&self, delivery: &Delivery) {
        match self.bus.nack(delivery, true) {
            Ok(()) => update(&self.stats, |s| s.requeued += 1),
            Err(e) => {
                update(&self.stats, |s| s.settle_failures += 1);
                warn!(
                    consumer = self.handler.name(),
                    event_id = %delivery.message.message_id,
                    error = %e,
                    "requeue failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use ledgerflow_core::ProductId;
    use ledgerflow_events::{BusMessage, InMemoryEventBus, IntegrationEvent, ProductCreated, routing};

    use crate::dead_letter::InMemoryDeadLetterStore;

    /// Fails transiently `transient_failures` times per call sequence, then
    /// applies; `sale.completed` is always rejected.
    struct ScriptedHandler {
        calls: Arc<AtomicU32>,
        transient_failures: u32,
    }

    impl EventHandler for ScriptedHandler {
        fn name(&self) -> &'static str {
            "test.scripted"
        }

        fn routing_keys(&self) -> Vec<&'static str> {
            vec!["product.*", routing::SALE_COMPLETED]
        }

        fn handle(&self, delivery: &Delivery) -> Result<HandleOutcome, ConsumerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if delivery.message.routing_key == routing::SALE_COMPLETED {
                return Err(ConsumerError::Permanent("insufficient stock".to_string()));
            }
            if call <= self.transient_failures {
                return Err(ConsumerError::Transient("store unavailable".to_string()));
            }
            if delivery.redelivered {
                return Ok(HandleOutcome::AlreadyApplied);
            }
            Ok(HandleOutcome::Applied)
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(5))
    }

    fn product_created() -> BusMessage {
        let event = IntegrationEvent::now(ProductCreated {
            product_id: ProductId::new(),
            name: "Café 500g".to_string(),
        });
        BusMessage::from_event(&event, routing::PRODUCT_CREATED).unwrap()
    }

    fn sale_completed_raw() -> BusMessage {
        BusMessage {
            routing_key: routing::SALE_COMPLETED.to_string(),
            ..product_created()
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn spawn(
        transient_failures: u32,
        max_attempts: u32,
    ) -> (
        WorkerHandle<ConsumerStats>,
        Arc<InMemoryEventBus>,
        Arc<InMemoryDeadLetterStore>,
        Arc<AtomicU32>,
    ) {
        let bus = Arc::new(InMemoryEventBus::new());
        let dlq = Arc::new(InMemoryDeadLetterStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let handler = ScriptedHandler {
            calls: Arc::clone(&calls),
            transient_failures,
        };
        let handle = ConsumerWorker::spawn(handler, Arc::clone(&bus), Arc::clone(&dlq), fast_policy(max_attempts))
            .unwrap();
        (handle, bus, dlq, calls)
    }

    #[test]
    fn applied_deliveries_are_acked() {
        let (handle, bus, dlq, _) = spawn(0, 3);
        bus.publish(product_created()).unwrap();

        wait_until(|| handle.stats().applied == 1);
        wait_until(|| bus.unacked_count("test.scripted") == 0);
        assert!(dlq.is_empty());

        let stats = handle.shutdown();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.retries, 0);
    }

    #[test]
    fn redelivered_duplicates_are_counted_and_acked() {
        let (handle, bus, _dlq, _) = spawn(0, 3);
        let message = product_created();
        bus.publish(message.clone()).unwrap();
        wait_until(|| handle.stats().applied == 1);

        bus.redeliver(&message).unwrap();
        wait_until(|| handle.stats().already_applied == 1);
        wait_until(|| bus.unacked_count("test.scripted") == 0);
        handle.shutdown();
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let (handle, bus, dlq, calls) = spawn(2, 5);
        bus.publish(product_created()).unwrap();

        wait_until(|| handle.stats().applied == 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(dlq.is_empty());
        assert_eq!(handle.shutdown().retries, 2);
    }

    #[test]
    fn exhausted_retries_are_dead_lettered_then_acked() {
        let (handle, bus, dlq, calls) = spawn(u32::MAX, 3);
        let message = product_created();
        bus.publish(message.clone()).unwrap();

        wait_until(|| dlq.len() == 1);
        wait_until(|| bus.unacked_count("test.scripted") == 0);
        let letter = &dlq.list().unwrap()[0];
        assert_eq!(letter.reason, DeadLetterReason::RetriesExhausted);
        assert_eq!(letter.attempts, 3);
        assert_eq!(letter.event_id(), message.message_id);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(handle.shutdown().dead_lettered, 1);
    }

    #[test]
    fn permanent_failures_skip_retries() {
        let (handle, bus, dlq, calls) = spawn(0, 5);
        bus.publish(sale_completed_raw()).unwrap();

        wait_until(|| dlq.len() == 1);
        let letter = &dlq.list().unwrap()[0];
        assert_eq!(letter.reason, DeadLetterReason::Rejected);
        assert_eq!(letter.attempts, 1);
        assert_eq!(letter.consumer, "test.scripted");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        wait_until(|| bus.unacked_count("test.scripted") == 0);
        handle.shutdown();
    }

    #[test]
    fn shutdown_stops_an_idle_worker() {
        let (handle, _bus, _dlq, _) = spawn(0, 1);
        assert!(!handle.is_finished());
        assert_eq!(handle.name(), "consumer-test.scripted");
        let stats = handle.shutdown();
        assert_eq!(stats, ConsumerStats::default());
    }
}
