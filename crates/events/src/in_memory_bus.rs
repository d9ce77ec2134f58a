//! In-memory topic bus for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, mpsc};

use tracing::debug;

use crate::bus::{BusError, BusMessage, Delivery, EventBus, PublishError, QueueBinding, Subscription};
use crate::routing::topic_matches;

#[derive(Debug, Default)]
struct QueueState {
    patterns: Vec<String>,
    consumer: Option<mpsc::Sender<Delivery>>,
    backlog: VecDeque<(BusMessage, bool)>,
    unacked: HashMap<u64, BusMessage>,
}

#[derive(Debug, Default)]
struct Exchange {
    queues: HashMap<String, QueueState>,
    published: Vec<BusMessage>,
}

/// In-memory topic exchange.
///
/// - No IO / no async
/// - Per-queue fan-out by topic pattern, backlog while no consumer is attached
/// - Unacked deliveries are tracked; `nack(requeue)` redelivers with `redelivered = true`
/// - `set_available(false)` simulates a broker outage for publish-failure paths
#[derive(Debug)]
pub struct InMemoryEventBus {
    exchange: Mutex<Exchange>,
    next_tag: AtomicU64,
    available: AtomicBool,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every message confirmed so far, in publish order.
    pub fn published(&self) -> Vec<BusMessage> {
        self.lock().map(|ex| ex.published.clone()).unwrap_or_default()
    }

    /// Confirmed messages published under `routing_key`.
    pub fn published_with_key(&self, routing_key: &str) -> Vec<BusMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.routing_key == routing_key)
            .collect()
    }

    /// Number of deliveries handed out on `queue` and not yet settled.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|ex| ex.queues.get(queue).map(|q| q.unacked.len()))
            .unwrap_or(0)
    }

    /// Re-deliver a previously published message as a broker would after a
    /// consumer crash: same payload, `redelivered = true`.
    pub fn redeliver(&self, message: &BusMessage) -> Result<(), BusError> {
        let mut ex = self.lock()?;
        for (name, queue) in ex.queues.iter_mut() {
            if queue.patterns.iter().any(|p| topic_matches(p, &message.routing_key)) {
                self.dispatch(queue, name, message.clone(), true);
            }
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Exchange>, BusError> {
        self.exchange
            .lock()
            .map_err(|_| BusError::Internal("lock poisoned".to_string()))
    }

    fn declare(ex: &mut Exchange, binding: &QueueBinding) {
        let queue = ex.queues.entry(binding.queue.clone()).or_default();
        for pattern in &binding.patterns {
            if !queue.patterns.contains(pattern) {
                queue.patterns.push(pattern.clone());
            }
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self {
            exchange: Mutex::new(Exchange::default()),
            next_tag: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, message: BusMessage) -> Result<(), PublishError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("in-memory broker is down".to_string()));
        }

        let mut ex = self
            .exchange
            .lock()
            .map_err(|_| PublishError::NotConfirmed("lock poisoned".to_string()))?;

        let names: Vec<String> = ex
            .queues
            .iter()
            .filter(|(_, q)| q.patterns.iter().any(|p| topic_matches(p, &message.routing_key)))
            .map(|(name, _)| name.clone())
            .collect();

        for name in &names {
            if let Some(queue) = ex.queues.get_mut(name) {
                self.dispatch(queue, name, message.clone(), false);
            }
        }

        debug!(
            routing_key = %message.routing_key,
            message_id = %message.message_id,
            queues = names.len(),
            "message confirmed"
        );
        ex.published.push(message);
        Ok(())
    }

    fn declare_queue(&self, binding: &QueueBinding) -> Result<(), BusError> {
        let mut ex = self.lock()?;
        Self::declare(&mut ex, binding);
        Ok(())
    }

    fn subscribe(&self, binding: &QueueBinding) -> Result<Subscription<Delivery>, BusError> {
        let (tx, rx) = mpsc::channel();
        let mut ex = self.lock()?;
        Self::declare(&mut ex, binding);

        if let Some(queue) = ex.queues.get_mut(&binding.queue) {
            queue.consumer = Some(tx);
            // A new consumer takes over whatever the previous one left unsettled.
            let orphaned: Vec<_> = queue.unacked.drain().map(|(_, m)| (m, true)).collect();
            let backlog: Vec<_> = orphaned.into_iter().chain(queue.backlog.drain(..)).collect();
            for (message, redelivered) in backlog {
                self.dispatch(queue, &binding.queue, message, redelivered);
            }
        }

        Ok(Subscription::new(rx))
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        let mut ex = self.lock()?;
        let queue = ex
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| BusError::UnknownQueue(delivery.queue.clone()))?;
        queue
            .unacked
            .remove(&delivery.delivery_tag)
            .map(|_| ())
            .ok_or(BusError::UnknownDelivery(delivery.delivery_tag))
    }

    fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BusError> {
        let mut ex = self.lock()?;
        let queue = ex
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| BusError::UnknownQueue(delivery.queue.clone()))?;
        let message = queue
            .unacked
            .remove(&delivery.delivery_tag)
            .ok_or(BusError::UnknownDelivery(delivery.delivery_tag))?;
        if requeue {
            self.dispatch(queue, &delivery.queue, message, true);
        }
        Ok(())
    }
}

impl InMemoryEventBus {
    fn dispatch(
        &self,
        queue: &mut QueueState,
        name: &str,
        message: BusMessage,
        redelivered: bool,
    ) {
        let Some(consumer) = queue.consumer.as_ref() else {
            queue.backlog.push_back((message, redelivered));
            return;
        };

        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let delivery = Delivery {
            delivery_tag: tag,
            queue: name.to_string(),
            redelivered,
            message: message.clone(),
        };

        if consumer.send(delivery).is_ok() {
            queue.unacked.insert(tag, message);
        } else {
            queue.consumer = None;
            queue.backlog.push_back((message, redelivered));
        }
    }
}
