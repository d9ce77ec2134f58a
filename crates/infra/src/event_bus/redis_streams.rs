//! Redis Streams-backed topic bus (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - **Bindings**: hash `<exchange>:bindings`, field = queue, value = JSON list of topic patterns
//! - **Queues**: one stream per queue, `<exchange>:queue:<queue>`, with a consumer group named after the queue
//! - **Publish**: the routing key is matched against every binding and the message is
//!   `XADD`ed to each matching queue stream inside one `MULTI`/`EXEC`; the `EXEC` reply is
//!   the publisher confirm
//! - **Ack**: `XACK`; **requeue**: re-`XADD` flagged `redelivered` plus `XACK` of the original
//! - **Dead letters**: stream `<exchange>:dead-letters`
//!
//! A consumer first drains its own pending entries (delivered before a crash, never acked)
//! and then reads new entries. Connections are managed: a dropped connection is re-opened
//! with backoff and a connect timeout, and [`RedisStreamsEventBus::shutdown`] stops the
//! subscription readers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::streams::{StreamId, StreamReadReply};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use ledgerflow_events::routing::{is_valid_routing_key, topic_matches};
use ledgerflow_events::{
    BusError, BusMessage, CONTENT_TYPE_JSON, Delivery, EventBus, PublishError, QueueBinding, Subscription,
};

use crate::config::AppConfig;
use crate::dead_letter::{DeadLetter, DeadLetterError, DeadLetterReason, DeadLetterStore};
use crate::retry::RetryPolicy;

const READ_BATCH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("bus is shut down")]
    ShutDown,
}

impl From<RedisStreamsError> for PublishError {
    fn from(e: RedisStreamsError) -> Self {
        match e {
            RedisStreamsError::Connection(_) | RedisStreamsError::ShutDown => PublishError::Unavailable(e.to_string()),
            RedisStreamsError::Serialization(_) => PublishError::Serialization(e.to_string()),
            _ => PublishError::NotConfirmed(e.to_string()),
        }
    }
}

impl From<RedisStreamsError> for BusError {
    fn from(e: RedisStreamsError) -> Self {
        match e {
            RedisStreamsError::Connection(_) | RedisStreamsError::ShutDown => BusError::Unavailable(e.to_string()),
            _ => BusError::Internal(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedisStreamsConfig {
    pub url: String,
    pub exchange: String,
    pub connect_timeout: Duration,
    /// How long one `XREADGROUP` blocks; bounds shutdown latency of readers.
    pub block: Duration,
    pub reconnect: RetryPolicy,
}

impl RedisStreamsConfig {
    pub fn new(url: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange: exchange.into(),
            connect_timeout: Duration::from_secs(5),
            block: Duration::from_secs(1),
            reconnect: RetryPolicy::exponential(5, Duration::from_millis(200), Duration::from_secs(10)),
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            reconnect: config.retry_policy(),
            ..Self::new(config.redis_url.clone(), config.exchange.clone())
        }
    }

    fn bindings_key(&self) -> String {
        format!("{}:bindings", self.exchange)
    }

    fn queue_stream(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.exchange, queue)
    }

    fn dead_letter_stream(&self) -> String {
        format!("{}:dead-letters", self.exchange)
    }
}

/// One Redis connection, re-opened on demand.
struct ManagedConnection {
    client: redis::Client,
    connect_timeout: Duration,
    reconnect: RetryPolicy,
    closed: Arc<AtomicBool>,
    conn: Mutex<Option<redis::Connection>>,
}

impl ManagedConnection {
    fn new(client: redis::Client, config: &RedisStreamsConfig, closed: Arc<AtomicBool>) -> Self {
        Self {
            client,
            connect_timeout: config.connect_timeout,
            reconnect: config.reconnect.clone(),
            closed,
            conn: Mutex::new(None),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<redis::Connection>>, RedisStreamsError> {
        self.conn
            .lock()
            .map_err(|_| RedisStreamsError::Connection("connection lock poisoned".to_string()))
    }

    /// Run `op`, reconnecting with backoff when the connection is lost.
    fn run<T>(
        &self,
        mut op: impl FnMut(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, RedisStreamsError> {
        let mut guard = self.lock()?;
        let mut attempt = 1;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(RedisStreamsError::ShutDown);
            }

            let failure = if let Some(conn) = guard.as_mut() {
                match op(conn) {
                    Ok(value) => return Ok(value),
                    Err(e) if is_connection_error(&e) => e,
                    Err(e) => return Err(RedisStreamsError::Command(e.to_string())),
                }
            } else {
                match self.client.get_connection_with_timeout(self.connect_timeout) {
                    Ok(conn) => {
                        if attempt > 1 {
                            info!(attempt, "redis connection re-established");
                        }
                        *guard = Some(conn);
                        continue;
                    }
                    Err(e) => e,
                }
            };
            *guard = None;

            if !self.reconnect.should_retry(attempt) {
                return Err(RedisStreamsError::Connection(failure.to_string()));
            }
            let delay = self.reconnect.delay_for_attempt(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, error = %failure, "redis connection lost, reconnecting");
            thread::sleep(delay);
            attempt += 1;
        }
    }
}

fn is_connection_error(e: &redis::RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error() || e.is_connection_refusal() || e.is_timeout()
}

#[derive(Debug, Clone)]
struct InFlight {
    queue: String,
    entry_id: String,
}

struct Inner {
    config: RedisStreamsConfig,
    client: redis::Client,
    commands: ManagedConnection,
    closed: Arc<AtomicBool>,
    next_tag: AtomicU64,
    in_flight: Mutex<HashMap<u64, InFlight>>,
    readers: Mutex<Vec<thread::JoinHandle<()>>>,
}

/// Topic bus over Redis Streams. Cheap to clone; clones share connections.
#[derive(Clone)]
pub struct RedisStreamsEventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RedisStreamsEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsEventBus")
            .field("exchange", &self.inner.config.exchange)
            .finish()
    }
}

impl RedisStreamsEventBus {
    /// Open the bus and verify the broker is reachable.
    pub fn connect(config: RedisStreamsConfig) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        let closed = Arc::new(AtomicBool::new(false));
        let commands = ManagedConnection::new(client.clone(), &config, Arc::clone(&closed));

        let bus = Self {
            inner: Arc::new(Inner {
                config,
                client,
                commands,
                closed,
                next_tag: AtomicU64::new(1),
                in_flight: Mutex::new(HashMap::new()),
                readers: Mutex::new(Vec::new()),
            }),
        };
        bus.inner.commands.run(|c| redis::cmd("PING").query::<String>(c))?;
        info!(exchange = %bus.inner.config.exchange, "connected to redis");
        Ok(bus)
    }

    /// Stop subscription readers and refuse further publishes.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let readers = self
            .inner
            .readers
            .lock()
            .map(|mut r| std::mem::take(&mut *r))
            .unwrap_or_default();
        for reader in readers {
            let _ = reader.join();
        }
        info!(exchange = %self.inner.config.exchange, "redis bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Dead-letter store on the same broker.
    pub fn dead_letter_store(&self) -> RedisDeadLetterStore {
        RedisDeadLetterStore { bus: self.clone() }
    }

    fn bindings(&self) -> Result<HashMap<String, Vec<String>>, RedisStreamsError> {
        let key = self.inner.config.bindings_key();
        let raw: HashMap<String, String> = self.inner.commands.run(|c| redis::cmd("HGETALL").arg(&key).query(c))?;
        raw.into_iter()
            .map(|(queue, patterns)| {
                serde_json::from_str::<Vec<String>>(&patterns)
                    .map(|p| (queue, p))
                    .map_err(|e| RedisStreamsError::Deserialization(format!("bindings: {e}")))
            })
            .collect()
    }

    fn next_tag(&self) -> u64 {
        self.inner.next_tag.fetch_add(1, Ordering::SeqCst)
    }

    fn take_in_flight(&self, tag: u64) -> Result<InFlight, BusError> {
        self.inner
            .in_flight
            .lock()
            .map_err(|_| BusError::Internal("lock poisoned".to_string()))?
            .remove(&tag)
            .ok_or(BusError::UnknownDelivery(tag))
    }

    fn spawn_reader(&self, queue: String, tx: mpsc::Sender<Delivery>) -> Result<(), BusError> {
        let reader = StreamReader {
            bus: self.clone(),
            conn: ManagedConnection::new(self.inner.client.clone(), &self.inner.config, Arc::clone(&self.inner.closed)),
            stream: self.inner.config.queue_stream(&queue),
            queue,
            tx,
        };
        let join = thread::Builder::new()
            .name(format!("redis-reader-{}", reader.queue))
            .spawn(move || reader.run())
            .map_err(|e| BusError::Internal(e.to_string()))?;
        if let Ok(mut readers) = self.inner.readers.lock() {
            readers.push(join);
        }
        Ok(())
    }
}

impl EventBus for RedisStreamsEventBus {
    #[instrument(
        skip(self, message),
        fields(routing_key = %message.routing_key, event_id = %message.message_id),
        err
    )]
    fn publish(&self, message: BusMessage) -> Result<(), PublishError> {
        if !is_valid_routing_key(&message.routing_key) {
            return Err(PublishError::InvalidRoutingKey(message.routing_key));
        }
        let targets: Vec<String> = self
            .bindings()?
            .into_iter()
            .filter(|(_, patterns)| patterns.iter().any(|p| topic_matches(p, &message.routing_key)))
            .map(|(queue, _)| self.inner.config.queue_stream(&queue))
            .collect();
        if targets.is_empty() {
            debug!("no queue bound for routing key; message dropped");
            return Ok(());
        }

        let fields = encode_fields(&message, false);
        self.inner.commands.run(|c| {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for stream in &targets {
                pipe.cmd("XADD").arg(stream).arg("*").arg(&fields).ignore();
            }
            pipe.query::<()>(c)
        })?;
        debug!(queues = targets.len(), "message confirmed");
        Ok(())
    }

    fn declare_queue(&self, binding: &QueueBinding) -> Result<(), BusError> {
        let config = &self.inner.config;
        let mut patterns = self.bindings()?.remove(&binding.queue).unwrap_or_default();
        for pattern in &binding.patterns {
            if !patterns.contains(pattern) {
                patterns.push(pattern.clone());
            }
        }
        let encoded = serde_json::to_string(&patterns).map_err(|e| BusError::Internal(e.to_string()))?;
        let stream = config.queue_stream(&binding.queue);

        self.inner.commands.run(|c| {
            redis::cmd("HSET")
                .arg(config.bindings_key())
                .arg(&binding.queue)
                .arg(&encoded)
                .query::<()>(c)?;
            match redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream)
                .arg(&binding.queue)
                .arg("0")
                .arg("MKSTREAM")
                .query::<()>(c)
            {
                Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
                other => other,
            }
        })?;
        debug!(queue = %binding.queue, patterns = ?patterns, "queue declared");
        Ok(())
    }

    fn subscribe(&self, binding: &QueueBinding) -> Result<Subscription<Delivery>, BusError> {
        self.declare_queue(binding)?;
        let (tx, rx) = mpsc::channel();
        self.spawn_reader(binding.queue.clone(), tx)?;
        Ok(Subscription::new(rx))
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        let entry = self.take_in_flight(delivery.delivery_tag)?;
        let stream = self.inner.config.queue_stream(&entry.queue);
        self.inner.commands.run(|c| {
            redis::cmd("XACK")
                .arg(&stream)
                .arg(&entry.queue)
                .arg(&entry.entry_id)
                .query::<u64>(c)
        })?;
        Ok(())
    }

    fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), BusError> {
        let entry = self.take_in_flight(delivery.delivery_tag)?;
        let stream = self.inner.config.queue_stream(&entry.queue);
        let fields = encode_fields(&delivery.message, true);
        self.inner.commands.run(|c| {
            let mut pipe = redis::pipe();
            pipe.atomic();
            if requeue {
                pipe.cmd("XADD").arg(&stream).arg("*").arg(&fields).ignore();
            }
            pipe.cmd("XACK").arg(&stream).arg(&entry.queue).arg(&entry.entry_id).ignore();
            pipe.query::<()>(c)
        })?;
        Ok(())
    }
}

/// Background reader feeding one subscription.
struct StreamReader {
    bus: RedisStreamsEventBus,
    conn: ManagedConnection,
    queue: String,
    stream: String,
    tx: mpsc::Sender<Delivery>,
}

enum Cursor {
    /// Re-reading this consumer's unacked history, after the given id.
    Pending(String),
    New,
}

impl StreamReader {
    fn run(self) {
        let block_ms = self.bus.inner.config.block.as_millis() as u64;
        let mut cursor = Cursor::Pending("0".to_string());

        while !self.bus.is_shut_down() {
            let id = match &cursor {
                Cursor::Pending(after) => after.clone(),
                Cursor::New => ">".to_string(),
            };
            let reply: Result<Option<StreamReadReply>, _> = self.conn.run(|c| {
                redis::cmd("XREADGROUP")
                    .arg("GROUP")
                    .arg(&self.queue)
                    .arg(&self.queue)
                    .arg("COUNT")
                    .arg(READ_BATCH)
                    .arg("BLOCK")
                    .arg(block_ms)
                    .arg("STREAMS")
                    .arg(&self.stream)
                    .arg(&id)
                    .query(c)
            });

            let entries: Vec<StreamId> = match reply {
                Ok(Some(reply)) => reply.keys.into_iter().flat_map(|k| k.ids).collect(),
                Ok(None) => Vec::new(),
                Err(RedisStreamsError::ShutDown) => break,
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "failed to read from stream");
                    thread::sleep(self.bus.inner.config.block);
                    continue;
                }
            };

            let replaying = matches!(cursor, Cursor::Pending(_));
            match entries.last() {
                Some(last) if replaying => cursor = Cursor::Pending(last.id.clone()),
                None if replaying => cursor = Cursor::New,
                _ => {}
            }

            for entry in entries {
                if !self.forward(entry, replaying) {
                    return;
                }
            }
        }
        debug!(queue = %self.queue, "stream reader stopped");
    }

    /// Hand one entry to the subscriber; `false` once the subscriber is gone.
    fn forward(&self, entry: StreamId, replaying: bool) -> bool {
        let (message, redelivered) = match decode_entry(&entry) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.divert_poison(&entry, &e);
                return true;
            }
        };

        let tag = self.bus.next_tag();
        if let Ok(mut in_flight) = self.bus.inner.in_flight.lock() {
            in_flight.insert(
                tag,
                InFlight {
                    queue: self.queue.clone(),
                    entry_id: entry.id.clone(),
                },
            );
        }
        let delivery = Delivery {
            delivery_tag: tag,
            queue: self.queue.clone(),
            redelivered: redelivered || replaying,
            message,
        };
        self.tx.send(delivery).is_ok()
    }

    /// Move an entry no subscriber can decode to the dead-letter stream, then
    /// settle it. Left pending if the dead letter cannot be written.
    fn divert_poison(&self, entry: &StreamId, cause: &RedisStreamsError) {
        let letter = poison_letter(&self.queue, entry, cause);
        if let Err(e) = self.bus.dead_letter_store().push(letter) {
            error!(
                queue = %self.queue,
                entry_id = %entry.id,
                error = %e,
                "undecodable stream entry could not be dead-lettered, left pending"
            );
            return;
        }
        warn!(queue = %self.queue, entry_id = %entry.id, error = %cause, "undecodable stream entry dead-lettered");

        let acked = self.conn.run(|c| {
            redis::cmd("XACK")
                .arg(&self.stream)
                .arg(&self.queue)
                .arg(&entry.id)
                .query::<u64>(c)
        });
        if let Err(e) = acked {
            warn!(queue = %self.queue, entry_id = %entry.id, error = %e, "failed to ack dead-lettered entry");
        }
    }
}

/// Dead letter for an entry that failed to decode. Whatever fields survive
/// are kept; without a body, the raw fields are stored as the body.
fn poison_letter(queue: &str, entry: &StreamId, cause: &RedisStreamsError) -> DeadLetter {
    let text = |name: &str| entry.get::<String>(name);
    let body = entry.get::<Vec<u8>>("body").unwrap_or_else(|| {
        let raw: HashMap<&str, String> = entry
            .map
            .iter()
            .map(|(k, v)| {
                let value = redis::from_redis_value::<Vec<u8>>(v)
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_else(|_| format!("{v:?}"));
                (k.as_str(), value)
            })
            .collect();
        serde_json::to_vec(&raw).unwrap_or_default()
    });

    DeadLetter {
        consumer: queue.to_string(),
        message: BusMessage {
            message_id: text("message_id")
                .and_then(|id| Uuid::parse_str(&id).ok())
                .unwrap_or_else(Uuid::now_v7),
            routing_key: text("routing_key").unwrap_or_default(),
            content_type: text("content_type").unwrap_or_else(|| CONTENT_TYPE_JSON.to_string()),
            persistent: true,
            body,
        },
        reason: DeadLetterReason::Rejected,
        error: format!("stream entry {}: {cause}", entry.id),
        attempts: 1,
        dead_lettered_at: Utc::now(),
    }
}

fn encode_fields(message: &BusMessage, redelivered: bool) -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("message_id", message.message_id.to_string().into_bytes()),
        ("routing_key", message.routing_key.clone().into_bytes()),
        ("content_type", message.content_type.clone().into_bytes()),
        ("persistent", flag(message.persistent)),
        ("redelivered", flag(redelivered)),
        ("body", message.body.clone()),
    ]
}

fn flag(value: bool) -> Vec<u8> {
    if value { b"1".to_vec() } else { b"0".to_vec() }
}

fn field<T: redis::FromRedisValue>(entry: &StreamId, name: &str) -> Result<T, RedisStreamsError> {
    entry
        .get::<T>(name)
        .ok_or_else(|| RedisStreamsError::Deserialization(format!("missing or invalid field '{name}'")))
}

/// Decode a queue entry into the message and its redelivered flag.
fn decode_entry(entry: &StreamId) -> Result<(BusMessage, bool), RedisStreamsError> {
    let message_id: String = field(entry, "message_id")?;
    let message = BusMessage {
        message_id: Uuid::parse_str(&message_id)
            .map_err(|e| RedisStreamsError::Deserialization(format!("message_id: {e}")))?,
        routing_key: field(entry, "routing_key")?,
        content_type: field(entry, "content_type")?,
        persistent: field::<String>(entry, "persistent")? == "1",
        body: field(entry, "body")?,
    };
    let redelivered = field::<String>(entry, "redelivered").map(|v| v == "1").unwrap_or(false);
    Ok((message, redelivered))
}

/// Dead letters kept in a Redis stream next to the queues.
#[derive(Debug, Clone)]
pub struct RedisDeadLetterStore {
    bus: RedisStreamsEventBus,
}

impl DeadLetterStore for RedisDeadLetterStore {
    fn push(&self, letter: DeadLetter) -> Result<(), DeadLetterError> {
        let stream = self.bus.inner.config.dead_letter_stream();
        let mut fields = encode_fields(&letter.message, false);
        fields.push(("consumer", letter.consumer.into_bytes()));
        fields.push(("reason", reason_label(letter.reason).as_bytes().to_vec()));
        fields.push(("error", letter.error.into_bytes()));
        fields.push(("attempts", letter.attempts.to_string().into_bytes()));
        fields.push(("dead_lettered_at", letter.dead_lettered_at.to_rfc3339().into_bytes()));

        self.bus
            .inner
            .commands
            .run(|c| redis::cmd("XADD").arg(&stream).arg("*").arg(&fields).query::<String>(c))
            .map(|_| ())
            .map_err(|e| DeadLetterError::Unavailable(e.to_string()))
    }

    fn list(&self) -> Result<Vec<DeadLetter>, DeadLetterError> {
        let stream = self.bus.inner.config.dead_letter_stream();
        let reply: redis::streams::StreamRangeReply = self
            .bus
            .inner
            .commands
            .run(|c| redis::cmd("XRANGE").arg(&stream).arg("-").arg("+").query(c))
            .map_err(|e| DeadLetterError::Unavailable(e.to_string()))?;

        reply
            .ids
            .iter()
            .map(|entry| decode_dead_letter(entry).map_err(|e| DeadLetterError::Unavailable(e.to_string())))
            .collect()
    }
}

fn reason_label(reason: DeadLetterReason) -> &'static str {
    match reason {
        DeadLetterReason::Rejected => "rejected",
        DeadLetterReason::RetriesExhausted => "retries_exhausted",
    }
}

fn decode_dead_letter(entry: &StreamId) -> Result<DeadLetter, RedisStreamsError> {
    let (message, _) = decode_entry(entry)?;
    let reason = match field::<String>(entry, "reason")?.as_str() {
        "retries_exhausted" => DeadLetterReason::RetriesExhausted,
        _ => DeadLetterReason::Rejected,
    };
    let at: String = field(entry, "dead_lettered_at")?;
    Ok(DeadLetter {
        consumer: field(entry, "consumer")?,
        message,
        reason,
        error: field(entry, "error")?,
        attempts: field::<String>(entry, "attempts")?
            .parse()
            .map_err(|e| RedisStreamsError::Deserialization(format!("attempts: {e}")))?,
        dead_lettered_at: DateTime::parse_from_rfc3339(&at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| RedisStreamsError::Deserialization(format!("dead_lettered_at: {e}")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_message() -> BusMessage {
        BusMessage {
            message_id: Uuid::now_v7(),
            routing_key: "sale.credit.requested".to_string(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            persistent: true,
            body: br#"{"saleId":"x"}"#.to_vec(),
        }
    }

    fn as_entry(fields: Vec<(&'static str, Vec<u8>)>) -> StreamId {
        StreamId {
            id: "1700000000000-0".to_string(),
            map: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), redis::Value::Data(v)))
                .collect(),
        }
    }

    #[test]
    fn keys_are_namespaced_by_exchange() {
        let config = RedisStreamsConfig::new("redis://127.0.0.1:6379", "ledgerflow.events");
        assert_eq!(config.bindings_key(), "ledgerflow.events:bindings");
        assert_eq!(config.queue_stream("credit.accounts"), "ledgerflow.events:queue:credit.accounts");
        assert_eq!(config.dead_letter_stream(), "ledgerflow.events:dead-letters");
    }

    #[test]
    fn entries_decode_back_into_messages() {
        let message = test_message();
        let (decoded, redelivered) = decode_entry(&as_entry(encode_fields(&message, true))).unwrap();
        assert_eq!(decoded, message);
        assert!(redelivered);
    }

    #[test]
    fn entries_missing_fields_are_rejected() {
        let mut fields = encode_fields(&test_message(), false);
        fields.retain(|(k, _)| *k != "routing_key");
        assert!(matches!(
            decode_entry(&as_entry(fields)),
            Err(RedisStreamsError::Deserialization(_))
        ));
    }

    #[test]
    fn poison_entries_keep_surviving_fields() {
        let message = test_message();
        let mut fields = encode_fields(&message, false);
        fields.retain(|(k, _)| *k != "content_type");
        let entry = as_entry(fields);
        let cause = decode_entry(&entry).unwrap_err();

        let letter = poison_letter("credit.accounts", &entry, &cause);
        assert_eq!(letter.reason, DeadLetterReason::Rejected);
        assert_eq!(letter.consumer, "credit.accounts");
        assert_eq!(letter.event_id(), message.message_id);
        assert_eq!(letter.message.routing_key, message.routing_key);
        assert_eq!(letter.message.body, message.body);
        assert!(letter.error.contains("content_type"), "{}", letter.error);
    }

    #[test]
    fn poison_entries_without_body_store_raw_fields() {
        let entry = as_entry(vec![("routing_key", b"sale.completed".to_vec()), ("junk", b"x".to_vec())]);
        let cause = decode_entry(&entry).unwrap_err();

        let letter = poison_letter("inventory.stock", &entry, &cause);
        let raw: HashMap<String, String> = serde_json::from_slice(&letter.message.body).unwrap();
        assert_eq!(raw["junk"], "x");
        assert_eq!(raw["routing_key"], "sale.completed");
        assert_eq!(letter.message.routing_key, "sale.completed");
    }

    #[test]
    fn connection_failures_map_to_unavailable() {
        let publish: PublishError = RedisStreamsError::Connection("refused".to_string()).into();
        assert!(matches!(publish, PublishError::Unavailable(_)));
        let publish: PublishError = RedisStreamsError::Command("EXECABORT".to_string()).into();
        assert!(matches!(publish, PublishError::NotConfirmed(_)));
        let bus: BusError = RedisStreamsError::ShutDown.into();
        assert!(matches!(bus, BusError::Unavailable(_)));
    }
}
