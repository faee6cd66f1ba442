//! Queue Bus Endpoint
//!
//! Guaranteed-delivery producer and flow consumer over a [`QueueClient`].
//!
//! Every outbound message occupies a [`MessageState`] from the [`RingPool`]
//! from publish until the broker acknowledges it. The broker acknowledges in
//! publish order, so each acknowledgment is validated against the oldest
//! in-flight state only; anything else is an ordering alarm.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::AHashMap;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{
    BusListener, DeliveryMode, EndpointError, FlowHandler, InboundQueueMessage, Message,
    OutboundMessage, PublishEvents, QueueClient, QueueDelivery, KEY_HEADER,
};
use crate::codec::Renderers;
use crate::metrics::{Direction, Metrics};
use crate::pool::{AckOutcome, Correlated, PoolStats, Reusable, RingPool};

/// Default synchronous publish attempts per message
pub const DEFAULT_SEND_ATTEMPTS: u32 = 5;

/// Reusable envelope for one queue-bound message
#[derive(Debug, Default)]
pub struct MessageState {
    pub message: OutboundMessage,
    /// Log-bus partition the message was consumed from
    pub partition: Option<i32>,
    /// Log-bus offset the message was consumed from
    pub offset: Option<i64>,
}

impl Reusable for MessageState {
    fn reset(&mut self) {
        // Drop payload references now rather than on reuse
        self.message.payload = Bytes::new();
        self.message.headers.clear();
        self.message.msg_id = 0;
        self.partition = None;
        self.offset = None;
    }
}

impl Correlated for MessageState {
    fn correlation_id(&self) -> u64 {
        self.message.msg_id
    }
}

/// Queue bus tuning
#[derive(Debug, Clone)]
pub struct QueueBusConfig {
    pub pool_capacity: usize,
    pub prefill: bool,
    pub send_attempts: u32,
    pub renderers: Renderers,
}

impl Default for QueueBusConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 10_000,
            prefill: false,
            send_attempts: DEFAULT_SEND_ATTEMPTS,
            renderers: Renderers::default(),
        }
    }
}

/// Validates broker acknowledgments against the in-flight FIFO.
///
/// Runs on the broker's acknowledgment thread.
struct AckCorrelator {
    pool: Arc<RingPool<MessageState>>,
    metrics: Arc<Metrics>,
}

impl AckCorrelator {
    fn settle(&self, msg_id: u64) {
        match self.pool.acknowledge(msg_id) {
            AckOutcome::Matched => {}
            AckOutcome::Skipped {
                expected,
                skipped,
                found,
            } => {
                error!(
                    "Queue bus: ack for {} arrived while {} was oldest in flight; released {} message(s) whose ack was lost: {:?}",
                    msg_id,
                    expected,
                    skipped.len(),
                    skipped
                );
                if !found {
                    error!("Queue bus: ack for {} matched no in-flight message", msg_id);
                }
                self.metrics.ack_alarm("skipped");
            }
            AckOutcome::Duplicate { expected } => {
                error!(
                    "Queue bus: ack for {} is older than oldest in-flight message {}; duplicate ack",
                    msg_id, expected
                );
                self.metrics.ack_alarm("duplicate");
            }
            AckOutcome::Unexpected => {
                error!(
                    "Queue bus: ack for {} received with nothing in flight",
                    msg_id
                );
                self.metrics.ack_alarm("unexpected");
            }
        }
    }
}

impl PublishEvents for AckCorrelator {
    fn on_ack(&self, msg_id: u64) {
        self.metrics.acks_total.inc();
        self.settle(msg_id);
    }

    fn on_reject(&self, msg_id: u64, err: EndpointError) {
        error!("Queue bus: broker rejected message {}: {}", msg_id, err);
        self.metrics.ack_rejections.inc();
        self.metrics.failed(Direction::LogToQueue);
        self.settle(msg_id);
    }
}

/// Turns flow callbacks into listener calls
struct QueueFlow {
    listener: Arc<dyn BusListener<QueueDelivery>>,
    renderers: Renderers,
}

impl FlowHandler for QueueFlow {
    fn on_delivery(&self, inbound: InboundQueueMessage) {
        let key = inbound.headers.get(KEY_HEADER).cloned();
        let topic = inbound.destination;
        let delivery_id = inbound.token.delivery_id();
        let delivery = QueueDelivery {
            message: Message {
                topic: topic.clone(),
                key: key.clone(),
                value: inbound.payload,
                partition: None,
                offset: None,
            },
            token: inbound.token,
        };

        if let Err(e) = self.listener.on_message(delivery) {
            warn!(
                "Queue bus: failed to forward delivery {} (topic={}, key={}): {}",
                delivery_id,
                topic,
                self.renderers.key.render_opt(key.as_deref()),
                e
            );
        }
    }

    fn on_active(&self) {
        info!("Queue bus: flow active");
        self.listener.on_connected();
    }

    fn on_inactive(&self) {
        warn!("Queue bus: flow inactive");
        self.listener.on_disconnected();
    }
}

/// Queue bus endpoint
pub struct QueueBus {
    client: Arc<dyn QueueClient>,
    pool: Arc<RingPool<MessageState>>,
    sequence: AtomicU64,
    send_attempts: u32,
    renderers: Renderers,
    metrics: Arc<Metrics>,
    /// Interned destination names, shared by every state bound for them
    destinations: RwLock<AHashMap<String, Arc<str>>>,
    queue: Mutex<Option<String>>,
}

impl QueueBus {
    pub fn new(client: Arc<dyn QueueClient>, config: QueueBusConfig, metrics: Arc<Metrics>) -> Self {
        let pool = Arc::new(RingPool::new(config.pool_capacity));
        if config.prefill {
            pool.prefill();
        }
        metrics.update_pool_stats(&pool.stats());

        // Seeded from the clock so ids do not repeat across restarts
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);

        Self {
            client,
            pool,
            sequence: AtomicU64::new(seed),
            send_attempts: config.send_attempts.max(1),
            renderers: config.renderers,
            metrics,
            destinations: RwLock::new(AHashMap::new()),
            queue: Mutex::new(None),
        }
    }

    /// Connect the publisher and bind the consumer flow on `queue`
    pub fn start(
        &self,
        queue: &str,
        listener: Arc<dyn BusListener<QueueDelivery>>,
    ) -> Result<(), EndpointError> {
        self.client.connect(Arc::new(AckCorrelator {
            pool: self.pool.clone(),
            metrics: self.metrics.clone(),
        }))?;

        *self.queue.lock() = Some(queue.to_string());
        self.client.bind_flow(
            queue,
            Arc::new(QueueFlow {
                listener,
                renderers: self.renderers,
            }),
        )?;

        info!("Queue bus: bound flow to queue '{}'", queue);
        Ok(())
    }

    /// Publish a message with persistent delivery.
    ///
    /// Returns the sequence id the broker will acknowledge. Fails with
    /// [`EndpointError::Backpressure`] when every state is in flight, and
    /// with the last publish error once `send_attempts` are used up; the
    /// message is dropped in that case.
    pub fn send(
        &self,
        partition: Option<i32>,
        offset: Option<i64>,
        topic: &str,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Result<u64, EndpointError> {
        let mut state = self.pool.acquire()?;

        let msg_id = self.sequence.fetch_add(1, Ordering::Relaxed);
        state.message.destination = self.destination(topic);
        state.message.payload = value;
        state.message.msg_id = msg_id;
        state.message.delivery_mode = DeliveryMode::Persistent;
        if let Some(key) = key {
            state.message.headers.insert(KEY_HEADER, key);
        }
        state.partition = partition;
        state.offset = offset;

        // In flight before publishing: the ack may beat publish() back
        let outbound = state.message.clone();
        self.pool.append_in_flight(state)?;

        let mut last_err = EndpointError::Other("no publish attempted".to_string());
        for attempt in 1..=self.send_attempts {
            if attempt > 1 {
                self.metrics.publish_retries.inc();
            }
            match self.client.publish(&outbound) {
                Ok(()) => {
                    debug!(
                        "Queue bus: published {} to '{}' (attempt {})",
                        msg_id, outbound.destination, attempt
                    );
                    self.metrics.forwarded(Direction::LogToQueue);
                    return Ok(msg_id);
                }
                Err(e) => {
                    warn!(
                        "Queue bus: publish {} to '{}' failed (attempt {}/{}): {}",
                        msg_id, outbound.destination, attempt, self.send_attempts, e
                    );
                    last_err = e;
                }
            }
        }

        // Never reached the broker, so no ack will come for it
        match self.pool.retract_newest(msg_id) {
            Some(state) => self.pool.release(state),
            None => warn!(
                "Queue bus: message {} was no longer the newest in flight",
                msg_id
            ),
        }
        self.metrics.dropped(Direction::LogToQueue);
        error!(
            "Queue bus: dropped message {} for '{}' after {} attempts (partition={:?}, offset={:?}, key={}, value={}): {}",
            msg_id,
            outbound.destination,
            self.send_attempts,
            partition,
            offset,
            self.renderers
                .key
                .render_opt(outbound.headers.get(KEY_HEADER).map(|k| &k[..])),
            self.renderers.value.render(&outbound.payload),
            last_err
        );
        Err(last_err)
    }

    pub fn start_flow(&self) -> Result<(), EndpointError> {
        self.client.start_flow()?;
        info!(
            "Queue bus: flow started on '{}'",
            self.queue.lock().as_deref().unwrap_or_default()
        );
        Ok(())
    }

    pub fn stop_flow(&self) -> Result<(), EndpointError> {
        self.client.stop_flow()?;
        info!(
            "Queue bus: flow stopped on '{}'",
            self.queue.lock().as_deref().unwrap_or_default()
        );
        Ok(())
    }

    pub fn pool(&self) -> &Arc<RingPool<MessageState>> {
        &self.pool
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn destination(&self, topic: &str) -> Arc<str> {
        if let Some(dest) = self.destinations.read().get(topic) {
            return dest.clone();
        }
        self.destinations
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| Arc::from(topic))
            .clone()
    }
}
