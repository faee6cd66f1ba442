//! Bridge Engine
//!
//! Owns both endpoints and cross-wires them:
//!
//! - log bus records are translated and published to the queue bus
//! - queue deliveries are translated and produced to the log bus, and
//!   acknowledged to the queue broker once the log bus accepted them
//!
//! Connectivity callbacks never touch engine state directly. They are sent
//! as [`EngineEvent`]s into the control loop, which applies them before each
//! iteration. Log polling pauses while the queue flow is inactive and while
//! the in-flight pool could not absorb a full batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::translator::TopicTranslator;
use crate::endpoint::{
    BusListener, ConnectionEvents, EndpointError, LogBus, Message, QueueBus, QueueDelivery,
};
use crate::metrics::{Direction, Metrics};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Longest a single log poll may block
    pub poll_timeout: Duration,
    /// Wait between iterations while polling is paused
    pub idle_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            idle_backoff: Duration::from_millis(100),
        }
    }
}

/// Connectivity change reported by one of the endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    LogConnected,
    LogDisconnected,
    QueueActive,
    QueueInactive,
}

/// Why an iteration skipped polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReason {
    /// The queue flow is inactive; nowhere to forward to
    QueueInactive,
    /// Too few free in-flight states for a full batch
    PoolFull,
}

impl GateReason {
    fn as_str(&self) -> &'static str {
        match self {
            GateReason::QueueInactive => "queue_inactive",
            GateReason::PoolFull => "pool_full",
        }
    }
}

/// Outcome of one control loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// Polled the log bus; number of records forwarded or attempted
    Polled(usize),
    /// Polling was skipped
    Gated(GateReason),
    /// The poll itself failed
    PollFailed(EndpointError),
}

struct Connectivity {
    log_connected: AtomicBool,
    queue_active: AtomicBool,
}

/// Log bus listener: forwards records to the queue bus
struct LogForwarder {
    queue: Arc<QueueBus>,
    translator: Arc<TopicTranslator>,
    metrics: Arc<Metrics>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl ConnectionEvents for LogForwarder {
    fn on_connected(&self) {
        let _ = self.events.send(EngineEvent::LogConnected);
    }

    fn on_disconnected(&self) {
        let _ = self.events.send(EngineEvent::LogDisconnected);
    }
}

impl BusListener<Message> for LogForwarder {
    fn on_message(&self, message: Message) -> Result<(), EndpointError> {
        let Message {
            topic,
            key,
            value,
            partition,
            offset,
        } = message;
        let destination = self.translator.translate(&topic);

        match self.queue.send(partition, offset, destination, key, value) {
            Ok(msg_id) => {
                debug!("Bridge: '{}' -> '{}' as {}", topic, destination, msg_id);
                Ok(())
            }
            Err(e) => {
                self.metrics.failed(Direction::LogToQueue);
                Err(e)
            }
        }
    }
}

/// Queue bus listener: forwards deliveries to the log bus
struct QueueForwarder {
    log: Arc<LogBus>,
    translator: Arc<TopicTranslator>,
    metrics: Arc<Metrics>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl ConnectionEvents for QueueForwarder {
    fn on_connected(&self) {
        let _ = self.events.send(EngineEvent::QueueActive);
    }

    fn on_disconnected(&self) {
        let _ = self.events.send(EngineEvent::QueueInactive);
    }
}

impl BusListener<QueueDelivery> for QueueForwarder {
    fn on_message(&self, delivery: QueueDelivery) -> Result<(), EndpointError> {
        let QueueDelivery { message, token } = delivery;
        let destination = self.translator.translate(&message.topic).to_string();
        let metrics = self.metrics.clone();

        self.log.send(
            destination.clone(),
            message.key,
            message.value,
            Box::new(move |result| match result {
                Ok(()) => {
                    token.ack();
                    metrics.forwarded(Direction::QueueToLog);
                }
                Err(e) => {
                    // Left unacknowledged; the queue broker redelivers it
                    warn!(
                        "Bridge: log bus refused delivery {} for '{}': {}",
                        token.delivery_id(),
                        destination,
                        e
                    );
                    metrics.failed(Direction::QueueToLog);
                }
            }),
        );
        Ok(())
    }
}

/// Bidirectional bridge control loop
pub struct BridgeEngine {
    log: Arc<LogBus>,
    queue: Arc<QueueBus>,
    log_to_queue: Arc<TopicTranslator>,
    queue_to_log: Arc<TopicTranslator>,
    config: EngineConfig,
    metrics: Arc<Metrics>,
    connectivity: Connectivity,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl BridgeEngine {
    pub fn new(
        log: Arc<LogBus>,
        queue: Arc<QueueBus>,
        log_to_queue: TopicTranslator,
        queue_to_log: TopicTranslator,
        config: EngineConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            log,
            queue,
            log_to_queue: Arc::new(log_to_queue),
            queue_to_log: Arc::new(queue_to_log),
            config,
            metrics,
            connectivity: Connectivity {
                // The log side counts as up once subscribed
                log_connected: AtomicBool::new(true),
                // The queue side waits for its flow to report active
                queue_active: AtomicBool::new(false),
            },
            events_tx,
            events_rx,
        }
    }

    /// Bind the queue flow, then subscribe to the log topics.
    ///
    /// Fails without touching either bus when a full poll batch could not
    /// fit in the in-flight pool.
    pub fn start(&self, queue_name: &str, topics: &[String]) -> Result<(), EndpointError> {
        let (max_records, capacity) = (self.log.max_records(), self.queue.pool().capacity());
        if max_records > capacity {
            return Err(EndpointError::InvalidConfig(format!(
                "max records per poll ({}) exceeds the in-flight pool capacity ({})",
                max_records, capacity
            )));
        }

        self.queue.start(
            queue_name,
            Arc::new(QueueForwarder {
                log: self.log.clone(),
                translator: self.queue_to_log.clone(),
                metrics: self.metrics.clone(),
                events: self.events_tx.clone(),
            }),
        )?;

        self.log.start(
            topics,
            Arc::new(LogForwarder {
                queue: self.queue.clone(),
                translator: self.log_to_queue.clone(),
                metrics: self.metrics.clone(),
                events: self.events_tx.clone(),
            }),
        )?;

        info!(
            "Bridge: started (queue '{}', topics {:?}, {} log->queue and {} queue->log translations)",
            queue_name,
            topics,
            self.log_to_queue.len(),
            self.queue_to_log.len()
        );
        Ok(())
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Bridge: control loop running");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = self.run_iteration() => {}
            }
        }
        info!("Bridge: control loop stopped");
    }

    /// One pass of the control loop
    pub async fn run_iteration(&mut self) -> Iteration {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
        }

        if !self.is_queue_active() {
            self.metrics.gated(GateReason::QueueInactive.as_str());
            self.idle(false).await;
            return Iteration::Gated(GateReason::QueueInactive);
        }

        // A batch must never exhaust the pool mid-way
        if self.queue.pool().available() < self.log.max_records() {
            self.metrics.gated(GateReason::PoolFull.as_str());
            self.idle(true).await;
            return Iteration::Gated(GateReason::PoolFull);
        }

        match self.log.poll(self.config.poll_timeout).await {
            Ok(count) => Iteration::Polled(count),
            Err(e) => {
                warn!("Bridge: log bus poll failed: {}", e);
                tokio::time::sleep(self.config.idle_backoff).await;
                Iteration::PollFailed(e)
            }
        }
    }

    /// Wait for a connectivity event, freed pool space or the idle backoff
    async fn idle(&mut self, wake_on_space: bool) {
        let pool = self.queue.pool().clone();
        let space = async move {
            if wake_on_space {
                pool.wait_for_space().await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            Some(event) = self.events_rx.recv() => self.apply(event),
            _ = space => {}
            _ = tokio::time::sleep(self.config.idle_backoff) => {}
        }
    }

    fn apply(&self, event: EngineEvent) {
        match event {
            EngineEvent::QueueActive => {
                if !self.connectivity.queue_active.swap(true, Ordering::SeqCst) {
                    info!("Bridge: queue flow active, log polling enabled");
                }
            }
            EngineEvent::QueueInactive => {
                if self.connectivity.queue_active.swap(false, Ordering::SeqCst) {
                    warn!("Bridge: queue flow inactive, log polling paused");
                }
            }
            EngineEvent::LogDisconnected => {
                self.connectivity
                    .log_connected
                    .store(false, Ordering::SeqCst);
                warn!("Bridge: log bus disconnected, stopping queue flow");
                if let Err(e) = self.queue.stop_flow() {
                    warn!("Bridge: failed to stop queue flow: {}", e);
                }
            }
            EngineEvent::LogConnected => {
                self.connectivity.log_connected.store(true, Ordering::SeqCst);
                info!("Bridge: log bus connected, starting queue flow");
                if let Err(e) = self.queue.start_flow() {
                    warn!("Bridge: failed to start queue flow: {}", e);
                }
            }
        }
    }

    pub fn is_log_connected(&self) -> bool {
        self.connectivity.log_connected.load(Ordering::SeqCst)
    }

    pub fn is_queue_active(&self) -> bool {
        self.connectivity.queue_active.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> &Arc<LogBus> {
        &self.log
    }

    pub fn queue(&self) -> &Arc<QueueBus> {
        &self.queue
    }
}
