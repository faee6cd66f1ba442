//! In-process loopback clients
//!
//! [`MemoryLogClient`] and [`MemoryQueueClient`] implement the client traits
//! entirely in memory, so the bridge runs without external brokers. They
//! mimic the threading of real client libraries: asynchronous callbacks
//! (publish acks, flow deliveries, send completions) run on a dedicated
//! callback thread, never on the caller's stack. Connectivity changes are
//! reported synchronously on the thread that triggers them.
//!
//! Handlers are always invoked with internal locks released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use crossbeam_channel::{unbounded, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error};

use super::{
    AckToken, Acknowledge, ConnectionEvents, EndpointError, FlowHandler, Headers,
    InboundQueueMessage, LogClient, Message, OutboundMessage, PublishEvents, QueueClient,
    SendCompletion, KEY_HEADER,
};

type Job = Box<dyn FnOnce() + Send>;

/// Runs callbacks one at a time, in submission order, on its own thread
struct CallbackThread {
    tx: Sender<Job>,
}

impl CallbackThread {
    fn spawn(name: &str) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in rx {
                    job();
                }
            });
        if let Err(e) = spawned {
            error!("Failed to spawn callback thread '{}': {}", name, e);
        }
        Self { tx }
    }

    fn run(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            error!("Callback thread is gone; dropping callback");
        }
    }

    /// Block until every callback submitted so far has run
    fn drain(&self) {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        self.run(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv_timeout(Duration::from_secs(5));
    }
}

// ============================================================================
// Log bus
// ============================================================================

#[derive(Default)]
struct LogState {
    topics: Vec<String>,
    events: Option<Arc<dyn ConnectionEvents>>,
    pending: VecDeque<Message>,
    /// Positions fetched but not yet committed
    uncommitted: Vec<(String, i32, i64)>,
    produced: Vec<Message>,
}

/// Loopback log-bus client with a single partition per topic
pub struct MemoryLogClient {
    state: Mutex<LogState>,
    arrived: Notify,
    next_offset: DashMap<String, i64>,
    committed: DashMap<(String, i32), i64>,
    connected: AtomicBool,
    fail_sends: AtomicBool,
    fetches: AtomicUsize,
    commits: AtomicUsize,
    callbacks: CallbackThread,
}

impl MemoryLogClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            arrived: Notify::new(),
            next_offset: DashMap::new(),
            committed: DashMap::new(),
            connected: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            callbacks: CallbackThread::spawn("memory-log-callbacks"),
        }
    }

    fn assign_offset(&self, topic: &str) -> i64 {
        let mut next = self.next_offset.entry(topic.to_string()).or_insert(0);
        let offset = *next;
        *next += 1;
        offset
    }

    /// Make a record available to consumers, as if another producer wrote it
    pub fn inject(&self, topic: &str, key: Option<Bytes>, value: Bytes) -> i64 {
        let offset = self.assign_offset(topic);
        let mut message = Message::new(topic, key, value);
        message.partition = Some(0);
        message.offset = Some(offset);
        self.state.lock().pending.push_back(message);
        self.arrived.notify_one();
        offset
    }

    /// Records produced through [`LogClient::send`]
    pub fn produced(&self) -> Vec<Message> {
        self.state.lock().produced.clone()
    }

    /// Records injected but not fetched yet
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Next offset to consume for a topic, if anything was committed
    pub fn committed_offset(&self, topic: &str) -> Option<i64> {
        self.committed
            .get(&(topic.to_string(), 0))
            .map(|entry| *entry.value())
    }

    /// Report a connectivity change to the subscriber
    pub fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) == connected {
            return;
        }
        let events = self.state.lock().events.clone();
        if let Some(events) = events {
            if connected {
                events.on_connected();
            } else {
                events.on_disconnected();
            }
        }
        // Wake a pending fetch so it notices
        self.arrived.notify_waiters();
    }

    /// Make every subsequent send fail
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Block until every send completion submitted so far has run
    pub fn drain_callbacks(&self) {
        self.callbacks.drain();
    }

    fn take_batch(&self, max_records: usize) -> Vec<Message> {
        let mut state = self.state.lock();
        let LogState {
            topics,
            pending,
            uncommitted,
            ..
        } = &mut *state;

        let mut batch = Vec::new();
        let mut kept = VecDeque::with_capacity(pending.len());
        while let Some(message) = pending.pop_front() {
            if batch.len() < max_records && topics.iter().any(|t| *t == message.topic) {
                if let (Some(partition), Some(offset)) = (message.partition, message.offset) {
                    uncommitted.push((message.topic.clone(), partition, offset));
                }
                batch.push(message);
            } else {
                kept.push_back(message);
            }
        }
        *pending = kept;
        batch
    }
}

impl Default for MemoryLogClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogClient for MemoryLogClient {
    fn subscribe(
        &self,
        topics: &[String],
        events: Arc<dyn ConnectionEvents>,
    ) -> Result<(), EndpointError> {
        let mut state = self.state.lock();
        state.topics = topics.to_vec();
        state.events = Some(events);
        debug!("Memory log bus: subscribed to {:?}", topics);
        Ok(())
    }

    async fn fetch(
        &self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<Message>, EndpointError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.arrived.notified();
            // Nothing is consumed while disconnected; the poll just times out
            if self.connected.load(Ordering::SeqCst) {
                let batch = self.take_batch(max_records);
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    fn commit_async(&self) -> Result<(), EndpointError> {
        let positions = std::mem::take(&mut self.state.lock().uncommitted);
        for (topic, partition, offset) in positions {
            let mut entry = self.committed.entry((topic, partition)).or_insert(0);
            *entry = (*entry).max(offset + 1);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, mut message: Message, completion: SendCompletion) {
        if self.fail_sends.load(Ordering::SeqCst) {
            let topic = message.topic;
            self.callbacks.run(move || {
                completion(Err(EndpointError::Rejected(format!(
                    "memory log bus refused send to '{}'",
                    topic
                ))))
            });
            return;
        }

        message.partition = Some(0);
        message.offset = Some(self.assign_offset(&message.topic));
        self.state.lock().produced.push(message);
        self.callbacks.run(move || completion(Ok(())));
    }
}

// ============================================================================
// Queue bus
// ============================================================================

/// How the loopback broker acknowledges publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Every publish is acknowledged on the callback thread
    #[default]
    Auto,
    /// Publishes wait for [`MemoryQueueClient::ack_next`] and friends
    Manual,
}

impl std::str::FromStr for AckMode {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(AckMode::Auto),
            "manual" => Ok(AckMode::Manual),
            other => Err(EndpointError::InvalidConfig(format!(
                "unknown ack mode '{}'",
                other
            ))),
        }
    }
}

/// Records which queue deliveries the consumer acknowledged
#[derive(Default)]
pub struct DeliveryLedger {
    acked: Mutex<Vec<u64>>,
}

impl DeliveryLedger {
    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().clone()
    }
}

impl Acknowledge for DeliveryLedger {
    fn acknowledge(&self, delivery_id: u64) {
        self.acked.lock().push(delivery_id);
    }
}

struct QueueState {
    publish_events: Option<Arc<dyn PublishEvents>>,
    flow: Option<Arc<dyn FlowHandler>>,
    queue: Option<String>,
    flow_running: bool,
    active: bool,
    published: Vec<OutboundMessage>,
    unacked: VecDeque<u64>,
    backlog: VecDeque<InboundQueueMessage>,
    next_delivery: u64,
}

/// Loopback queue-bus client
pub struct MemoryQueueClient {
    state: Mutex<QueueState>,
    ack_mode: AckMode,
    ledger: Arc<DeliveryLedger>,
    failing_publishes: AtomicUsize,
    callbacks: CallbackThread,
}

impl MemoryQueueClient {
    pub fn new(ack_mode: AckMode) -> Self {
        Self {
            state: Mutex::new(QueueState {
                publish_events: None,
                flow: None,
                queue: None,
                flow_running: false,
                active: true,
                published: Vec::new(),
                unacked: VecDeque::new(),
                backlog: VecDeque::new(),
                next_delivery: 1,
            }),
            ack_mode,
            ledger: Arc::new(DeliveryLedger::default()),
            failing_publishes: AtomicUsize::new(0),
            callbacks: CallbackThread::spawn("memory-queue-callbacks"),
        }
    }

    /// Messages accepted by [`QueueClient::publish`], in publish order
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state.lock().published.clone()
    }

    /// Publishes still waiting for a manual acknowledgment
    pub fn unacked(&self) -> usize {
        self.state.lock().unacked.len()
    }

    /// Acknowledge the oldest unacknowledged publish on the calling thread
    pub fn ack_next(&self) -> Option<u64> {
        let (msg_id, events) = {
            let mut state = self.state.lock();
            (state.unacked.pop_front()?, state.publish_events.clone()?)
        };
        events.on_ack(msg_id);
        Some(msg_id)
    }

    /// Acknowledge a specific publish, out of order if need be
    pub fn ack(&self, msg_id: u64) -> bool {
        let events = {
            let mut state = self.state.lock();
            let Some(pos) = state.unacked.iter().position(|id| *id == msg_id) else {
                return false;
            };
            state.unacked.remove(pos);
            state.publish_events.clone()
        };
        if let Some(events) = events {
            events.on_ack(msg_id);
        }
        true
    }

    /// Reject the oldest unacknowledged publish on the calling thread
    pub fn reject_next(&self) -> Option<u64> {
        let (msg_id, events) = {
            let mut state = self.state.lock();
            (state.unacked.pop_front()?, state.publish_events.clone()?)
        };
        events.on_reject(
            msg_id,
            EndpointError::Rejected("memory queue rejected message".to_string()),
        );
        Some(msg_id)
    }

    /// Make the next `count` publishes fail synchronously
    pub fn fail_next_publishes(&self, count: usize) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Queue a message on the bound queue, as if another publisher sent it.
    ///
    /// Delivered on the callback thread while the flow runs, otherwise held
    /// until the flow is started.
    pub fn inject(&self, topic: &str, key: Option<Bytes>, payload: Bytes) -> u64 {
        let mut headers = Headers::new();
        if let Some(key) = key {
            headers.insert(KEY_HEADER, key);
        }

        let mut state = self.state.lock();
        let delivery_id = state.next_delivery;
        state.next_delivery += 1;
        let message = InboundQueueMessage {
            destination: topic.to_string(),
            headers,
            payload,
            token: AckToken::new(delivery_id, self.ledger.clone()),
        };

        let flow = if state.flow_running {
            state.flow.clone()
        } else {
            None
        };
        match flow {
            Some(flow) => {
                drop(state);
                self.callbacks.run(move || flow.on_delivery(message));
            }
            None => state.backlog.push_back(message),
        }
        delivery_id
    }

    /// Flip the flow's active state, notifying the handler on this thread
    pub fn set_active(&self, active: bool) {
        let flow = {
            let mut state = self.state.lock();
            if state.active == active {
                return;
            }
            state.active = active;
            state.flow.clone()
        };
        if let Some(flow) = flow {
            if active {
                flow.on_active();
            } else {
                flow.on_inactive();
            }
        }
    }

    pub fn is_flow_running(&self) -> bool {
        self.state.lock().flow_running
    }

    pub fn bound_queue(&self) -> Option<String> {
        self.state.lock().queue.clone()
    }

    /// Deliveries the consumer acknowledged
    pub fn acked_deliveries(&self) -> Vec<u64> {
        self.ledger.acked()
    }

    /// Block until every callback submitted so far has run
    pub fn drain_callbacks(&self) {
        self.callbacks.drain();
    }
}

impl Default for MemoryQueueClient {
    fn default() -> Self {
        Self::new(AckMode::Auto)
    }
}

impl QueueClient for MemoryQueueClient {
    fn connect(&self, events: Arc<dyn PublishEvents>) -> Result<(), EndpointError> {
        self.state.lock().publish_events = Some(events);
        Ok(())
    }

    fn bind_flow(&self, queue: &str, handler: Arc<dyn FlowHandler>) -> Result<(), EndpointError> {
        let active = {
            let mut state = self.state.lock();
            state.queue = Some(queue.to_string());
            state.flow = Some(handler.clone());
            state.flow_running = true;
            state.active
        };
        debug!("Memory queue bus: bound flow to '{}'", queue);
        if active {
            handler.on_active();
        }
        self.start_flow()
    }

    fn start_flow(&self) -> Result<(), EndpointError> {
        let mut state = self.state.lock();
        let Some(flow) = state.flow.clone() else {
            return Err(EndpointError::NotStarted);
        };
        state.flow_running = true;
        let backlog = std::mem::take(&mut state.backlog);
        drop(state);

        for message in backlog {
            let flow = flow.clone();
            self.callbacks.run(move || flow.on_delivery(message));
        }
        Ok(())
    }

    fn stop_flow(&self) -> Result<(), EndpointError> {
        let mut state = self.state.lock();
        if state.flow.is_none() {
            return Err(EndpointError::NotStarted);
        }
        state.flow_running = false;
        Ok(())
    }

    fn publish(&self, message: &OutboundMessage) -> Result<(), EndpointError> {
        let failing = self
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(EndpointError::ConnectionLost(
                "memory queue publish failed".to_string(),
            ));
        }

        let mut state = self.state.lock();
        let Some(events) = state.publish_events.clone() else {
            return Err(EndpointError::NotStarted);
        };
        state.published.push(message.clone());

        let msg_id = message.msg_id;
        match self.ack_mode {
            AckMode::Auto => {
                drop(state);
                self.callbacks.run(move || events.on_ack(msg_id));
            }
            AckMode::Manual => state.unacked.push_back(msg_id),
        }
        Ok(())
    }
}
