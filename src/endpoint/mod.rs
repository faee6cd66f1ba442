//! Bus Endpoints
//!
//! Capability traits the bridge needs from the two broker client libraries,
//! plus the wrappers that add the bridge's own semantics on top of them:
//!
//! - [`LogBus`]: partitioned, poll-driven log bus (consumer groups, offsets)
//! - [`QueueBus`]: broker-acknowledged queue bus with persistent delivery
//!
//! The clients themselves (handshake, partition assignment, transport
//! retry, TLS) live outside the bridge and are reached only through
//! [`LogClient`] and [`QueueClient`].

pub mod drivers;
pub mod log_bus;
pub mod memory;
pub mod queue_bus;


use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use smallvec::SmallVec;

use crate::pool::PoolError;

pub use log_bus::LogBus;
pub use queue_bus::{MessageState, QueueBus, QueueBusConfig};

/// Queue-side header carrying the log-side message key
pub const KEY_HEADER: &str = "solkaf_bridge_hdr_key";

/// Error type for endpoint operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// Connection to the broker failed or was lost
    ConnectionLost(String),
    /// Broker rejected the operation
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Endpoint has not been started
    NotStarted,
    /// Every in-flight state is taken; stop consuming upstream
    Backpressure,
    /// Invalid configuration
    InvalidConfig(String),
    /// Other error
    Other(String),
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            EndpointError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            EndpointError::Timeout => write!(f, "Operation timed out"),
            EndpointError::NotStarted => write!(f, "Endpoint not started"),
            EndpointError::Backpressure => write!(f, "All messages in flight"),
            EndpointError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            EndpointError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for EndpointError {}

impl From<PoolError> for EndpointError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { .. } => EndpointError::Backpressure,
            PoolError::Overflow => EndpointError::Other(err.to_string()),
        }
    }
}

/// A record consumed from, or produced to, either bus
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

impl Message {
    pub fn new(topic: impl Into<String>, key: Option<Bytes>, value: Bytes) -> Self {
        Self {
            topic: topic.into(),
            key,
            value,
            partition: None,
            offset: None,
        }
    }
}

/// Delivery guarantee requested from the queue broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    Persistent,
    Direct,
}

/// User properties attached to a queue-bus message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(SmallVec<[(Cow<'static, str>, Bytes); 2]>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any previous value under the same name
    pub fn insert(&mut self, name: impl Into<Cow<'static, str>>, value: Bytes) {
        let name = name.into();
        if let Some(slot) = self.0.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.0.iter().map(|(n, v)| (n.as_ref(), v))
    }
}

/// A message bound for the queue bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub destination: Arc<str>,
    pub headers: Headers,
    pub payload: Bytes,
    /// Sequence assigned at publish time; the broker acknowledges by it
    pub msg_id: u64,
    pub delivery_mode: DeliveryMode,
}

impl Default for OutboundMessage {
    fn default() -> Self {
        Self {
            destination: Arc::from(""),
            headers: Headers::new(),
            payload: Bytes::new(),
            msg_id: 0,
            delivery_mode: DeliveryMode::Persistent,
        }
    }
}

/// Settles a single queue delivery with the broker
pub trait Acknowledge: Send + Sync {
    fn acknowledge(&self, delivery_id: u64);
}

/// Handle for acknowledging one queue delivery.
///
/// Dropping the token without calling [`AckToken::ack`] leaves the delivery
/// unacknowledged, so the broker will redeliver it.
#[derive(Clone)]
pub struct AckToken {
    delivery_id: u64,
    acker: Arc<dyn Acknowledge>,
}

impl AckToken {
    pub fn new(delivery_id: u64, acker: Arc<dyn Acknowledge>) -> Self {
        Self { delivery_id, acker }
    }

    pub fn delivery_id(&self) -> u64 {
        self.delivery_id
    }

    pub fn ack(self) {
        self.acker.acknowledge(self.delivery_id);
    }
}

impl fmt::Debug for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckToken")
            .field("delivery_id", &self.delivery_id)
            .finish()
    }
}

/// A message received from a queue flow, as the client library hands it over
#[derive(Debug, Clone)]
pub struct InboundQueueMessage {
    pub destination: String,
    pub headers: Headers,
    pub payload: Bytes,
    pub token: AckToken,
}

/// A queue message handed to the bridge, with its acknowledgment handle
#[derive(Debug, Clone)]
pub struct QueueDelivery {
    pub message: Message,
    pub token: AckToken,
}

/// Connectivity notifications; both default to no-ops
pub trait ConnectionEvents: Send + Sync {
    fn on_connected(&self) {}
    fn on_disconnected(&self) {}
}

/// Receives messages from an endpoint.
///
/// The message type selects the role: `BusListener<Message>` consumes the
/// log bus, `BusListener<QueueDelivery>` consumes the queue bus.
pub trait BusListener<M>: ConnectionEvents {
    fn on_message(&self, message: M) -> Result<(), EndpointError>;
}

/// Completion for a log-bus send; advisory only
pub type SendCompletion = Box<dyn FnOnce(Result<(), EndpointError>) + Send>;

/// Capabilities required from a log-bus client library
#[async_trait]
pub trait LogClient: Send + Sync {
    /// Join the consumer group for `topics`; connectivity is reported to `events`
    fn subscribe(
        &self,
        topics: &[String],
        events: Arc<dyn ConnectionEvents>,
    ) -> Result<(), EndpointError>;

    /// Wait up to `timeout` for records; empty on timeout
    async fn fetch(
        &self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<Message>, EndpointError>;

    /// Mark everything fetched so far as consumed, without waiting
    fn commit_async(&self) -> Result<(), EndpointError>;

    /// Produce a record; `completion` runs once the broker answers
    fn send(&self, message: Message, completion: SendCompletion);
}

/// Publish outcomes reported by the queue broker, on its own thread
pub trait PublishEvents: Send + Sync {
    fn on_ack(&self, msg_id: u64);
    fn on_reject(&self, msg_id: u64, error: EndpointError);
}

/// Callbacks for a bound queue flow
pub trait FlowHandler: Send + Sync {
    fn on_delivery(&self, message: InboundQueueMessage);
    fn on_active(&self) {}
    fn on_inactive(&self) {}
}

/// Capabilities required from a queue-bus client library.
///
/// Publish acknowledgments must arrive through [`PublishEvents`] in publish
/// order, and never re-entrantly from inside [`QueueClient::publish`].
pub trait QueueClient: Send + Sync {
    fn connect(&self, events: Arc<dyn PublishEvents>) -> Result<(), EndpointError>;

    /// Bind a consumer flow to `queue`; flow state is reported to `handler`
    fn bind_flow(&self, queue: &str, handler: Arc<dyn FlowHandler>) -> Result<(), EndpointError>;

    fn start_flow(&self) -> Result<(), EndpointError>;

    fn stop_flow(&self) -> Result<(), EndpointError>;

    /// Hand a message to the broker; the acknowledgment arrives later
    fn publish(&self, message: &OutboundMessage) -> Result<(), EndpointError>;
}
