//! BusBridge - bidirectional bridge between a log bus and a queue bus
//!
//! Records consumed from log-bus topics are republished to queue-bus topics
//! with guaranteed delivery, and messages consumed from a queue-bus queue are
//! produced to log-bus topics, acknowledged only once the log bus took them.
//! Topic names are translated through per-direction tables.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod endpoint;
pub mod metrics;
pub mod pool;

pub use bridge::{BridgeEngine, EngineConfig, TopicTranslator};
pub use config::{BridgeSettings, Config};
pub use diagnostics::Diagnostics;
pub use endpoint::{LogBus, QueueBus, QueueBusConfig};
pub use metrics::{Metrics, MetricsServer};
pub use pool::RingPool;
