//! Bridge Module
//!
//! Bidirectional forwarding between the log bus and the queue bus.
//!
//! # Data Flow
//!
//! ```text
//! LogBus.poll -> LogForwarder -> translate -> QueueBus.send -> (ack) -> pool release
//! queue flow  -> QueueForwarder -> translate -> LogBus.send -> (completion) -> delivery ack
//! ```
//!
//! Only the log-to-queue direction tracks in-flight state. The log bus
//! producer is fire-and-forget from the bridge's point of view; durability
//! there is the log append, and the queue delivery is acknowledged only once
//! the append is confirmed.
//!
//! # Example Configuration
//!
//! ```properties
//! sol_bridge_queue=ORD.Q
//! kaf_bridge_topics=orders,payments
//! bridge_kafka_sol_topic_trans=orders:ORD.Q,payments:PAY.Q
//! bridge_sol_kafka_topic_trans=replies/orders:order-replies
//! ```

mod engine;
mod translator;


pub use engine::{BridgeEngine, EngineConfig, EngineEvent, GateReason, Iteration};
pub use translator::TopicTranslator;
