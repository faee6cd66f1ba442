//! Client driver factory
//!
//! Client libraries are selected by string id (`bridge_log_driver`,
//! `bridge_queue_driver`) once at startup. Unrecognized configuration keys
//! are handed to the driver untouched.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::memory::{AckMode, MemoryLogClient, MemoryQueueClient};
use super::{EndpointError, LogClient, QueueClient};

/// Opaque client properties, passed through from the configuration file
pub type DriverProperties = HashMap<String, String>;

/// Property selecting the loopback queue's acknowledgment mode
pub const MEMORY_ACK_MODE: &str = "memory_ack_mode";

pub const LOG_DRIVERS: &[&str] = &["memory"];
pub const QUEUE_DRIVERS: &[&str] = &["memory"];

/// Open a log-bus client by driver id
pub fn open_log_client(
    driver: &str,
    props: &DriverProperties,
) -> Result<Arc<dyn LogClient>, EndpointError> {
    match driver {
        "memory" => {
            debug!(
                "Opening memory log bus driver ({} client properties)",
                props.len()
            );
            Ok(Arc::new(MemoryLogClient::new()))
        }
        other => Err(EndpointError::InvalidConfig(format!(
            "unknown log bus driver '{}' (available: {})",
            other,
            LOG_DRIVERS.join(", ")
        ))),
    }
}

/// Open a queue-bus client by driver id
pub fn open_queue_client(
    driver: &str,
    props: &DriverProperties,
) -> Result<Arc<dyn QueueClient>, EndpointError> {
    match driver {
        "memory" => {
            let ack_mode = match props.get(MEMORY_ACK_MODE) {
                Some(mode) => mode.parse::<AckMode>()?,
                None => AckMode::Auto,
            };
            debug!(
                "Opening memory queue bus driver (ack mode {:?}, {} client properties)",
                ack_mode,
                props.len()
            );
            Ok(Arc::new(MemoryQueueClient::new(ack_mode)))
        }
        other => Err(EndpointError::InvalidConfig(format!(
            "unknown queue bus driver '{}' (available: {})",
            other,
            QUEUE_DRIVERS.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_drivers_open() {
        let props = DriverProperties::new();
        assert!(open_log_client("memory", &props).is_ok());
        assert!(open_queue_client("memory", &props).is_ok());
    }

    #[test]
    fn test_unknown_driver() {
        let props = DriverProperties::new();
        let err = open_log_client("kafka", &props).err().unwrap();
        assert!(matches!(err, EndpointError::InvalidConfig(ref msg) if msg.contains("kafka")));
        assert!(open_queue_client("jcsmp", &props).is_err());
    }

    #[test]
    fn test_memory_ack_mode_property() {
        let mut props = DriverProperties::new();
        props.insert(MEMORY_ACK_MODE.to_string(), "Manual".to_string());
        assert!(open_queue_client("memory", &props).is_ok());

        props.insert(MEMORY_ACK_MODE.to_string(), "sometimes".to_string());
        assert!(open_queue_client("memory", &props).is_err());
    }
}
