//! Log Bus Endpoint
//!
//! Poll-driven consumer plus fire-and-forget producer over a [`LogClient`].
//! Every record of a poll is handed to the listener synchronously, in arrival
//! order, and the whole batch is committed once afterwards. A listener
//! failure is logged and counted but never aborts the batch, so a crash
//! mid-batch means reprocessing on restart (at-least-once).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use super::{BusListener, ConnectionEvents, EndpointError, LogClient, Message, SendCompletion};
use crate::codec::Renderers;
use crate::metrics::Metrics;

/// Forwards client connectivity to the registered listener
struct ListenerEvents {
    listener: Arc<dyn BusListener<Message>>,
}

impl ConnectionEvents for ListenerEvents {
    fn on_connected(&self) {
        info!("Log bus: connected");
        self.listener.on_connected();
    }

    fn on_disconnected(&self) {
        warn!("Log bus: disconnected");
        self.listener.on_disconnected();
    }
}

/// Log bus endpoint
pub struct LogBus {
    client: Arc<dyn LogClient>,
    max_records: usize,
    renderers: Renderers,
    metrics: Arc<Metrics>,
    listener: RwLock<Option<Arc<dyn BusListener<Message>>>>,
    /// Records the listener failed on since startup
    failures: AtomicU64,
}

impl LogBus {
    pub fn new(
        client: Arc<dyn LogClient>,
        max_records: usize,
        renderers: Renderers,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            max_records,
            renderers,
            metrics,
            listener: RwLock::new(None),
            failures: AtomicU64::new(0),
        }
    }

    /// Subscribe to `topics`, delivering records to `listener`
    pub fn start(
        &self,
        topics: &[String],
        listener: Arc<dyn BusListener<Message>>,
    ) -> Result<(), EndpointError> {
        if topics.is_empty() {
            return Err(EndpointError::InvalidConfig(
                "no log bus topics to subscribe to".to_string(),
            ));
        }

        *self.listener.write() = Some(listener.clone());
        self.client
            .subscribe(topics, Arc::new(ListenerEvents { listener }))?;

        info!("Log bus: subscribed to {:?}", topics);
        Ok(())
    }

    /// Fetch one batch and hand it to the listener.
    ///
    /// Returns the number of records fetched; zero when `timeout` elapsed
    /// with nothing to consume.
    pub async fn poll(&self, timeout: Duration) -> Result<usize, EndpointError> {
        let listener = self
            .listener
            .read()
            .clone()
            .ok_or(EndpointError::NotStarted)?;

        let records = self.client.fetch(timeout, self.max_records).await?;
        self.metrics.polls_total.inc();
        if records.is_empty() {
            return Ok(0);
        }

        let count = records.len();
        trace!("Log bus: fetched {} records", count);

        for record in records {
            let topic = record.topic.clone();
            let key = record.key.clone();
            let (partition, offset) = (record.partition, record.offset);

            if let Err(e) = listener.on_message(record) {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Log bus: failed to forward record (topic={}, partition={:?}, offset={:?}, key={}): {}",
                    topic,
                    partition,
                    offset,
                    self.renderers.key.render_opt(key.as_deref()),
                    e
                );
            }
        }

        // One best-effort commit for the whole batch
        match self.client.commit_async() {
            Ok(()) => self.metrics.commits_total.inc(),
            Err(e) => warn!("Log bus: offset commit failed: {}", e),
        }

        Ok(count)
    }

    /// Produce a record; `completion` reports the broker's answer
    pub fn send(
        &self,
        topic: impl Into<String>,
        key: Option<Bytes>,
        value: Bytes,
        completion: SendCompletion,
    ) {
        let message = Message::new(topic, key, value);
        debug!(
            "Log bus: sending to '{}' (key={}, {} bytes)",
            message.topic,
            self.renderers.key.render_opt(message.key.as_deref()),
            message.value.len()
        );
        self.client.send(message, completion);
    }

    /// Upper bound on records handed over by one poll
    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Records the listener failed on since startup
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn renderers(&self) -> Renderers {
        self.renderers
    }
}
