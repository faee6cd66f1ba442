//! Bridge Integration Tests
//!
//! Runs the full bridge over the in-memory drivers: configuration parsing,
//! endpoint wiring, the control loop and both forwarding directions.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use config::FileFormat;
use pretty_assertions::assert_eq;
use tokio::sync::watch;
use tokio::time::timeout;

use busbridge::bridge::{BridgeEngine, EngineConfig, TopicTranslator};
use busbridge::codec::Renderers;
use busbridge::config::{BridgeSettings, Config};
use busbridge::endpoint::memory::{AckMode, MemoryLogClient, MemoryQueueClient};
use busbridge::endpoint::{LogBus, QueueBus, QueueBusConfig, KEY_HEADER};
use busbridge::metrics::Direction;
use busbridge::Metrics;

const PROPERTIES: &str = r#"
sol_bridge_queue=BRIDGE.Q
kaf_bridge_topics=orders,payments
bridge_kafka_sol_topic_trans=orders:ORD/Q,payments:PAY\:Q
bridge_sol_kafka_topic_trans=replies:order-replies
bridge_pool_capacity=8
bridge_poll_max_records=4
bridge_poll_timeout=20ms
bridge_idle_backoff=5ms
"#;

struct Bridge {
    log: Arc<MemoryLogClient>,
    queue: Arc<MemoryQueueClient>,
    metrics: Arc<Metrics>,
    queue_bus: Arc<QueueBus>,
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

fn start_bridge(config: &Config, ack_mode: AckMode) -> Bridge {
    let settings = BridgeSettings::resolve(config, None, &[]).unwrap();
    let renderers =
        Renderers::resolve(&config.bridge_key_codec, &config.bridge_value_codec).unwrap();
    let metrics = Arc::new(Metrics::new());
    let log = Arc::new(MemoryLogClient::new());
    let queue = Arc::new(MemoryQueueClient::new(ack_mode));

    let log_bus = Arc::new(LogBus::new(
        log.clone(),
        config.bridge_poll_max_records,
        renderers,
        metrics.clone(),
    ));
    let queue_bus = Arc::new(QueueBus::new(
        queue.clone(),
        QueueBusConfig {
            pool_capacity: config.bridge_pool_capacity,
            prefill: config.bridge_pool_prefill,
            send_attempts: config.bridge_send_attempts,
            renderers,
        },
        metrics.clone(),
    ));

    let mut engine = BridgeEngine::new(
        log_bus,
        queue_bus.clone(),
        TopicTranslator::from_pairs(config.bridge_kafka_sol_topic_trans.clone()),
        TopicTranslator::from_pairs(config.bridge_sol_kafka_topic_trans.clone()),
        EngineConfig {
            poll_timeout: config.bridge_poll_timeout,
            idle_backoff: config.bridge_idle_backoff,
        },
        metrics.clone(),
    );
    engine.start(&settings.queue, &settings.topics).unwrap();

    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { engine.run(rx).await });

    Bridge {
        log,
        queue,
        metrics,
        queue_bus,
        shutdown,
        handle,
    }
}

impl Bridge {
    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("bridge did not stop")
            .unwrap();
    }
}

/// Poll `check` until it holds or two seconds pass
async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_bidirectional_bridge() {
    let config = Config::parse(PROPERTIES, FileFormat::Ini).unwrap();
    let bridge = start_bridge(&config, AckMode::Auto);

    bridge.log.inject("orders", Some(Bytes::from_static(b"o-1")), Bytes::from_static(b"{\"qty\":1}"));
    bridge.log.inject("payments", None, Bytes::from_static(b"paid"));
    bridge.log.inject("orders", Some(Bytes::from_static(b"o-2")), Bytes::from_static(b"{\"qty\":2}"));

    let queue = bridge.queue.clone();
    eventually(|| queue.published().len() == 3).await;

    let published = bridge.queue.published();
    let destinations: Vec<&str> = published.iter().map(|m| &*m.destination).collect();
    assert_eq!(destinations, vec!["ORD/Q", "PAY:Q", "ORD/Q"]);
    assert_eq!(
        published[2].headers.get(KEY_HEADER),
        Some(&Bytes::from_static(b"o-2"))
    );

    // Auto acks drain the in-flight pool
    let pool = bridge.queue_bus.pool().clone();
    eventually(|| pool.in_flight() == 0).await;

    let delivery = bridge.queue.inject(
        "replies",
        Some(Bytes::from_static(b"o-1")),
        Bytes::from_static(b"shipped"),
    );
    let (log, queue) = (bridge.log.clone(), bridge.queue.clone());
    eventually(|| !queue.acked_deliveries().is_empty()).await;

    let produced = log.produced();
    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].topic, "order-replies");
    assert_eq!(produced[0].value, Bytes::from_static(b"shipped"));
    assert_eq!(queue.acked_deliveries(), vec![delivery]);

    assert_eq!(bridge.metrics.forwarded_count(Direction::LogToQueue), 3);
    assert_eq!(bridge.metrics.forwarded_count(Direction::QueueToLog), 1);
    assert_eq!(bridge.metrics.ack_alarm_count(), 0);

    bridge.stop().await;
}

#[tokio::test]
async fn test_backlog_larger_than_pool_is_fully_forwarded() {
    let config = Config::parse(PROPERTIES, FileFormat::Ini).unwrap();
    let bridge = start_bridge(&config, AckMode::Manual);

    for i in 0..20u32 {
        bridge
            .log
            .inject("orders", None, Bytes::from(i.to_string()));
    }

    // Without acks the bridge stops at the pool capacity
    let queue = bridge.queue.clone();
    eventually(|| queue.published().len() == 8).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bridge.queue.published().len(), 8);
    assert_eq!(bridge.queue_bus.pool().in_flight(), 8);

    // Acking lets the rest through, in order
    let q = bridge.queue.clone();
    eventually(|| {
        while q.ack_next().is_some() {}
        q.published().len() == 20
    })
    .await;
    while bridge.queue.ack_next().is_some() {}

    let payloads: Vec<Bytes> = bridge
        .queue
        .published()
        .iter()
        .map(|m| m.payload.clone())
        .collect();
    let expected: Vec<Bytes> = (0..20u32).map(|i| Bytes::from(i.to_string())).collect();
    assert_eq!(payloads, expected);
    assert_eq!(bridge.queue_bus.pool().in_flight(), 0);
    assert_eq!(bridge.metrics.ack_alarm_count(), 0);

    bridge.stop().await;
}

#[tokio::test]
async fn test_polling_pauses_while_queue_inactive() {
    let config = Config::parse(PROPERTIES, FileFormat::Ini).unwrap();
    let bridge = start_bridge(&config, AckMode::Auto);

    bridge.queue.set_active(false);
    // Lets an in-progress poll finish
    tokio::time::sleep(Duration::from_millis(80)).await;
    let fetches = bridge.log.fetch_count();

    bridge.log.inject("orders", None, Bytes::from_static(b"held"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(bridge.queue.published().is_empty());
    assert_eq!(bridge.log.fetch_count(), fetches);

    bridge.queue.set_active(true);
    let queue = bridge.queue.clone();
    eventually(|| queue.published().len() == 1).await;

    bridge.stop().await;
}
