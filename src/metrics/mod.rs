//! Prometheus metrics for busbridge
//!
//! Exposes forwarding, acknowledgment and pool occupancy metrics at the
//! /metrics endpoint. The ack alarm counter is the one to alert on: it only
//! moves when the queue broker acknowledged out of publish order.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::pool::PoolStats;

mod server;

pub use server::MetricsServer;

/// Forwarding direction label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Log bus to queue bus
    LogToQueue,
    /// Queue bus to log bus
    QueueToLog,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::LogToQueue => "log_to_queue",
            Direction::QueueToLog => "queue_to_log",
        }
    }
}

/// All busbridge metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Forwarding metrics (by direction)
    pub messages_forwarded: IntCounterVec,
    pub messages_failed: IntCounterVec,
    pub messages_dropped: IntCounterVec,

    // Queue acknowledgment metrics
    pub acks_total: IntCounter,
    pub ack_alarms: IntCounterVec,
    pub ack_rejections: IntCounter,
    pub publish_retries: IntCounter,

    // Log bus metrics
    pub polls_total: IntCounter,
    pub commits_total: IntCounter,
    pub backpressure_gated: IntCounterVec,

    // Pool metrics
    pub pool_capacity: IntGauge,
    pub pool_in_flight: IntGauge,
    pub pool_free: IntGauge,
    pub pool_allocated: IntGauge,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).expect("static metric opts")
}

fn counter_vec(name: &str, help: &str, label: &str) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), &[label]).expect("static metric opts")
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(name, help)).expect("static metric opts")
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let messages_forwarded = counter_vec(
            "busbridge_messages_forwarded_total",
            "Messages handed to the destination bus, by direction",
            "direction",
        );
        let messages_failed = counter_vec(
            "busbridge_messages_failed_total",
            "Messages the destination bus refused, by direction",
            "direction",
        );
        let messages_dropped = counter_vec(
            "busbridge_messages_dropped_total",
            "Messages given up after exhausting local resends, by direction",
            "direction",
        );

        let acks_total = counter(
            "busbridge_acks_total",
            "Queue publish acknowledgments received",
        );
        let ack_alarms = counter_vec(
            "busbridge_ack_alarms_total",
            "Acknowledgments that did not match the oldest in-flight message",
            "kind",
        );
        let ack_rejections = counter(
            "busbridge_ack_rejections_total",
            "Queue publishes rejected by the broker",
        );
        let publish_retries = counter(
            "busbridge_publish_retries_total",
            "Local queue publish attempts beyond the first",
        );

        let polls_total = counter("busbridge_polls_total", "Log bus polls issued");
        let commits_total = counter(
            "busbridge_commits_total",
            "Batch offset commits requested from the log bus",
        );
        let backpressure_gated = counter_vec(
            "busbridge_backpressure_gated_total",
            "Loop iterations that skipped polling, by reason",
            "reason",
        );

        let pool_capacity = gauge("busbridge_pool_capacity", "In-flight pool capacity");
        let pool_in_flight = gauge(
            "busbridge_pool_in_flight",
            "Queue messages awaiting broker acknowledgment",
        );
        let pool_free = gauge("busbridge_pool_free", "Pool entries ready for reuse");
        let pool_allocated = gauge(
            "busbridge_pool_allocated",
            "Pool entries allocated since startup",
        );

        // Register all metrics
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(messages_forwarded.clone()),
            Box::new(messages_failed.clone()),
            Box::new(messages_dropped.clone()),
            Box::new(acks_total.clone()),
            Box::new(ack_alarms.clone()),
            Box::new(ack_rejections.clone()),
            Box::new(publish_retries.clone()),
            Box::new(polls_total.clone()),
            Box::new(commits_total.clone()),
            Box::new(backpressure_gated.clone()),
            Box::new(pool_capacity.clone()),
            Box::new(pool_in_flight.clone()),
            Box::new(pool_free.clone()),
            Box::new(pool_allocated.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        Metrics {
            registry,
            messages_forwarded,
            messages_failed,
            messages_dropped,
            acks_total,
            ack_alarms,
            ack_rejections,
            publish_retries,
            polls_total,
            commits_total,
            backpressure_gated,
            pool_capacity,
            pool_in_flight,
            pool_free,
            pool_allocated,
        }
    }

    // Helper methods for common operations

    pub fn forwarded(&self, direction: Direction) {
        self.messages_forwarded
            .with_label_values(&[direction.as_str()])
            .inc();
    }

    pub fn failed(&self, direction: Direction) {
        self.messages_failed
            .with_label_values(&[direction.as_str()])
            .inc();
    }

    pub fn dropped(&self, direction: Direction) {
        self.messages_dropped
            .with_label_values(&[direction.as_str()])
            .inc();
    }

    pub fn ack_alarm(&self, kind: &str) {
        self.ack_alarms.with_label_values(&[kind]).inc();
    }

    pub fn gated(&self, reason: &str) {
        self.backpressure_gated.with_label_values(&[reason]).inc();
    }

    pub fn forwarded_count(&self, direction: Direction) -> u64 {
        self.messages_forwarded
            .with_label_values(&[direction.as_str()])
            .get()
    }

    pub fn failed_count(&self, direction: Direction) -> u64 {
        self.messages_failed
            .with_label_values(&[direction.as_str()])
            .get()
    }

    pub fn dropped_count(&self, direction: Direction) -> u64 {
        self.messages_dropped
            .with_label_values(&[direction.as_str()])
            .get()
    }

    pub fn ack_alarm_count(&self) -> u64 {
        ["skipped", "duplicate", "unexpected"]
            .iter()
            .map(|kind| self.ack_alarms.with_label_values(&[kind]).get())
            .sum()
    }

    pub fn update_pool_stats(&self, stats: &PoolStats) {
        self.pool_capacity.set(stats.capacity as i64);
        self.pool_in_flight.set(stats.in_flight as i64);
        self.pool_free.set(stats.free as i64);
        self.pool_allocated.set(stats.allocated as i64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
