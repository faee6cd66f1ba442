//! Periodic Diagnostics
//!
//! Refreshes the pool gauges and logs a one-line summary of bridge traffic
//! on a fixed interval, so a stuck pool or a run of ack alarms shows up in
//! the log without a metrics scraper attached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::endpoint::QueueBus;
use crate::metrics::{Direction, Metrics};
use crate::pool::PoolStats;

/// Point-in-time view of bridge health
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub uptime: Duration,
    pub pool: PoolStats,
    pub log_to_queue: u64,
    pub queue_to_log: u64,
    pub failed: u64,
    pub dropped: u64,
    pub ack_alarms: u64,
}

pub struct Diagnostics {
    queue: Arc<QueueBus>,
    metrics: Arc<Metrics>,
    start_time: Instant,
}

impl Diagnostics {
    pub fn new(queue: Arc<QueueBus>, metrics: Arc<Metrics>) -> Self {
        Self {
            queue,
            metrics,
            start_time: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let m = &self.metrics;
        Snapshot {
            uptime: self.start_time.elapsed(),
            pool: self.queue.pool_stats(),
            log_to_queue: m.forwarded_count(Direction::LogToQueue),
            queue_to_log: m.forwarded_count(Direction::QueueToLog),
            failed: m.failed_count(Direction::LogToQueue) + m.failed_count(Direction::QueueToLog),
            dropped: m.dropped_count(Direction::LogToQueue),
            ack_alarms: m.ack_alarm_count(),
        }
    }

    /// Refresh the pool gauges and log the summary
    pub fn record(&self) -> Snapshot {
        let snapshot = self.snapshot();
        self.metrics.update_pool_stats(&snapshot.pool);

        info!(
            "Bridge stats: forwarded log->queue={} queue->log={}, failed={}, dropped={}, ack alarms={}, pool in-flight={}/{} (allocated {})",
            snapshot.log_to_queue,
            snapshot.queue_to_log,
            snapshot.failed,
            snapshot.dropped,
            snapshot.ack_alarms,
            snapshot.pool.in_flight,
            snapshot.pool.capacity,
            snapshot.pool.allocated
        );
        if snapshot.pool.in_flight == snapshot.pool.capacity {
            warn!("Bridge stats: in-flight pool is full, log polling is held back");
        }
        snapshot
    }
}

/// Spawn the periodic reporting task
pub fn spawn_diagnostics_task(
    diagnostics: Diagnostics,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    diagnostics.record();
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Diagnostics task shutting down");
                        break;
                    }
                }
            }
        }
    })
}
