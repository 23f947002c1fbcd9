//! Throughput statistics
//!
//! The [`Aggregator`] is the only writer of the cumulative counters. It drains
//! the event bus and publishes each new [`Totals`] value on a watch channel.
//! The [`Reporter`] samples that channel once per interval, derives the
//! per-second rates and logs a snapshot.

use metrics::{counter, gauge};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{EventReceiver, PoolEvent};

/// Interval between stats lines; rates are per this interval
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Cumulative counters owned by the aggregator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub sent: u64,
    pub received: u64,
}

/// Snapshot of pool throughput
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_sent: u64,
    pub total_received: u64,
    pub sent_per_second: u64,
    pub received_per_second: u64,
}

impl PoolStats {
    /// Stats for the window between two consecutive samples
    pub fn sample(previous: Totals, current: Totals) -> Self {
        Self {
            total_sent: current.sent,
            total_received: current.received,
            sent_per_second: current.sent.saturating_sub(previous.sent),
            received_per_second: current.received.saturating_sub(previous.received),
        }
    }

    /// Refresh the cumulative counters, keeping the last computed rates
    pub fn observe(&mut self, totals: Totals) {
        self.total_sent = totals.sent;
        self.total_received = totals.received;
    }
}

/// Single consumer of the event bus
pub struct Aggregator {
    events: EventReceiver,
    totals: Totals,
    snapshot: watch::Sender<Totals>,
}

impl Aggregator {
    pub fn new(events: EventReceiver) -> (Self, watch::Receiver<Totals>) {
        let (snapshot, rx) = watch::channel(Totals::default());
        (
            Self {
                events,
                totals: Totals::default(),
                snapshot,
            },
            rx,
        )
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    /// Fold one event into the counters
    pub fn apply(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::MessagePublished { count } => {
                self.totals.sent += count;
                counter!("mqtt_stress_messages_published_total").increment(count);
            }
            PoolEvent::MessageReceived { count } => {
                self.totals.received += count;
                counter!("mqtt_stress_messages_received_total").increment(count);
            }
        }
        self.snapshot.send_replace(self.totals);
    }

    /// Consume events until every sender is gone or `shutdown` fires.
    ///
    /// On shutdown, events already queued are still counted.
    pub async fn run(mut self, shutdown: CancellationToken) -> Totals {
        loop {
            tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => self.apply(event),
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    while let Ok(event) = self.events.try_recv() {
                        self.apply(event);
                    }
                    break;
                }
            }
        }
        let totals = self.totals();
        debug!(sent = totals.sent, received = totals.received, "aggregator stopped");
        totals
    }
}

/// Periodic stats logger
pub struct Reporter {
    totals: watch::Receiver<Totals>,
    worker_count: usize,
    interval: Duration,
    stats: PoolStats,
}

impl Reporter {
    pub fn new(totals: watch::Receiver<Totals>, worker_count: usize) -> Self {
        Self {
            totals,
            worker_count,
            interval: REPORT_INTERVAL,
            stats: PoolStats::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn log_snapshot(&self) {
        info!(
            total_workers = self.worker_count,
            total_messages_sent = self.stats.total_sent,
            total_messages_received = self.stats.total_received,
            messages_sent_second = self.stats.sent_per_second,
            messages_received_second = self.stats.received_per_second,
            "broker stats"
        );
    }

    /// Log a snapshot every interval until `deadline` fires.
    ///
    /// The deadline is polled once per tick, so the loop ends at most one
    /// interval after it fires.
    pub async fn run(mut self, deadline: CancellationToken) -> PoolStats {
        loop {
            let previous = *self.totals.borrow();
            if deadline.is_cancelled() {
                break;
            }
            self.stats.observe(previous);
            self.log_snapshot();

            tokio::time::sleep(self.interval).await;

            let current = *self.totals.borrow();
            self.stats = PoolStats::sample(previous, current);
            gauge!("mqtt_stress_sent_per_second").set(self.stats.sent_per_second as f64);
            gauge!("mqtt_stress_received_per_second").set(self.stats.received_per_second as f64);
        }

        self.stats.observe(*self.totals.borrow());
        info!(
            total_messages_sent = self.stats.total_sent,
            total_messages_received = self.stats.total_received,
            "finished"
        );
        self.stats
    }
}
