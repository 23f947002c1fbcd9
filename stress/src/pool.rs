//! Worker pool supervisor
//!
//! Builds the configured number of workers on one event bus, starts the
//! aggregator and reporter, and blocks until the run deadline has fired and
//! every worker has shut down.

use serde::Serialize;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::broker::Connector;
use crate::events::event_bus;
use crate::stats::{Aggregator, PoolStats, REPORT_INTERVAL, Reporter, Totals};
use crate::worker::{DEFAULT_DISCONNECT_GRACE, Worker, WorkerTemplate};

/// Cancellation signal for one run: fires once `duration` has elapsed or the
/// parent token is cancelled, and stays fired.
pub struct RunDeadline {
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl RunDeadline {
    pub fn after(duration: Duration, parent: &CancellationToken) -> Self {
        let token = parent.child_token();
        let expire = token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            expire.cancel();
        });
        Self { token, timer }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for RunDeadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Result of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub workers: usize,
    /// Workers whose broker connection was established
    pub connected: usize,
    /// Workers whose subscription was registered
    pub subscribed: usize,
    pub totals: Totals,
    /// Last stats snapshot taken by the reporter
    pub last_stats: PoolStats,
    /// Publishes issued by all workers, acknowledged or not
    pub issued: u64,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

pub struct PoolSupervisor<K> {
    template: WorkerTemplate,
    worker_count: usize,
    connector: K,
    disconnect_grace: Duration,
    report_interval: Duration,
}

impl<K: Connector> PoolSupervisor<K> {
    pub fn new(template: WorkerTemplate, worker_count: usize, connector: K) -> Self {
        Self {
            template,
            worker_count,
            connector,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            report_interval: REPORT_INTERVAL,
        }
    }

    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Run the pool for `run_for`, or until `cancel` fires.
    ///
    /// Returns once the reporter has observed the deadline, every publish
    /// loop has disconnected, and the aggregator has drained the bus.
    pub async fn run(self, run_for: Duration, cancel: CancellationToken) -> PoolReport {
        let started = Instant::now();
        let deadline = RunDeadline::after(run_for, &cancel);

        let (events, rx) = event_bus();
        let (aggregator, snapshot) = Aggregator::new(rx);
        let aggregator_shutdown = CancellationToken::new();
        let aggregator = tokio::spawn(aggregator.run(aggregator_shutdown.clone()));

        let mut workers = JoinSet::new();
        let mut connected = 0;
        let mut subscribed = 0;
        for index in 0..self.worker_count {
            let config = self.template.derive(index);
            let connection = self.connector.open(&config);
            let mut worker = Worker::new(config, connection, events.clone())
                .with_disconnect_grace(self.disconnect_grace);

            if worker.connect().await.is_ok() {
                connected += 1;
            }
            // Register before the first publish so the worker's own first message is counted.
            // A failed subscription is logged by the worker, which keeps publishing.
            if worker.subscribe().await.is_ok() {
                subscribed += 1;
            }
            debug!(worker_id = worker.id(), topic = worker.topic(), "starting worker");
            workers.spawn(worker.run(deadline.token()));
        }
        drop(events);

        info!(
            workers = self.worker_count,
            connected,
            subscribed,
            "worker pool started"
        );

        let reporter = Reporter::new(snapshot, self.worker_count).with_interval(self.report_interval);
        let last_stats = reporter.run(deadline.token()).await;

        let mut issued = 0;
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(summary) => {
                    debug!(
                        worker_id = %summary.id,
                        issued = summary.issued,
                        state = ?summary.state,
                        "worker finished"
                    );
                    issued += summary.issued;
                }
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }

        // Subscription handlers may outlive their workers inside the broker
        // client, so the bus is closed explicitly rather than by sender drop.
        aggregator_shutdown.cancel();
        let totals = match aggregator.await {
            Ok(totals) => totals,
            Err(e) => {
                error!(error = %e, "aggregator task failed");
                Totals::default()
            }
        };

        PoolReport {
            workers: self.worker_count,
            connected,
            subscribed,
            totals,
            last_stats,
            issued,
            elapsed: started.elapsed(),
        }
    }
}
