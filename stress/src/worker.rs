//! Publish/subscribe worker
//!
//! A worker owns one broker connection and one topic. Its publish loop sends
//! one message per delay interval and hands each publish acknowledgment to a
//! tracked task, so a slow acknowledgment never delays the next send. Its
//! subscription callback reports every inbound message on the event bus.
//!
//! Lifecycle: `Created -> Connected -> Running -> Disconnected`. A worker whose
//! connect fails still runs; its publishes fail and are logged one by one.

use bytes::Bytes;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::broker::{BrokerConnection, BrokerError, BrokerUrl, MessageHandler, PublishAck};
use crate::events::EventSender;
use crate::payload::{PayloadMode, PayloadResolver};

/// Grace period for draining acknowledgments and closing the session
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// Settings for a single worker, derived from a [`WorkerTemplate`]
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Client identity, `<base-id>-<index>`
    pub id: String,
    pub username: String,
    pub password: String,
    pub url: BrokerUrl,
    pub message_delay: Duration,
    /// Topic published to and subscribed on, `<namespace>/<id>`
    pub topic: String,
    pub payload_mode: PayloadMode,
    pub payload: String,
}

/// Settings shared by every worker of a pool
#[derive(Debug, Clone)]
pub struct WorkerTemplate {
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub url: BrokerUrl,
    pub message_delay: Duration,
    pub namespace: String,
    pub payload_mode: PayloadMode,
    pub payload: String,
}

impl WorkerTemplate {
    /// Per-worker settings for the worker at `index`
    pub fn derive(&self, index: usize) -> WorkerConfig {
        let id = format!("{}-{}", self.client_id, index);
        WorkerConfig {
            topic: format!("{}/{}", self.namespace, id),
            id,
            username: self.username.clone(),
            password: self.password.clone(),
            url: self.url.clone(),
            message_delay: self.message_delay,
            payload_mode: self.payload_mode,
            payload: self.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Connected,
    Running,
    Disconnected,
}

/// Outcome of a finished publish loop
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub id: String,
    /// Publishes issued, acknowledged or not
    pub issued: u64,
    pub state: WorkerState,
}

pub struct Worker<C> {
    id: Arc<str>,
    config: WorkerConfig,
    connection: C,
    events: EventSender,
    resolver: PayloadResolver,
    state: WorkerState,
    disconnect_grace: Duration,
}

impl<C: BrokerConnection> Worker<C> {
    pub fn new(config: WorkerConfig, connection: C, events: EventSender) -> Self {
        Self {
            id: Arc::from(config.id.as_str()),
            resolver: PayloadResolver::new(config.payload_mode, config.payload.clone()),
            config,
            connection,
            events,
            state: WorkerState::Created,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
        }
    }

    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Establish the broker session. Failures are logged and leave the worker
    /// in `Created`.
    pub async fn connect(&mut self) -> Result<(), BrokerError> {
        match self.connection.connect().await {
            Ok(()) => {
                self.state = WorkerState::Connected;
                debug!(worker_id = %self.id, url = %self.config.url, "connected to broker");
                Ok(())
            }
            Err(e) => {
                counter!("mqtt_stress_connect_errors_total").increment(1);
                error!(
                    worker_id = %self.id,
                    url = %self.config.url,
                    error = %e,
                    "error connecting to broker"
                );
                Err(e)
            }
        }
    }

    /// Register the callback counting messages on this worker's topic
    pub async fn subscribe(&self) -> Result<(), BrokerError> {
        let events = self.events.clone();
        let handler: MessageHandler = Arc::new(move |_: &str, _: &[u8]| events.received());
        self.connection
            .subscribe(&self.config.topic, handler)
            .await
            .inspect_err(|e| {
                error!(
                    worker_id = %self.id,
                    topic = %self.config.topic,
                    error = %e,
                    "error subscribing to topic"
                );
            })
    }

    fn next_payload(&mut self) -> Bytes {
        match self.resolver.resolve() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    worker_id = %self.id,
                    mode = self.resolver.mode().name(),
                    template = self.resolver.template(),
                    error = %e,
                    "failed to resolve payload"
                );
                self.resolver.fallback()
            }
        }
    }

    /// Publish until `deadline` fires, then disconnect.
    ///
    /// The deadline is checked after each delay sleep, so the loop exits at
    /// most one delay interval after it fires, plus the disconnect grace.
    pub async fn run(mut self, deadline: CancellationToken) -> WorkerSummary {
        self.state = WorkerState::Running;
        let mut acks = JoinSet::new();
        let mut issued = 0u64;

        loop {
            let payload = self.next_payload();
            let ack = self.connection.publish(&self.config.topic, payload);
            issued += 1;
            acks.spawn(await_ack(ack, self.events.clone(), self.id.clone()));

            // Reap finished acknowledgments without waiting on pending ones
            while acks.try_join_next().is_some() {}

            tokio::time::sleep(self.config.message_delay).await;
            if deadline.is_cancelled() {
                break;
            }
        }

        if tokio::time::timeout(self.disconnect_grace, drain(&mut acks))
            .await
            .is_err()
        {
            warn!(
                worker_id = %self.id,
                pending = acks.len(),
                "abandoning unacknowledged publishes"
            );
            acks.abort_all();
        }

        if let Err(e) = self.connection.disconnect(self.disconnect_grace).await {
            warn!(worker_id = %self.id, error = %e, "error disconnecting from broker");
        }
        self.state = WorkerState::Disconnected;
        debug!(worker_id = %self.id, issued, "worker stopped");

        WorkerSummary {
            id: self.config.id,
            issued,
            state: self.state,
        }
    }
}

/// Report the outcome of one publish on the event bus or the log
async fn await_ack(ack: PublishAck, events: EventSender, worker_id: Arc<str>) {
    match ack.await {
        Ok(()) => events.published(),
        Err(e) => {
            counter!("mqtt_stress_publish_errors_total").increment(1);
            error!(worker_id = %worker_id, error = %e, "error publishing message");
        }
    }
}

async fn drain(acks: &mut JoinSet<()>) {
    while acks.join_next().await.is_some() {}
}
