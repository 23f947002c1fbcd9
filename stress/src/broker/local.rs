//! In-process broker
//!
//! Routes publishes to handlers subscribed on the same exact topic without any
//! network I/O. Used to exercise the worker pool in tests and when embedding the
//! pool without a real broker. Connect failures, publish failures and slow
//! acknowledgments can be injected per client id.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::{BrokerConnection, BrokerError, Connector, MessageHandler, PublishAck};
use crate::worker::WorkerConfig;

#[derive(Default)]
struct BrokerInner {
    subscriptions: DashMap<String, Vec<MessageHandler>>,
    history: DashMap<String, Vec<Bytes>>,
    rejected_clients: DashSet<String>,
    failing_clients: DashSet<String>,
    ack_delays: DashMap<String, Duration>,
    delivered: AtomicU64,
}

/// Shared in-memory broker; clones refer to the same broker
#[derive(Clone, Default)]
pub struct LocalBroker {
    inner: Arc<BrokerInner>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose connections attach to this broker
    pub fn connector(&self) -> LocalConnector {
        LocalConnector {
            broker: self.clone(),
        }
    }

    /// Refuse connections from `client_id`
    pub fn reject_client(&self, client_id: impl Into<String>) {
        self.inner.rejected_clients.insert(client_id.into());
    }

    /// Fail every publish issued by `client_id`
    pub fn fail_publishes_from(&self, client_id: impl Into<String>) {
        self.inner.failing_clients.insert(client_id.into());
    }

    /// Hold every publish from `client_id` for `delay` before accepting it
    pub fn delay_acks_from(&self, client_id: impl Into<String>, delay: Duration) {
        self.inner.ack_delays.insert(client_id.into(), delay);
    }

    /// Payloads accepted on `topic`, in arrival order
    pub fn messages(&self, topic: &str) -> Vec<Bytes> {
        self.inner
            .history
            .get(topic)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    /// Total publishes accepted across all topics
    pub fn published_count(&self) -> usize {
        self.inner.history.iter().map(|e| e.value().len()).sum()
    }

    /// Total handler invocations across all topics
    pub fn delivered_count(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    fn route(&self, topic: &str, payload: Bytes) {
        // Clone handlers out so none run while a map shard is locked
        let handlers: Vec<MessageHandler> = self
            .inner
            .subscriptions
            .get(topic)
            .map(|h| h.value().clone())
            .unwrap_or_default();

        self.inner
            .history
            .entry(topic.to_string())
            .or_default()
            .push(payload.clone());

        for handler in handlers {
            handler(topic, &payload[..]);
            self.inner.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Opens [`LocalConnection`]s against a [`LocalBroker`]
#[derive(Clone)]
pub struct LocalConnector {
    broker: LocalBroker,
}

impl Connector for LocalConnector {
    type Connection = LocalConnection;

    fn open(&self, config: &WorkerConfig) -> LocalConnection {
        LocalConnection {
            client_id: config.id.clone(),
            broker: self.broker.clone(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// One client session on a [`LocalBroker`]
pub struct LocalConnection {
    client_id: String,
    broker: LocalBroker,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for LocalConnection {
    async fn connect(&self) -> Result<(), BrokerError> {
        if self.broker.inner.rejected_clients.contains(&self.client_id) {
            return Err(BrokerError::Connect(format!(
                "client {} rejected",
                self.client_id
            )));
        }
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        self.broker
            .inner
            .subscriptions
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Bytes) -> PublishAck {
        let broker = self.broker.clone();
        let connected = self.connected.clone();
        let failing = broker.inner.failing_clients.contains(&self.client_id);
        let delay = broker.inner.ack_delays.get(&self.client_id).map(|d| *d.value());
        let topic = topic.to_string();
        Box::pin(async move {
            if !connected.load(Ordering::Acquire) {
                return Err(BrokerError::NotConnected);
            }
            if failing {
                return Err(BrokerError::Publish("publish rejected by broker".to_string()));
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            broker.route(&topic, payload);
            Ok(())
        })
    }

    async fn disconnect(&self, _grace: Duration) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
