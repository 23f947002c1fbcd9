//! MQTT connection backed by rumqttc
//!
//! Publishes are QoS 0. The acknowledgment of a publish is the event loop
//! accepting the packet for transmission; inbound messages are pushed to the
//! registered handler from a background task driving the event loop.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{BrokerConnection, BrokerError, Connector, MessageHandler, PublishAck, Scheme};
use crate::worker::WorkerConfig;

/// Bound of the request queue between the client handle and its event loop
const REQUEST_CAPACITY: usize = 100;

/// Upper bound on waiting for the broker's CONNACK
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Opens one rumqttc connection per worker, using the worker's broker URL
#[derive(Debug, Clone, Default)]
pub struct MqttConnector;

impl MqttConnector {
    pub fn new() -> Self {
        Self
    }

    fn options(config: &WorkerConfig) -> MqttOptions {
        let url = &config.url;
        let host = if url.scheme.is_websocket() {
            url.as_str().to_string()
        } else {
            url.host.clone()
        };

        let mut options = MqttOptions::new(config.id.clone(), host, url.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if !config.username.is_empty() || !config.password.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        match url.scheme {
            Scheme::Tcp => {}
            Scheme::Tls => {
                options.set_transport(Transport::tls_with_default_config());
            }
            Scheme::Ws => {
                options.set_transport(Transport::Ws);
            }
            Scheme::Wss => {
                options.set_transport(Transport::wss_with_default_config());
            }
        }
        options
    }
}

impl Connector for MqttConnector {
    type Connection = MqttConnection;

    fn open(&self, config: &WorkerConfig) -> MqttConnection {
        let (client, eventloop) = AsyncClient::new(Self::options(config), REQUEST_CAPACITY);
        MqttConnection {
            client_id: config.id.clone(),
            client,
            eventloop: Mutex::new(Some(eventloop)),
            driver: Mutex::new(None),
            handlers: Arc::new(DashMap::new()),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// A single MQTT client session
pub struct MqttConnection {
    client_id: String,
    client: AsyncClient,
    /// Taken by `connect`; a connection gets one attempt
    eventloop: Mutex<Option<EventLoop>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    handlers: Arc<DashMap<String, MessageHandler>>,
    connected: Arc<AtomicBool>,
}

impl MqttConnection {
    async fn await_connack(eventloop: &mut EventLoop) -> Result<(), BrokerError> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(BrokerError::Connect(format!("broker refused: {:?}", ack.code)))
                    };
                }
                Ok(_) => {}
                Err(e) => return Err(BrokerError::Connect(e.to_string())),
            }
        }
    }

    /// Drive the event loop until the session ends, dispatching inbound publishes
    async fn drive(
        client_id: String,
        mut eventloop: EventLoop,
        handlers: Arc<DashMap<String, MessageHandler>>,
        connected: Arc<AtomicBool>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let handler = handlers.get(&publish.topic).map(|h| h.value().clone());
                    if let Some(handler) = handler {
                        handler(publish.topic.as_str(), &publish.payload[..]);
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!(client_id = %client_id, "disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if connected.load(Ordering::Acquire) {
                        warn!(client_id = %client_id, error = %e, "broker connection lost");
                    }
                    break;
                }
            }
        }
        connected.store(false, Ordering::Release);
    }
}

#[async_trait]
impl BrokerConnection for MqttConnection {
    async fn connect(&self) -> Result<(), BrokerError> {
        let mut eventloop = self
            .eventloop
            .lock()
            .await
            .take()
            .ok_or_else(|| BrokerError::Connect("connection already attempted".to_string()))?;

        tokio::time::timeout(CONNECT_TIMEOUT, Self::await_connack(&mut eventloop))
            .await
            .map_err(|_| BrokerError::Connect("timed out waiting for CONNACK".to_string()))??;

        self.connected.store(true, Ordering::Release);
        let driver = tokio::spawn(Self::drive(
            self.client_id.clone(),
            eventloop,
            self.handlers.clone(),
            self.connected.clone(),
        ));
        *self.driver.lock().await = Some(driver);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }
        self.handlers.insert(topic.to_string(), handler);
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))
    }

    fn publish(&self, topic: &str, payload: Bytes) -> PublishAck {
        let client = self.client.clone();
        let connected = self.connected.clone();
        let topic = topic.to_string();
        Box::pin(async move {
            if !connected.load(Ordering::Acquire) {
                return Err(BrokerError::NotConnected);
            }
            client
                .publish_bytes(topic, QoS::AtMostOnce, false, payload)
                .await
                .map_err(|e| BrokerError::Publish(e.to_string()))
        })
    }

    async fn disconnect(&self, grace: Duration) -> Result<(), BrokerError> {
        let driver = self.driver.lock().await.take();
        let Some(mut driver) = driver else {
            return Ok(());
        };

        let requested = match tokio::time::timeout(grace, self.client.disconnect()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BrokerError::Disconnect(e.to_string())),
            Err(_) => Err(BrokerError::Disconnect(
                "timed out queueing disconnect".to_string(),
            )),
        };

        if tokio::time::timeout(grace, &mut driver).await.is_err() {
            driver.abort();
        }
        self.connected.store(false, Ordering::Release);
        requested
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::worker_config;

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        let connector = MqttConnector::new();
        let connection = connector.open(&worker_config(0));
        assert!(!connection.is_connected());

        let ack = connection.publish("stress/t", Bytes::from_static(b"x"));
        assert!(matches!(ack.await, Err(BrokerError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_noop() {
        let connector = MqttConnector::new();
        let connection = connector.open(&worker_config(0));
        assert!(connection.disconnect(Duration::from_millis(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_fails() {
        let connector = MqttConnector::new();
        let connection = connector.open(&worker_config(0));
        let handler: MessageHandler = Arc::new(|_: &str, _: &[u8]| {});
        assert!(matches!(
            connection.subscribe("stress/t", handler).await,
            Err(BrokerError::NotConnected)
        ));
    }

    #[tokio::test]
    #[ignore = "requires running broker"]
    async fn test_connect_publish_roundtrip() {
        let connector = MqttConnector::new();
        let connection = connector.open(&worker_config(0));
        connection.connect().await.expect("broker should accept connection");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handler: MessageHandler = Arc::new(move |_: &str, payload: &[u8]| {
            let _ = tx.send(payload.to_vec());
        });
        connection
            .subscribe("stress/mqtt-stress-worker-0", handler)
            .await
            .unwrap();
        connection
            .publish("stress/mqtt-stress-worker-0", Bytes::from_static(b"ping"))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("message should arrive");
        assert_eq!(received.as_deref(), Some(&b"ping"[..]));
        connection.disconnect(Duration::from_millis(250)).await.unwrap();
    }
}
