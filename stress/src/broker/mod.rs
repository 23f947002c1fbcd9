//! Broker connection capability
//!
//! This module provides:
//! - `BrokerConnection` trait: connect, subscribe, publish, disconnect
//! - `Connector` trait for opening one connection per worker
//! - `MqttConnector` backed by rumqttc
//! - `LocalBroker` for in-process runs and tests

mod address;
mod local;
mod mqtt;

pub use address::{BrokerUrl, Scheme};
pub use local::{LocalBroker, LocalConnection, LocalConnector};
pub use mqtt::{MqttConnection, MqttConnector};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::worker::WorkerConfig;

/// Errors reported by a broker connection
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("not connected to broker")]
    NotConnected,

    #[error("failed to publish message: {0}")]
    Publish(String),

    #[error("failed to subscribe: {0}")]
    Subscribe(String),

    #[error("failed to disconnect: {0}")]
    Disconnect(String),

    #[error("invalid broker url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported broker scheme: {0}")]
    UnsupportedScheme(String),
}

/// Callback invoked once per inbound message with its topic and payload.
///
/// Runs on the connection's dispatch path and must not block.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Delivery acknowledgment for one publish, awaited off the send path
pub type PublishAck = BoxFuture<'static, Result<(), BrokerError>>;

/// One client connection to a publish/subscribe broker
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// Establish the session with the broker
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Register `handler` for messages arriving on `topic`
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BrokerError>;

    /// Issue a publish; the returned future resolves once delivery is acknowledged
    fn publish(&self, topic: &str, payload: Bytes) -> PublishAck;

    /// Close the session, waiting at most `grace` for it to wind down
    async fn disconnect(&self, grace: Duration) -> Result<(), BrokerError>;

    /// Whether the session is currently established
    fn is_connected(&self) -> bool;
}

/// Factory for per-worker connections
pub trait Connector: Send + Sync + 'static {
    type Connection: BrokerConnection;

    /// Build a connection for `config` without connecting it
    fn open(&self, config: &WorkerConfig) -> Self::Connection;
}
