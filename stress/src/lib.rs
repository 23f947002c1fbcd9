//! mqtt-stress library
//!
//! A pool of MQTT workers that publish to and subscribe on their own topic at
//! a fixed rate, with once-per-second throughput reporting. The binary wires
//! these pieces to command-line configuration; integration tests drive them
//! directly against the in-process broker.

pub mod broker;
pub mod config;
pub mod events;
pub mod payload;
pub mod pool;
pub mod stats;
pub mod worker;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use broker::{BrokerConnection, BrokerError, BrokerUrl, Connector, LocalBroker, MqttConnector};
pub use config::{Args, Config, ConfigError};
pub use payload::{PayloadMode, PayloadResolver};
pub use pool::{PoolReport, PoolSupervisor, RunDeadline};
pub use stats::{PoolStats, Totals};
pub use worker::{WorkerConfig, WorkerTemplate};
