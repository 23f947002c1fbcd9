//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules.

#![allow(dead_code)]

use clap::Parser;
use mqtt_stress::config::{Args, Config};
use mqtt_stress::{BrokerUrl, PayloadMode, WorkerTemplate};
use std::time::Duration;

/// Broker used by the ignored end-to-end tests, overridable for CI
pub fn live_broker_url() -> String {
    std::env::var("MQTT_STRESS_TEST_URL").unwrap_or_else(|_| "tcp://127.0.0.1:1883".to_string())
}

/// Build a validated config from command-line style arguments
pub fn config_from(argv: &[&str]) -> Config {
    let mut full = vec!["mqtt-stress"];
    full.extend_from_slice(argv);
    let args = Args::try_parse_from(full).expect("arguments should parse");
    Config::from_args(args).expect("configuration should be valid")
}

/// Template for `client_id` with the given delay and payload
pub fn template(client_id: &str, delay: Duration, mode: PayloadMode, payload: &str) -> WorkerTemplate {
    WorkerTemplate {
        client_id: client_id.to_string(),
        username: String::new(),
        password: String::new(),
        url: BrokerUrl::parse("tcp://127.0.0.1:1883").expect("fixture url should parse"),
        message_delay: delay,
        namespace: "stress".to_string(),
        payload_mode: mode,
        payload: payload.to_string(),
    }
}

/// Unique client id so concurrent runs against a shared broker do not collide
pub fn unique_client_id(prefix: &str) -> String {
    format!("{}-{}", prefix, &uuid::Uuid::new_v4().to_string()[..8])
}

/// Initialize test logging with detailed output
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mqtt_stress=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
