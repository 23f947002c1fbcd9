//! Test Utilities Module
//!
//! Fixtures shared by the unit tests. Only compiled when running tests.

#![cfg(test)]

use std::time::Duration;

use crate::broker::BrokerUrl;
use crate::payload::{DEFAULT_PAYLOAD, PayloadMode};
use crate::worker::{WorkerConfig, WorkerTemplate};

/// Address used by fixtures; nothing is expected to listen there
pub const TEST_BROKER_URL: &str = "tcp://127.0.0.1:1883";

/// Template matching the command-line defaults, with a 100ms delay
pub fn worker_template() -> WorkerTemplate {
    WorkerTemplate {
        client_id: "mqtt-stress-worker".to_string(),
        username: String::new(),
        password: String::new(),
        url: BrokerUrl::parse(TEST_BROKER_URL).expect("fixture url should parse"),
        message_delay: Duration::from_millis(100),
        namespace: "stress".to_string(),
        payload_mode: PayloadMode::Static,
        payload: DEFAULT_PAYLOAD.to_string(),
    }
}

/// Settings of worker `index` derived from [`worker_template`]
pub fn worker_config(index: usize) -> WorkerConfig {
    worker_template().derive(index)
}

/// Template with a different payload strategy
pub fn worker_template_with_payload(mode: PayloadMode, payload: &str) -> WorkerTemplate {
    WorkerTemplate {
        payload_mode: mode,
        payload: payload.to_string(),
        ..worker_template()
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_template() {
        let template = worker_template();
        assert_eq!(template.url.port, 1883);
        assert_eq!(template.payload, "mqtt-stress");
    }

    #[test]
    fn test_worker_config_matches_template() {
        let config = worker_config(2);
        assert_eq!(config.id, "mqtt-stress-worker-2");
        assert_eq!(config.message_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_payload_override() {
        let template = worker_template_with_payload(PayloadMode::Incrementing, "0");
        assert_eq!(template.payload_mode, PayloadMode::Incrementing);
        assert_eq!(template.namespace, "stress");
    }
}
