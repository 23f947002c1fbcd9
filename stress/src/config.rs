//! Run configuration
//!
//! Options come from command-line flags, each of which can also be supplied
//! through an `MQTT_STRESS_*` environment variable. Flags win over the
//! environment. [`Config::from_args`] validates the raw options; any error
//! there is fatal and no worker is started.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::broker::{BrokerError, BrokerUrl};
use crate::payload::{DEFAULT_COUNTER_START, DEFAULT_PAYLOAD, PayloadMode};
use crate::worker::WorkerTemplate;

/// Configuration errors; all of them abort before the pool starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing url")]
    MissingUrl,

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] BrokerError),

    #[error("invalid {flag} duration {value:?}: {reason}")]
    InvalidDuration {
        flag: &'static str,
        value: String,
        reason: String,
    },

    #[error("worker count must be at least 1")]
    InvalidWorkerCount,
}

/// Raw command-line options
#[derive(Debug, Clone, Parser)]
#[command(name = "mqtt-stress", version, about = "Stress test an MQTT broker with a pool of publish/subscribe workers")]
pub struct Args {
    /// scheme://host:port where scheme is one of tcp, mqtt, ssl, tls, mqtts, ws or wss
    #[arg(long, env = "MQTT_STRESS_URL")]
    pub url: Option<String>,

    /// Username to authenticate with the broker
    #[arg(long, env = "MQTT_STRESS_USERNAME", default_value = "")]
    pub username: String,

    /// Password to authenticate with the broker
    #[arg(long, env = "MQTT_STRESS_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Number of clients to connect to the broker with
    #[arg(long, env = "MQTT_STRESS_WORKERS", default_value_t = 10)]
    pub workers: usize,

    /// Delay per message per worker, e.g. 500ms, 1s or 1m
    #[arg(long, env = "MQTT_STRESS_DELAY", default_value = "500ms")]
    pub delay: String,

    /// How long to run before exiting, e.g. 15s or 2m
    #[arg(long, env = "MQTT_STRESS_RUN", default_value = "15s")]
    pub run: String,

    /// Send an integer incremented on every message; each worker counts on its own
    /// (overrides --fields and --payload)
    #[arg(long, env = "MQTT_STRESS_INCREMENT")]
    pub increment: bool,

    /// Static payload sent with every message
    #[arg(long, env = "MQTT_STRESS_PAYLOAD", default_value = "")]
    pub payload: String,

    /// <name>:<type> fields to generate JSON payloads from, separated by ","
    /// where type is number, string, id, phone or email, e.g.
    /// customer:id,customer_email:email (overrides --payload)
    #[arg(long, env = "MQTT_STRESS_FIELDS", default_value = "")]
    pub fields: String,

    /// Base client id; worker n connects as <client-id>-<n>
    #[arg(long, env = "MQTT_STRESS_CLIENT_ID", default_value = "mqtt-stress-worker")]
    pub client_id: String,

    /// Topic namespace; worker n publishes to <namespace>/<client-id>-<n>
    #[arg(long, env = "MQTT_STRESS_NAMESPACE", default_value = "stress")]
    pub namespace: String,

    /// Time allowed for outstanding publishes and the disconnect at shutdown
    #[arg(long, env = "MQTT_STRESS_DISCONNECT_GRACE", default_value = "250ms")]
    pub disconnect_grace: String,

    /// Serve Prometheus metrics on this address during the run
    #[arg(long, env = "MQTT_STRESS_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// Validated run configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub url: BrokerUrl,
    pub username: String,
    pub password: String,
    pub workers: usize,
    pub message_delay: Duration,
    pub run_for: Duration,
    pub payload_mode: PayloadMode,
    pub payload: String,
    pub client_id: String,
    pub namespace: String,
    pub disconnect_grace: Duration,
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let run_for = parse_duration("run", &args.run)?;
        let message_delay = parse_duration("delay", &args.delay)?;
        let disconnect_grace = parse_duration("disconnect-grace", &args.disconnect_grace)?;

        let url = match args.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => BrokerUrl::parse(url)?,
            _ => return Err(ConfigError::MissingUrl),
        };
        if args.workers == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }

        let (payload_mode, payload) = select_payload(args.increment, &args.fields, &args.payload);

        Ok(Self {
            url,
            username: args.username,
            password: args.password,
            workers: args.workers,
            message_delay,
            run_for,
            payload_mode,
            payload,
            client_id: args.client_id,
            namespace: args.namespace,
            disconnect_grace,
            metrics_addr: args.metrics_addr,
        })
    }

    /// Settings every worker of the pool is derived from
    pub fn worker_template(&self) -> WorkerTemplate {
        WorkerTemplate {
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            url: self.url.clone(),
            message_delay: self.message_delay,
            namespace: self.namespace.clone(),
            payload_mode: self.payload_mode,
            payload: self.payload.clone(),
        }
    }
}

/// Pick the payload strategy: increment > fields > payload > default payload
pub fn select_payload(increment: bool, fields: &str, payload: &str) -> (PayloadMode, String) {
    if increment {
        (PayloadMode::Incrementing, DEFAULT_COUNTER_START.to_string())
    } else if !fields.is_empty() {
        (PayloadMode::Generated, fields.to_string())
    } else if !payload.is_empty() {
        (PayloadMode::Static, payload.to_string())
    } else {
        (PayloadMode::Static, DEFAULT_PAYLOAD.to_string())
    }
}

/// Parse a duration such as `500ms`, `15s`, `1m` or `1m30s`
pub fn parse_duration(flag: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidDuration {
        flag,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
