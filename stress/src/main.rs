use clap::{CommandFactory, Parser};
use metrics_exporter_prometheus::PrometheusBuilder;
use mqtt_stress::broker::MqttConnector;
use mqtt_stress::config::{Args, Config};
use mqtt_stress::pool::PoolSupervisor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mqtt_stress=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_args(Args::parse()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            let _ = Args::command().print_help();
            return Err(e.into());
        }
    };

    // Prometheus exporter (must be installed before any metrics are recorded)
    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Prometheus metrics listening on {}", addr);
    }

    info!(
        url = %config.url,
        workers = config.workers,
        delay = %humantime::format_duration(config.message_delay),
        payload_mode = config.payload_mode.name(),
        "Loaded configuration"
    );
    info!("running for {}", humantime::format_duration(config.run_for));

    // Ctrl-C ends the run early; workers still drain and disconnect
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping workers");
            interrupt.cancel();
        }
    });

    let report = PoolSupervisor::new(config.worker_template(), config.workers, MqttConnector::new())
        .with_disconnect_grace(config.disconnect_grace)
        .run(config.run_for, cancel)
        .await;

    if report.connected < report.workers {
        warn!(
            connected = report.connected,
            workers = report.workers,
            "some workers never connected"
        );
    }
    println!("SUMMARY {}", serde_json::to_string(&report)?);

    Ok(())
}
