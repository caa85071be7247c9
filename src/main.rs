//! Parking billing processor
//!
//! Consumes raw vehicle events from MQTT, keeps one billing session per
//! license plate, and emits billing events to a JSONL file and back to MQTT.
//!
//! Module structure:
//! - `domain/` - Core business types (events, billing, facility snapshot)
//! - `io/` - External interfaces (MQTT, egress, checkpoint, Prometheus)
//! - `services/` - Business logic (session processor, runtime, simulator)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use parking_stream::infra::{Config, Metrics};
use parking_stream::io::{create_egress_channel, MqttPublisher};
use parking_stream::services::SessionRuntime;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Keyed parking billing processor
#[derive(Parser, Debug)]
#[command(name = "parking-processor", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Override MQTT broker host
    #[arg(long)]
    mqtt_host: Option<String>,

    /// Override MQTT broker port
    #[arg(long)]
    mqtt_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git = %env!("GIT_HASH"), "parking-processor starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config).with_mqtt_address(args.mqtt_host, args.mqtt_port);

    // Start embedded MQTT broker with config
    parking_stream::infra::broker::start_embedded_broker(&config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        input_topic = %config.input_topic(),
        output_topic = %config.output_topic(),
        checkpoint_dir = %config.checkpoint_dir(),
        lateness_secs = %config.lateness_secs(),
        timer_interval_secs = %config.timer_interval().as_secs(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Create event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(config.channel_capacity());

    // Start MQTT ingress
    let mqtt_config = config.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            parking_stream::io::mqtt::start_mqtt_ingress(&mqtt_config, event_tx, mqtt_metrics, mqtt_shutdown)
                .await
        {
            tracing::error!(error = %e, "mqtt_ingress_failed");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = parking_stream::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "prometheus_server_failed");
            }
        });
    }

    // Create MQTT egress channel and publisher (if enabled)
    let (egress_sender, publisher_task) = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) =
            create_egress_channel(config.channel_capacity(), config.site_id().to_string());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        let task = tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        (Some(egress_sender.with_metrics(metrics.clone())), Some(task))
    } else {
        (None, None)
    };

    let mut runtime = SessionRuntime::new(&config, metrics, egress_sender, chrono::Utc::now());

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run until shutdown or the ingress channel closes
    runtime.run(event_rx, shutdown_rx).await;

    // Dropping the runtime closes the egress channel; let the publisher drain
    drop(runtime);
    if let Some(task) = publisher_task {
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            tracing::warn!("mqtt_egress_drain_timeout");
        }
    }

    info!("parking-processor shutdown complete");
    Ok(())
}
