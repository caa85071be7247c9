//! Parking fleet simulator
//!
//! Drives a small fleet of vehicles through ENTERING, PARKED, MOVING and
//! EXITING and publishes each status sample to `<topic>/<plate>` on MQTT.
//!
//! Usage:
//!   cargo run --bin parking-sim -- --config config/dev.toml --duration-minutes 5

use clap::Parser;
use parking_stream::infra::Config;
use parking_stream::io::MqttEventSink;
use parking_stream::services::{FleetConfig, FleetSimulator};
use std::process::ExitCode;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "parking-sim", version)]
#[command(about = "Publish simulated parking events to MQTT")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// MQTT broker host
    #[arg(long)]
    mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    mqtt_port: Option<u16>,

    /// Topic prefix for raw events
    #[arg(long)]
    topic: Option<String>,

    /// How long to run, in minutes
    #[arg(long)]
    duration_minutes: Option<f64>,

    /// Mean delay between events, in seconds
    #[arg(long)]
    interval_secs: Option<f64>,

    /// RNG seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git = %env!("GIT_HASH"), "parking-sim starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    let mut simulator = config.simulator().clone();
    if let Some(topic) = args.topic {
        simulator.topic = topic;
    }
    if let Some(minutes) = args.duration_minutes {
        simulator.duration_minutes = minutes;
    }
    if let Some(interval) = args.interval_secs {
        simulator.interval_secs = interval;
    }
    if args.seed.is_some() {
        simulator.seed = args.seed;
    }
    let config = config.with_mqtt_address(args.mqtt_host, args.mqtt_port).with_simulator(simulator);

    info!(
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        topic = %config.raw_topic(),
        duration_secs = %config.sim_duration().as_secs(),
        interval_secs = %config.sim_interval().as_secs_f64(),
        seed = ?config.simulator().seed,
        "simulator_config"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let mut sink = MqttEventSink::connect(&config);
    let mut fleet =
        FleetSimulator::with_seed(FleetConfig::from(config.simulator()), config.simulator().seed);
    let stats = fleet.run(&mut sink, config.sim_duration(), shutdown_rx).await;

    if stats.attempted > 0 && stats.delivered == 0 {
        warn!(attempted = %stats.attempted, "no_events_delivered");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
