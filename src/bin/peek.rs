//! Print the first messages arriving on an MQTT topic
//!
//! Exits non-zero when nothing arrives before the timeout, which makes it
//! usable as a smoke test against a running processor.
//!
//! Usage:
//!   cargo run --bin parking-peek -- --count 5 --timeout-secs 60

use clap::Parser;
use parking_stream::infra::Config;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::process::ExitCode;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "parking-peek", version)]
#[command(about = "Print the first N messages from an MQTT topic")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Topic filter; defaults to every billing subtopic
    #[arg(short, long)]
    topic: Option<String>,

    /// Number of messages to print before exiting
    #[arg(short = 'n', long, default_value = "10")]
    count: usize,

    /// Give up after this many seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// MQTT broker host
    #[arg(long)]
    mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    mqtt_port: Option<u16>,
}

/// Pretty-print JSON payloads, pass anything else through
fn render_payload(payload: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(value) => serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| String::from_utf8_lossy(payload).into_owned()),
        Err(_) => String::from_utf8_lossy(payload).into_owned(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config =
        Config::load_from_path(&args.config).with_mqtt_address(args.mqtt_host, args.mqtt_port);
    let topic = args.topic.unwrap_or_else(|| format!("{}/#", config.output_topic()));

    let client_id = format!("{}-peek-{}", config.mqtt_client_id(), std::process::id());
    let mut options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    options.set_keep_alive(Duration::from_secs(30));
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
        eprintln!("subscribe to {topic} failed: {e}");
        return ExitCode::FAILURE;
    }
    eprintln!(
        "waiting for {} message(s) on {topic} at {}:{} (timeout {}s)",
        args.count,
        config.mqtt_host(),
        config.mqtt_port(),
        args.timeout_secs
    );

    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut received = 0usize;

    while received < args.count {
        let polled = tokio::time::timeout_at(deadline, eventloop.poll()).await;
        match polled {
            Err(_) => break,
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                received += 1;
                println!("[{received}] {}", publish.topic);
                println!("{}", render_payload(&publish.payload));
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                eprintln!("mqtt error: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    let _ = client.disconnect().await;

    if received == 0 {
        eprintln!("no messages on {topic} within {}s", args.timeout_secs);
        return ExitCode::FAILURE;
    }
    eprintln!("received {received} message(s)");
    ExitCode::SUCCESS
}
