//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_client_id() -> String {
    "parking-stream".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Start the embedded rumqttd broker in the processor
    #[serde(default = "default_broker_enabled")]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_enabled() -> bool {
    true
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: default_broker_enabled(),
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Topic prefix raw events are published under (`<topic>/<plate>`)
    #[serde(default = "default_raw_topic")]
    pub topic: String,
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: f64,
    /// Mean delay between events; actual delay is uniform in [0.5x, 1.5x]
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
    #[serde(default = "default_initial_fleet")]
    pub initial_fleet: usize,
    #[serde(default = "default_reseed_fleet")]
    pub reseed_fleet: usize,
    #[serde(default = "default_min_fleet")]
    pub min_fleet: usize,
    #[serde(default = "default_max_fleet")]
    pub max_fleet: usize,
    #[serde(default = "default_spawn_probability")]
    pub spawn_probability: f64,
    #[serde(default = "default_removal_probability")]
    pub removal_probability: f64,
    #[serde(default = "default_report_every")]
    pub report_every: u64,
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_raw_topic() -> String {
    "parking-raw-events".to_string()
}

fn default_duration_minutes() -> f64 {
    30.0
}

fn default_interval_secs() -> f64 {
    3.0
}

fn default_initial_fleet() -> usize {
    5
}

fn default_reseed_fleet() -> usize {
    3
}

fn default_min_fleet() -> usize {
    3
}

fn default_max_fleet() -> usize {
    8
}

fn default_spawn_probability() -> f64 {
    0.4
}

fn default_removal_probability() -> f64 {
    0.5
}

fn default_report_every() -> u64 {
    20
}

fn default_publish_attempts() -> u32 {
    3
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            topic: default_raw_topic(),
            duration_minutes: default_duration_minutes(),
            interval_secs: default_interval_secs(),
            initial_fleet: default_initial_fleet(),
            reseed_fleet: default_reseed_fleet(),
            min_fleet: default_min_fleet(),
            max_fleet: default_max_fleet(),
            spawn_probability: default_spawn_probability(),
            removal_probability: default_removal_probability(),
            report_every: default_report_every(),
            publish_attempts: default_publish_attempts(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Raw events are consumed from `<input_topic>/#`
    #[serde(default = "default_raw_topic")]
    pub input_topic: String,
    /// Billing events are published to `<output_topic>/<plate>`
    #[serde(default = "default_output_topic")]
    pub output_topic: String,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,
    /// Events older than `max event time seen - lateness` are dropped
    #[serde(default = "default_lateness_secs")]
    pub lateness_secs: u64,
    /// Delay between periodic billing updates for parked vehicles
    #[serde(default = "default_timer_interval")]
    pub timer_interval_secs: u64,
    /// How often due timers are polled
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_output_topic() -> String {
    "parking-processed-results".to_string()
}

fn default_checkpoint_dir() -> String {
    "/tmp/parking-checkpoint".to_string()
}

fn default_checkpoint_interval() -> u64 {
    30
}

fn default_lateness_secs() -> u64 {
    600
}

fn default_timer_interval() -> u64 {
    60
}

fn default_tick_ms() -> u64 {
    500
}

fn default_snapshot_interval() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    1000
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            input_topic: default_raw_topic(),
            output_topic: default_output_topic(),
            checkpoint_dir: default_checkpoint_dir(),
            checkpoint_interval_secs: default_checkpoint_interval(),
            lateness_secs: default_lateness_secs(),
            timer_interval_secs: default_timer_interval(),
            tick_ms: default_tick_ms(),
            snapshot_interval_secs: default_snapshot_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for billing egress (JSONL format, empty to disable)
    #[serde(default = "default_egress_file")]
    pub file: String,
    /// Publish billing events and metrics over MQTT
    #[serde(default = "default_mqtt_egress_enabled")]
    pub mqtt_enabled: bool,
    /// Metrics summaries are published here on every report
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
}

fn default_egress_file() -> String {
    "billing.jsonl".to_string()
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_metrics_topic() -> String {
    "parking/metrics".to_string()
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            file: default_egress_file(),
            mqtt_enabled: default_mqtt_egress_enabled(),
            metrics_topic: default_metrics_topic(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

/// Fractional seconds from config as a `Duration`. Negative and NaN map to
/// zero, values past `Duration::MAX` saturate.
pub fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Facility identifier included in metrics payloads
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "parking".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    config_file: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broker: BrokerConfig,
    simulator: SimulatorConfig,
    processor: ProcessorConfig,
    egress: EgressConfig,
    metrics_interval_secs: u64,
    prometheus_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        let metrics = MetricsConfig::default();
        Self {
            site_id: default_site_id(),
            config_file: "default".to_string(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: default_client_id(),
            mqtt_username: None,
            mqtt_password: None,
            broker: BrokerConfig::default(),
            simulator: SimulatorConfig::default(),
            processor: ProcessorConfig::default(),
            egress: EgressConfig::default(),
            metrics_interval_secs: metrics.interval_secs,
            prometheus_port: metrics.prometheus_port,
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        Ok(Self {
            site_id: toml_config.site.id,
            config_file: source.to_string(),
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_client_id: toml_config.mqtt.client_id,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker: toml_config.broker,
            simulator: toml_config.simulator,
            processor: toml_config.processor,
            egress: toml_config.egress,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker.enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker.bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker.port
    }

    // Simulator getters
    pub fn simulator(&self) -> &SimulatorConfig {
        &self.simulator
    }

    pub fn raw_topic(&self) -> &str {
        &self.simulator.topic
    }

    pub fn sim_duration(&self) -> Duration {
        secs_to_duration(self.simulator.duration_minutes * 60.0)
    }

    pub fn sim_interval(&self) -> Duration {
        secs_to_duration(self.simulator.interval_secs)
    }

    // Processor getters
    pub fn input_topic(&self) -> &str {
        &self.processor.input_topic
    }

    pub fn output_topic(&self) -> &str {
        &self.processor.output_topic
    }

    pub fn checkpoint_dir(&self) -> &str {
        &self.processor.checkpoint_dir
    }

    pub fn checkpoint_interval_secs(&self) -> u64 {
        self.processor.checkpoint_interval_secs
    }

    pub fn lateness_secs(&self) -> u64 {
        self.processor.lateness_secs
    }

    pub fn timer_interval(&self) -> Duration {
        Duration::from_secs(self.processor.timer_interval_secs.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.processor.tick_ms.max(10))
    }

    pub fn snapshot_interval_secs(&self) -> u64 {
        self.processor.snapshot_interval_secs
    }

    pub fn channel_capacity(&self) -> usize {
        self.processor.channel_capacity.max(1)
    }

    // Egress getters
    pub fn egress_file(&self) -> &str {
        &self.egress.file
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.egress.mqtt_enabled
    }

    pub fn metrics_topic(&self) -> &str {
        &self.egress.metrics_topic
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    /// Apply command line overrides on top of the file (simulator binary)
    pub fn with_mqtt_address(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.mqtt_host = host;
        }
        if let Some(port) = port {
            self.mqtt_port = port;
        }
        self
    }

    pub fn with_simulator(mut self, simulator: SimulatorConfig) -> Self {
        self.simulator = simulator;
        self
    }

    /// Builder method for tests to set the checkpoint directory
    #[cfg(test)]
    pub fn with_checkpoint_dir(mut self, dir: &str) -> Self {
        self.processor.checkpoint_dir = dir.to_string();
        self
    }

    /// Builder method for tests to set the JSONL egress file
    #[cfg(test)]
    pub fn with_egress_file(mut self, file: &str) -> Self {
        self.egress.file = file.to_string();
        self
    }

    /// Builder method for tests to set the lateness horizon
    #[cfg(test)]
    pub fn with_lateness_secs(mut self, secs: u64) -> Self {
        self.processor.lateness_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.raw_topic(), "parking-raw-events");
        assert_eq!(config.input_topic(), "parking-raw-events");
        assert_eq!(config.output_topic(), "parking-processed-results");
        assert_eq!(config.checkpoint_dir(), "/tmp/parking-checkpoint");
        assert_eq!(config.lateness_secs(), 600);
        assert_eq!(config.timer_interval(), Duration::from_secs(60));
        assert_eq!(config.sim_duration(), Duration::from_secs(30 * 60));
        assert_eq!(config.sim_interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_simulator_defaults() {
        let sim = SimulatorConfig::default();
        assert_eq!(sim.initial_fleet, 5);
        assert_eq!(sim.reseed_fleet, 3);
        assert_eq!(sim.min_fleet, 3);
        assert_eq!(sim.max_fleet, 8);
        assert_eq!(sim.report_every, 20);
        assert!(sim.seed.is_none());
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["parking-processor".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "parking-processor".to_string(),
            "--config".to_string(),
            "config/garage.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/garage.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["parking-processor".to_string(), "--config=config/garage.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/garage.toml");
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let config = Config::from_toml_str(
            r#"
[mqtt]
host = "bus"
port = 1884

[processor]
lateness_secs = 120
"#,
            "inline",
        )
        .unwrap();

        assert_eq!(config.mqtt_host(), "bus");
        assert_eq!(config.lateness_secs(), 120);
        assert_eq!(config.output_topic(), "parking-processed-results");
        assert_eq!(config.egress_file(), "billing.jsonl");
        assert!(config.broker_enabled());
    }

    #[test]
    fn test_missing_mqtt_section_is_an_error() {
        assert!(Config::from_toml_str("[site]\nid = \"x\"\n", "inline").is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::default().with_mqtt_address(Some("10.0.0.5".to_string()), None);
        assert_eq!(config.mqtt_host(), "10.0.0.5");
        assert_eq!(config.mqtt_port(), 1883);
    }

    #[test]
    fn test_simulator_durations_saturate() {
        let simulator = SimulatorConfig {
            duration_minutes: 1e20,
            interval_secs: f64::NAN,
            ..SimulatorConfig::default()
        };
        let config = Config::default().with_simulator(simulator);
        assert_eq!(config.sim_duration(), Duration::MAX);
        assert_eq!(config.sim_interval(), Duration::ZERO);

        let negative = SimulatorConfig { duration_minutes: -3.0, ..SimulatorConfig::default() };
        assert_eq!(Config::default().with_simulator(negative).sim_duration(), Duration::ZERO);
        assert_eq!(secs_to_duration(f64::INFINITY), Duration::MAX);
    }
}
