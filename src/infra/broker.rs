//! Embedded MQTT broker (rumqttd) so a single processor host can run without
//! an external bus

use crate::infra::config::Config as AppConfig;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Largest raw or billing event the broker accepts
const MAX_PAYLOAD_BYTES: usize = 16 * 1024;

fn broker_config(listen: SocketAddr) -> Config {
    let router = RouterConfig {
        max_segment_size: 16 * 1024 * 1024,
        max_segment_count: 10,
        max_connections: 64,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                max_payload_size: MAX_PAYLOAD_BYTES,
                max_inflight_count: 200,
                auth: None,
                dynamic_filters: false,
                external_auth: None,
            },
        },
    );

    Config {
        id: 0,
        router,
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    }
}

/// Start the embedded broker on its own thread when enabled.
///
/// Returns false when the broker is disabled or the bind address is invalid.
pub fn start_embedded_broker(app_config: &AppConfig) -> bool {
    if !app_config.broker_enabled() {
        info!("broker_disabled");
        return false;
    }

    let addr_str = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    let listen: SocketAddr = match addr_str.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(error = %e, addr = %addr_str, "broker_invalid_bind_address");
            return false;
        }
    };

    let config = broker_config(listen);
    thread::spawn(move || {
        let mut broker = Broker::new(config);
        // start() blocks for the life of the broker
        if let Err(e) = broker.start() {
            warn!(error = %e, "broker_start_failed");
        }
    });

    // Give the listener a moment before clients connect
    thread::sleep(Duration::from_millis(100));
    info!(addr = %listen, "broker_started");
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_config_listens_on_v4_only() {
        let listen: SocketAddr = "127.0.0.1:18830".parse().unwrap();
        let config = broker_config(listen);
        let servers = config.v4.unwrap();
        assert_eq!(servers["v4"].listen, listen);
        assert_eq!(servers["v4"].connections.max_payload_size, MAX_PAYLOAD_BYTES);
        assert!(config.v5.is_none());
    }
}
