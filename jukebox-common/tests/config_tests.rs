//! Tests for configuration parsing, defaults and validation

use jukebox_common::config::{BackendKind, JukeboxConfig};
use std::io::Write;
use std::time::Duration;

const FULL_CONFIG: &str = r#"
[server]
bind = "127.0.0.1"
port = 9000

[logging]
level = "debug"

[devices]
backend = "probe"
default = "Living Room"
discovery_timeout_secs = 3
connect_timeout_secs = 10

[[devices.known]]
name = "Living Room"
address = "192.168.1.20:8009"

[[devices.known]]
name = "Bathroom Speaker"

[broadcast]
heartbeat_interval_secs = 5
max_missed_heartbeats = 2

[encoding]
poll_interval_ms = 1500
"#;

#[test]
fn test_defaults_when_empty() {
    let config = JukeboxConfig::from_toml_str("").expect("empty config is valid");

    assert_eq!(config.server.port, 8000);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.devices.backend, BackendKind::Memory);
    assert!(config.devices.known.is_empty());
    assert_eq!(config.devices.connect_timeout(), Duration::from_secs(10));
    assert_eq!(config.broadcast.max_missed_heartbeats, 3);
    assert_eq!(config.encoding.poll_interval_ms, 3000);
    assert!(config.library.path.is_none());
}

#[test]
fn test_full_config() {
    let config = JukeboxConfig::from_toml_str(FULL_CONFIG).expect("valid config");

    assert_eq!(config.server.bind, "127.0.0.1");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.devices.backend, BackendKind::Probe);
    assert_eq!(config.devices.default.as_deref(), Some("Living Room"));
    assert_eq!(config.devices.discovery_timeout(), Duration::from_secs(3));
    assert_eq!(config.devices.known.len(), 2);
    assert_eq!(
        config.devices.known[0].address.as_deref(),
        Some("192.168.1.20:8009")
    );
    assert!(config.devices.known[1].address.is_none());
    assert_eq!(config.broadcast.heartbeat_interval(), Duration::from_secs(5));
    // Unset fields in a present section keep their defaults
    assert_eq!(config.broadcast.subscriber_buffer, 64);
    assert_eq!(config.encoding.poll_interval_ms, 1500);
}

#[test]
fn test_unknown_default_device_rejected() {
    let toml = r#"
[devices]
default = "Garage"

[[devices.known]]
name = "Kitchen"
"#;
    let err = JukeboxConfig::from_toml_str(toml).unwrap_err();
    assert!(err.to_string().contains("Garage"));
}

#[test]
fn test_duplicate_device_rejected() {
    let toml = r#"
[[devices.known]]
name = "Kitchen"

[[devices.known]]
name = "Kitchen"
"#;
    assert!(JukeboxConfig::from_toml_str(toml).is_err());
}

#[test]
fn test_zero_timeout_rejected() {
    let toml = r#"
[devices]
connect_timeout_secs = 0
"#;
    assert!(JukeboxConfig::from_toml_str(toml).is_err());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = JukeboxConfig::from_toml_str("[server\nport = ").unwrap_err();
    assert!(err.to_string().starts_with("Configuration error"));
}

#[test]
fn test_load_explicit_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(FULL_CONFIG.as_bytes()).unwrap();

    let config = JukeboxConfig::load_or_default(Some(file.path())).expect("file loads");
    assert_eq!(config.server.port, 9000);
}

#[test]
fn test_explicit_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(JukeboxConfig::load_or_default(Some(&missing)).is_err());
}
