//! Configuration loading and validation tests
//!
//! Tests focus on the behavior of loading files from disk: what is accepted,
//! what is rejected, and how the loaded values flow into publisher settings.

use sensor_sim::config::{ConfigError, SimulatorConfig};
use sensor_sim::device::PublisherSettings;
use sensor_sim::encoding::WireFormat;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[device]
id = "imx8mp-lab.01"

[mqtt]
broker_url = "mqtts://broker.example.com"
username_env = "SIM_MQTT_USER"
password_env = "SIM_MQTT_PASS"
keepalive_secs = 30

[telemetry]
interval_ms = 500
temp_min = 20.0
temp_max = 60.0
compass_variation = 2.5
gps_drift = 0.5
format = "json"

[startup]
confirmation_attempts = 4
confirmation_interval_ms = 250

[reconnect]
max_attempts = 8
backoff_ms = [100, 200]
sustained_delay_ms = 1000
"#
    )
    .unwrap();

    let config = SimulatorConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device.id, "imx8mp-lab.01");
    assert_eq!(config.mqtt.username_env.as_deref(), Some("SIM_MQTT_USER"));
    assert_eq!(config.mqtt.keepalive_secs, 30);
    assert_eq!(config.telemetry.format, WireFormat::Json);
    assert_eq!(config.reconnect.max_attempts, Some(8));
    assert_eq!(config.reconnect.backoff_ms, vec![100, 200]);

    let endpoint = config.broker_endpoint().unwrap();
    assert_eq!(endpoint.host, "broker.example.com");
    assert_eq!(endpoint.port, 8883);
    assert!(endpoint.tls);

    let settings = PublisherSettings::from_config(&config);
    assert_eq!(settings.device_id, "imx8mp-lab.01");
    assert_eq!(settings.interval, Duration::from_millis(500));
    assert_eq!(settings.confirmation_attempts, 4);
    assert_eq!(settings.confirmation_interval, Duration::from_millis(250));
}

#[test]
fn test_empty_file_yields_defaults() {
    let temp_file = NamedTempFile::new().unwrap();
    let config = SimulatorConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config, SimulatorConfig::default());
}

#[test]
fn test_config_fails_when_file_not_found() {
    let result = SimulatorConfig::load(Some(Path::new("/nonexistent/sensor-sim.toml")));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_fails_with_invalid_toml_syntax() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[telemetry\ninterval_ms = ").unwrap();

    let result = SimulatorConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_rejects_unknown_wire_format() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[telemetry]
format = "xml"
"#
    )
    .unwrap();

    assert!(SimulatorConfig::load_from_file(temp_file.path()).is_err());
}

#[test]
fn test_config_rejects_invalid_device_id() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[device]
id = "sensor/one"
"#
    )
    .unwrap();

    let result = SimulatorConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidDeviceId(_))));
}

#[test]
fn test_config_rejects_inverted_temperature_range() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[telemetry]
temp_min = 70.0
temp_max = 40.0
"#
    )
    .unwrap();

    let result = SimulatorConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_config_rejects_unsupported_broker_scheme() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[mqtt]
broker_url = "http://localhost:1883"
"#
    )
    .unwrap();

    let result = SimulatorConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidBroker(_))));
}

#[test]
fn test_credentials_resolved_from_named_env_vars() {
    std::env::set_var("SENSOR_SIM_TEST_USER_7F3A", "device-user");
    let mut config = SimulatorConfig::default();
    config.mqtt.username_env = Some("SENSOR_SIM_TEST_USER_7F3A".to_string());
    config.mqtt.password_env = Some("SENSOR_SIM_TEST_PASS_UNSET_7F3A".to_string());

    assert_eq!(config.get_mqtt_username().as_deref(), Some("device-user"));
    assert_eq!(config.get_mqtt_password(), None);
    std::env::remove_var("SENSOR_SIM_TEST_USER_7F3A");
}

#[test]
fn test_cli_broker_override_keeps_file_settings() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[device]
id = "bench-2"
"#
    )
    .unwrap();

    let mut config = SimulatorConfig::load_from_file(temp_file.path()).unwrap();
    config.set_broker("10.0.0.5:1885").unwrap();

    assert_eq!(config.mqtt.broker_url, "mqtt://10.0.0.5:1885");
    assert_eq!(config.device.id, "bench-2");
    assert!(config.validate().is_ok());
}
