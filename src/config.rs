//! Configuration system for the sensor simulator
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! command-line overrides applied by the binary. Credentials are never stored
//! in the file itself; the file names the environment variables holding them.

use crate::encoding::WireFormat;
use crate::protocol::validate_device_id;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "sensor-sim.toml";

/// Main simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub startup: StartupSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9._-]+); also the MQTT client ID
    #[serde(default = "default_device_id")]
    pub id: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            id: default_device_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            username_env: None,
            password_env: None,
            keepalive_secs: default_keepalive(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Telemetry cadence, generator parameters and wire format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_temp_min")]
    pub temp_min: f64,
    #[serde(default = "default_temp_max")]
    pub temp_max: f64,
    /// Maximum compass step per sample, in degrees
    #[serde(default = "default_compass_variation")]
    pub compass_variation: f64,
    /// GPS drift in metres per second
    #[serde(default = "default_gps_drift")]
    pub gps_drift: f64,
    #[serde(default)]
    pub format: WireFormat,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            temp_min: default_temp_min(),
            temp_max: default_temp_max(),
            compass_variation: default_compass_variation(),
            gps_drift: default_gps_drift(),
            format: WireFormat::default(),
        }
    }
}

/// Bounded wait for the broker to confirm the session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartupSection {
    #[serde(default = "default_confirmation_attempts")]
    pub confirmation_attempts: u32,
    #[serde(default = "default_confirmation_interval_ms")]
    pub confirmation_interval_ms: u64,
}

impl Default for StartupSection {
    fn default() -> Self {
        Self {
            confirmation_attempts: default_confirmation_attempts(),
            confirmation_interval_ms: default_confirmation_interval_ms(),
        }
    }
}

/// Mid-session reconnection policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Unlimited when absent
    pub max_attempts: Option<u32>,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,
    #[serde(default = "default_sustained_delay_ms")]
    pub sustained_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_ms: default_backoff_ms(),
            sustained_delay_ms: default_sustained_delay_ms(),
        }
    }
}

fn default_device_id() -> String {
    "sensor_simulator".to_string()
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_keepalive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_temp_min() -> f64 {
    35.0
}

fn default_temp_max() -> f64 {
    85.0
}

fn default_compass_variation() -> f64 {
    5.0
}

fn default_gps_drift() -> f64 {
    0.1
}

fn default_confirmation_attempts() -> u32 {
    10
}

fn default_confirmation_interval_ms() -> u64 {
    1000
}

fn default_backoff_ms() -> Vec<u64> {
    vec![250, 500, 1000, 2000]
}

fn default_sustained_delay_ms() -> u64 {
    5000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Broker endpoint resolved from `mqtt.broker_url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl SimulatorConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SimulatorConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path, else `sensor-sim.toml` when present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::load_from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id).map_err(|e| {
            ConfigError::InvalidDeviceId(format!(
                "Device ID '{}' must match pattern [a-zA-Z0-9._-]+ ({e})",
                self.device.id
            ))
        })?;

        self.broker_endpoint()?;

        let telemetry = &self.telemetry;
        if telemetry.temp_min >= telemetry.temp_max {
            return Err(ConfigError::InvalidConfig(format!(
                "temp_min ({}) must be below temp_max ({})",
                telemetry.temp_min, telemetry.temp_max
            )));
        }
        if telemetry.interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "interval_ms must be greater than zero".to_string(),
            ));
        }
        if telemetry.compass_variation < 0.0 || telemetry.gps_drift < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "compass_variation and gps_drift must be non-negative".to_string(),
            ));
        }
        if self.startup.confirmation_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "confirmation_attempts must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Accepts `mqtt://host:port`, `mqtts://host:port`, or a bare `host[:port]`
    pub fn broker_endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        parse_broker(&self.mqtt.broker_url)
    }

    /// Replace the broker from a CLI `HOST[:PORT]` argument
    pub fn set_broker(&mut self, broker: &str) -> Result<(), ConfigError> {
        let endpoint = parse_broker(broker)?;
        let scheme = if endpoint.tls { "mqtts" } else { "mqtt" };
        self.mqtt.broker_url = format!("{scheme}://{}:{}", endpoint.host, endpoint.port);
        Ok(())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry.interval_ms)
    }

    pub fn confirmation_interval(&self) -> Duration {
        Duration::from_millis(self.startup.confirmation_interval_ms)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn parse_broker(broker: &str) -> Result<BrokerEndpoint, ConfigError> {
    let candidate = if broker.contains("://") {
        broker.to_string()
    } else {
        format!("mqtt://{broker}")
    };

    let url = Url::parse(&candidate)
        .map_err(|e| ConfigError::InvalidBroker(format!("{broker}: {e}")))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        other => {
            return Err(ConfigError::InvalidBroker(format!(
                "unsupported scheme '{other}'"
            )))
        }
    };

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ConfigError::InvalidBroker(format!("{broker}: missing host")))?
        .to_string();

    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerEndpoint { host, port, tls })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_historical_flags() {
        let config = SimulatorConfig::default();
        assert_eq!(config.device.id, "sensor_simulator");
        assert_eq!(config.mqtt.broker_url, "mqtt://localhost:1883");
        assert_eq!(config.telemetry.interval_ms, 1000);
        assert_eq!(config.telemetry.temp_min, 35.0);
        assert_eq!(config.telemetry.temp_max, 85.0);
        assert_eq!(config.telemetry.format, WireFormat::Protobuf);
        assert_eq!(config.startup.confirmation_attempts, 10);
        assert_eq!(config.reconnect.backoff_ms, vec![250, 500, 1000, 2000]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_content = r#"
[device]
id = "imx8mp-01"

[telemetry]
interval_ms = 250
format = "json"
"#;

        let config: SimulatorConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.device.id, "imx8mp-01");
        assert_eq!(config.telemetry.interval_ms, 250);
        assert_eq!(config.telemetry.format, WireFormat::Json);
        assert_eq!(config.telemetry.gps_drift, 0.1);
        assert_eq!(config.mqtt.keepalive_secs, 60);
    }

    #[test]
    fn test_invalid_device_id() {
        let mut config = SimulatorConfig::default();
        config.device.id = "invalid@device".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDeviceId(_))
        ));
    }

    #[test]
    fn test_temperature_range_must_be_ordered() {
        let mut config = SimulatorConfig::default();
        config.telemetry.temp_min = 90.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = SimulatorConfig::default();
        config.telemetry.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_broker_parsing() {
        let endpoint = parse_broker("mqtt://broker.local:1884").unwrap();
        assert_eq!(endpoint.host, "broker.local");
        assert_eq!(endpoint.port, 1884);
        assert!(!endpoint.tls);

        let endpoint = parse_broker("10.0.0.5").unwrap();
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_eq!(endpoint.port, 1883);

        let endpoint = parse_broker("mqtts://secure.example.com").unwrap();
        assert!(endpoint.tls);
        assert_eq!(endpoint.port, 8883);

        assert!(parse_broker("http://example.com").is_err());
    }

    #[test]
    fn test_set_broker_from_cli_argument() {
        let mut config = SimulatorConfig::default();
        config.set_broker("192.168.1.20:1884").unwrap();
        assert_eq!(config.mqtt.broker_url, "mqtt://192.168.1.20:1884");
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let config = SimulatorConfig::default();
        let rendered = config.to_toml().unwrap();
        let parsed: SimulatorConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
