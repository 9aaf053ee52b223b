//! Pure session configuration for the MQTT transport
//!
//! This module contains pure functions for building rumqttc options from
//! session settings, plus the transport error type.

use crate::config::{ReconnectSection, SimulatorConfig};
use crate::transport::{SessionState, WillMessage};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;

/// Everything needed to open one broker session
///
/// Identity and credentials are fixed for the lifetime of a session; changing
/// them means building a new [`super::MqttSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive: Duration,
    pub connect_timeout: Duration,
    pub tls: bool,
    pub reconnect: ReconnectConfig,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            username: None,
            password: None,
            keepalive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            tls: false,
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    /// Resolve broker, identity and credentials from the simulator config
    pub fn from_simulator_config(config: &SimulatorConfig) -> Result<Self, SessionError> {
        let endpoint = config
            .broker_endpoint()
            .map_err(|e| SessionError::InvalidBrokerUrl(e.to_string()))?;

        Ok(Self {
            host: endpoint.host,
            port: endpoint.port,
            client_id: config.device.id.clone(),
            username: config.get_mqtt_username(),
            password: config.get_mqtt_password(),
            keepalive: Duration::from_secs(config.mqtt.keepalive_secs),
            connect_timeout: Duration::from_secs(config.mqtt.connect_timeout_secs),
            tls: endpoint.tls,
            reconnect: ReconnectConfig::from(&config.reconnect),
        })
    }
}

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ReconnectSection::default())
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            backoff_pattern: section.backoff_ms.clone(),
            sustained_delay: section.sustained_delay_ms,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("No connection acknowledgment within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: SessionState },
    #[error("Last will must be set before connecting")]
    WillAfterConnect,
    #[error("Background loop cannot start: {0}")]
    LoopUnavailable(String),
}

/// Pure function to build rumqttc options for a session
pub fn configure_mqtt_options(config: &SessionConfig, will: Option<&WillMessage>) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);

    if config.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &config.username {
        let password = config.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keepalive);

    if let Some(will) = will {
        // MQTT v5 LastWill takes 5 parameters: topic, payload, qos, retain, properties
        let lwt = LastWill::new(
            &will.topic,
            will.payload.clone(),
            will.qos,
            will.retain,
            None,
        );
        mqtt_options.set_last_will(lwt);
    }

    mqtt_options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::QoS;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.backoff_pattern, vec![250, 500, 1000, 2000]);
        assert_eq!(config.sustained_delay, 5000);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig::default();

        assert_eq!(config.calculate_backoff_delay(1), 250);
        assert_eq!(config.calculate_backoff_delay(2), 500);
        assert_eq!(config.calculate_backoff_delay(4), 2000);

        // Pattern exhausted
        assert_eq!(config.calculate_backoff_delay(5), 5000);
        assert_eq!(config.calculate_backoff_delay(100), 5000);
    }

    #[test]
    fn test_empty_pattern_uses_sustained_delay() {
        let config = ReconnectConfig {
            max_attempts: Some(3),
            backoff_pattern: vec![],
            sustained_delay: 750,
        };
        assert_eq!(config.calculate_backoff_delay(1), 750);
    }

    #[test]
    fn test_session_config_from_simulator_config() {
        let mut config = SimulatorConfig::default();
        config.device.id = "imx8mp-01".to_string();
        config.mqtt.broker_url = "mqtts://broker.example.com:9883".to_string();
        config.mqtt.keepalive_secs = 30;

        let session = SessionConfig::from_simulator_config(&config).unwrap();
        assert_eq!(session.client_id, "imx8mp-01");
        assert_eq!(session.host, "broker.example.com");
        assert_eq!(session.port, 9883);
        assert!(session.tls);
        assert_eq!(session.keepalive, Duration::from_secs(30));
    }

    #[test]
    fn test_configure_mqtt_options_applies_identity_and_will() {
        let config = SessionConfig::new("localhost", 1883, "sensor_simulator")
            .with_credentials(Some("user".to_string()), Some("pw".to_string()));
        let will = WillMessage {
            topic: "sensor/status".to_string(),
            payload: b"offline".to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
        };

        let options = configure_mqtt_options(&config, Some(&will));
        assert_eq!(options.client_id(), "sensor_simulator");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));

        let lwt = options.last_will().unwrap();
        assert_eq!(lwt.topic, "sensor/status");
        assert!(lwt.retain);
    }

    #[test]
    fn test_session_error_display() {
        let errors = vec![
            SessionError::ConnectionFailed("refused".to_string()),
            SessionError::ConnectTimeout(Duration::from_secs(1)),
            SessionError::PublishFailed("test".to_string().into()),
            SessionError::InvalidBrokerUrl("test".to_string()),
            SessionError::NotConnected {
                state: SessionState::Disconnected,
            },
            SessionError::WillAfterConnect,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
