//! Pure reconnection logic for the MQTT session
//!
//! This module contains pure functions for reconnection decisions and
//! session state transitions.

use super::connection::ReconnectConfig;
use crate::transport::SessionState;
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted (pure function)
    /// Supports unlimited retries when max_attempts is None
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded { max_attempts };
            }
        }

        ReconnectionDecision::Proceed {
            attempt: current_attempts + 1,
            delay_ms: config.calculate_backoff_delay(current_attempts + 1),
        }
    }

    /// Determine next state after connection event (pure function)
    pub fn determine_next_state(event: ConnectionEvent) -> SessionState {
        match event {
            ConnectionEvent::ConnAckReceived => SessionState::Connected,
            ConnectionEvent::DisconnectedByBroker
            | ConnectionEvent::NetworkError(_)
            | ConnectionEvent::ClosedByClient => SessionState::Disconnected,
            ConnectionEvent::ReconnectionStarted(_) => SessionState::Connecting,
            ConnectionEvent::PermanentFailure(reason) => SessionState::Failed(reason),
        }
    }

    /// Check if session state allows publishing (pure function)
    pub fn can_publish(state: &SessionState) -> bool {
        matches!(state, SessionState::Connected)
    }

    /// Log session state transition (pure logging function)
    pub fn log_state_transition(from: &SessionState, to: &SessionState) {
        match (from, to) {
            (SessionState::Connecting, SessionState::Connected) => {
                info!("MQTT session established");
            }
            (SessionState::Connected, SessionState::Disconnected) => {
                warn!("MQTT session lost");
            }
            (_, SessionState::Failed(reason)) => {
                error!("MQTT session permanently failed: {}", reason);
            }
            _ => {
                tracing::debug!(target: "mqtt_transport", "MQTT session state: {:?} -> {:?}", from, to);
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded { max_attempts: u32 },
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// ConnAck received from broker
    ConnAckReceived,
    /// Broker initiated disconnect
    DisconnectedByBroker,
    /// Network or protocol error
    NetworkError(String),
    /// Local disconnect requested
    ClosedByClient,
    /// Reconnection attempt started
    ReconnectionStarted(u32),
    /// No more retries
    PermanentFailure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern_config(max_attempts: Option<u32>) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }

    #[test]
    fn test_should_attempt_reconnection() {
        let config = pattern_config(None);

        let decision = HealthMonitor::should_attempt_reconnection(0, &config, false);
        assert_eq!(
            decision,
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay_ms: 25
            }
        );

        let decision = HealthMonitor::should_attempt_reconnection(0, &config, true);
        assert_eq!(decision, ReconnectionDecision::AbortShutdownRequested);

        let decision = HealthMonitor::should_attempt_reconnection(5, &config, false);
        assert_eq!(
            decision,
            ReconnectionDecision::Proceed {
                attempt: 6,
                delay_ms: 250
            }
        );
    }

    #[test]
    fn test_max_attempts_exceeded() {
        let config = pattern_config(Some(5));

        assert!(matches!(
            HealthMonitor::should_attempt_reconnection(4, &config, false),
            ReconnectionDecision::Proceed { attempt: 5, .. }
        ));
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(5, &config, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded { max_attempts: 5 }
        );
    }

    #[test]
    fn test_determine_next_state() {
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::ConnAckReceived),
            SessionState::Connected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::DisconnectedByBroker),
            SessionState::Disconnected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::NetworkError(
                "timeout".to_string()
            )),
            SessionState::Disconnected
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::ReconnectionStarted(1)),
            SessionState::Connecting
        );
        assert_eq!(
            HealthMonitor::determine_next_state(ConnectionEvent::PermanentFailure(
                "max attempts".to_string()
            )),
            SessionState::Failed("max attempts".to_string())
        );
    }

    #[test]
    fn test_can_publish() {
        assert!(HealthMonitor::can_publish(&SessionState::Connected));
        assert!(!HealthMonitor::can_publish(&SessionState::Connecting));
        assert!(!HealthMonitor::can_publish(&SessionState::Disconnected));
        assert!(!HealthMonitor::can_publish(&SessionState::Failed(
            "test".to_string()
        )));
    }
}
