//! Transport layer for the simulated device
//!
//! This module provides the transport abstraction the publisher drives, plus
//! the MQTT implementation. Inbound broker activity is delivered as
//! [`SessionEvent`]s over a single ordered channel.
//!
//! # Event delivery
//!
//! Events are produced only by the background context started with
//! [`Transport::loop_start`], never synchronously inside `connect` or
//! `publish`. The event sender is owned by that context, so once
//! [`Transport::loop_stop`] returns no further event can be produced and the
//! receiver reports the channel closed after the buffered events drain.

use tokio::sync::mpsc;

pub mod mqtt;

pub use rumqttc::v5::mqttbytes::QoS;

/// Session connection state
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Terminal until the session is recreated
    Failed(String),
}

/// Message the broker publishes on the session's behalf after an unclean drop
#[derive(Debug, Clone, PartialEq)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Broker activity observed by the background context
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected { session_present: bool },
    Disconnected { reason: String },
    Published { message_id: u16 },
    Message {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
}

/// Transport trait for device communication
///
/// All methods take `&self`; implementations synchronize internally so the
/// publisher's cadence and the action dispatcher can share one session.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Configure the last-will message; only valid before `connect`
    async fn set_will(&self, will: WillMessage) -> Result<(), Self::Error>;

    /// Establish the session and wait for the broker's acknowledgment
    async fn connect(&self) -> Result<(), Self::Error>;

    /// Idempotent; a no-op when already disconnected
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Reflects the last confirmation seen by the background context
    fn is_connected(&self) -> bool;

    fn state(&self) -> SessionState;

    /// Fails without queueing when not connected
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error>;

    async fn publish_retained(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), Self::Error> {
        self.publish(topic, payload, qos, true).await
    }

    /// Subscriptions are tracked and restored after reconnection
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Start the background context servicing the connection
    async fn loop_start(&self) -> Result<(), Self::Error>;

    /// Stop the background context and wait until it has fully quiesced
    async fn loop_stop(&self) -> Result<(), Self::Error>;

    /// Hand out the event receiver; `None` once it has been taken
    async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>>;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttSession;
