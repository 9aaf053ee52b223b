//! MQTT session implementation for the sensor simulator
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure session configuration and error types
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`health_monitor`] - Pure reconnection decisions and state transitions
//! - [`event_loop`] - The background context that services the connection
//! - [`session`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use sensor_sim::transport::mqtt::{MqttSession, SessionConfig};
//! use sensor_sim::transport::{QoS, Transport};
//!
//! # tokio_test::block_on(async {
//! let session = MqttSession::new(SessionConfig::new("localhost", 1883, "sensor_simulator"));
//! session.connect().await?;
//! session.loop_start().await?;
//! session.publish("sensor/all", b"{}".to_vec(), QoS::AtMostOnce, false).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod event_loop;
pub mod health_monitor;
pub mod message_handler;
pub mod session;

pub use connection::{configure_mqtt_options, ReconnectConfig, SessionConfig, SessionError};
pub use event_loop::{BackgroundLoop, EventSource, LoopContext};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
pub use session::MqttSession;
