//! Sensor Simulator - MQTT telemetry device
//!
//! Simulates a telemetry-producing device: it publishes CPU temperature,
//! compass heading and GPS position over MQTT, announces its availability on
//! a retained status topic (with an OFFLINE last will), and answers remote
//! action requests with structured acknowledgments.
//!
//! # Overview
//!
//! - [`transport`] - Broker session with a background event loop and reconnection
//! - [`actions`] - Action registry and request/acknowledgment dispatch
//! - [`device`] - Publisher lifecycle and cooperative shutdown
//! - [`encoding`] - Protobuf and JSON wire encoders
//! - [`telemetry`] - Random-walk sensor generator
//!
//! # Quick Start
//!
//! ```rust
//! use sensor_sim::actions::{register_builtin_actions, ActionRegistry};
//! use sensor_sim::encoding::{self, WireFormat};
//! use sensor_sim::protocol::{ActionAck, ActionRequest};
//!
//! let mut registry = ActionRegistry::new();
//! register_builtin_actions(&mut registry);
//!
//! let request = ActionRequest {
//!     target_topic: "action/device/reboot".to_string(),
//!     ack_topic: Some("dev1".to_string()),
//!     payload: b"now".to_vec(),
//! };
//! let result = registry.dispatch(request.action_name(), &request.payload);
//! let ack = ActionAck::from_result(request.action_name(), &result);
//!
//! assert!(ack.success);
//! assert_eq!(ack.result, "Rebooted successfully");
//! let bytes = encoding::encode_ack(WireFormat::Json, &ack).unwrap();
//! assert!(!bytes.is_empty());
//! ```

pub mod actions;
pub mod config;
pub mod device;
pub mod encoding;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use actions::{ActionDispatcher, ActionRegistry, InboundDisposition};
pub use config::SimulatorConfig;
pub use device::{Publisher, PublisherSettings, PublisherState, ShutdownHandle};
pub use encoding::WireFormat;
pub use error::{SimulatorError, SimulatorResult};
pub use transport::mqtt::MqttSession;
pub use transport::{SessionEvent, SessionState, Transport};
