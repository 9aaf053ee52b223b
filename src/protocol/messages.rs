//! Protocol message types for the sensor simulator
//!
//! These are the wire-independent shapes of everything the device sends or
//! receives. The `encoding` module turns them into protobuf or JSON bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error text carried by acknowledgments for unknown actions
pub const NO_HANDLER_ERROR: &str = "No handler found";

/// Inbound request to invoke a named action
///
/// # Examples
/// ```
/// use sensor_sim::protocol::ActionRequest;
///
/// let request = ActionRequest {
///     target_topic: "action/device/reboot".to_string(),
///     ack_topic: Some("dev1".to_string()),
///     payload: b"now".to_vec(),
/// };
/// assert_eq!(request.action_name(), "reboot");
/// assert_eq!(request.ack_destination().as_deref(), Some("action/ack/dev1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    /// Qualified action path; the last segment names the action
    pub target_topic: String,
    /// Requester's correlation topic (no acknowledgment when absent or empty)
    pub ack_topic: Option<String>,
    /// Opaque argument bytes handed to the handler
    pub payload: Vec<u8>,
}

impl ActionRequest {
    /// Name used to resolve the handler
    pub fn action_name(&self) -> &str {
        super::topics::action_name(&self.target_topic)
    }

    /// Full topic the acknowledgment goes to, if one was requested
    pub fn ack_destination(&self) -> Option<String> {
        self.ack_topic
            .as_deref()
            .filter(|topic| !topic.is_empty())
            .map(super::topics::ack_topic)
    }
}

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub found: bool,
    pub output: String,
    pub error: String,
}

impl ActionResult {
    pub fn handled(output: impl Into<String>) -> Self {
        Self {
            found: true,
            output: output.into(),
            error: String::new(),
        }
    }

    /// Normal outcome for an unregistered action; the output names it
    pub fn missing(action: &str) -> Self {
        Self {
            found: false,
            output: format!("No handler for action: {action}"),
            error: NO_HANDLER_ERROR.to_string(),
        }
    }

    /// Handler existed but faulted while running
    pub fn faulted(reason: &str) -> Self {
        Self {
            found: true,
            output: String::new(),
            error: format!("Handler failed: {reason}"),
        }
    }

    /// Whether the acknowledgment should report success
    pub fn succeeded(&self) -> bool {
        self.found && self.error.is_empty()
    }
}

/// Acknowledgment correlating one result back to its requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionAck {
    /// Action name the acknowledgment answers
    #[serde(rename = "ack")]
    pub action: String,
    pub success: bool,
    /// Empty on success
    pub error: String,
    pub result: String,
}

impl ActionAck {
    pub fn from_result(action: &str, result: &ActionResult) -> Self {
        Self {
            action: action.to_string(),
            success: result.succeeded(),
            error: result.error.clone(),
            result: result.output.clone(),
        }
    }
}

/// Device availability states published on `sensor/status`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusKind {
    Online,
    Offline,
    Error,
}

/// Status envelope content
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub status: StatusKind,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl DeviceStatus {
    pub fn online(device_id: &str) -> Self {
        Self::new(StatusKind::Online, device_id, "Sensor simulator online")
    }

    pub fn offline(device_id: &str) -> Self {
        Self::new(StatusKind::Offline, device_id, "Sensor simulator offline")
    }

    pub fn error(device_id: &str, message: impl Into<String>) -> Self {
        Self::new(StatusKind::Error, device_id, message)
    }

    fn new(status: StatusKind, device_id: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            device_id: device_id.to_string(),
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    /// Epoch milliseconds, as carried on the wire
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// One telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Degrees Celsius
    pub cpu_temperature: f64,
    /// Degrees in `[0, 360)`
    pub compass_heading: f64,
    /// Decimal degrees
    pub latitude: f64,
    /// Decimal degrees
    pub longitude: f64,
    /// Metres
    pub altitude: f64,
    pub timestamp: DateTime<Utc>,
}
