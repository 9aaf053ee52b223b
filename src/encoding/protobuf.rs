//! Protobuf envelopes for telemetry, status and actions
//!
//! Message definitions are declared with `prost` derives rather than generated
//! from `.proto` files, so no build script or `protoc` is required.

use crate::protocol::{ActionAck, ActionRequest, DeviceStatus, SensorReading, StatusKind};
use prost::Message;

/// Fixed horizontal accuracy reported with every GPS fix, in metres
pub const GPS_ACCURACY_METERS: f64 = 5.0;
/// Schema version stamped into combined readings
pub const SENSOR_DATA_VERSION: &str = "1.0";

#[derive(Clone, PartialEq, Message)]
pub struct GpsPosition {
    #[prost(double, tag = "1")]
    pub latitude: f64,
    #[prost(double, tag = "2")]
    pub longitude: f64,
    #[prost(double, tag = "3")]
    pub altitude: f64,
    #[prost(double, tag = "4")]
    pub accuracy: f64,
}

/// `sensor/all`
#[derive(Clone, PartialEq, Message)]
pub struct SensorData {
    #[prost(double, tag = "1")]
    pub cpu_temperature: f64,
    #[prost(double, tag = "2")]
    pub compass_heading: f64,
    #[prost(message, optional, tag = "3")]
    pub gps: Option<GpsPosition>,
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
    #[prost(string, tag = "5")]
    pub device_id: String,
    #[prost(string, tag = "6")]
    pub version: String,
}

/// `sensor/temperature`
#[derive(Clone, PartialEq, Message)]
pub struct TemperatureData {
    #[prost(double, tag = "1")]
    pub temperature: f64,
    #[prost(string, tag = "2")]
    pub unit: String,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}

/// `sensor/compass`
#[derive(Clone, PartialEq, Message)]
pub struct CompassData {
    #[prost(double, tag = "1")]
    pub heading: f64,
    #[prost(string, tag = "2")]
    pub unit: String,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}

/// `sensor/gps`
#[derive(Clone, PartialEq, Message)]
pub struct GpsPositionData {
    #[prost(message, optional, tag = "1")]
    pub position: Option<GpsPosition>,
    #[prost(string, tag = "2")]
    pub unit: String,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Online = 0,
    Offline = 1,
    Error = 2,
}

impl From<StatusKind> for StatusCode {
    fn from(kind: StatusKind) -> Self {
        match kind {
            StatusKind::Online => StatusCode::Online,
            StatusKind::Offline => StatusCode::Offline,
            StatusKind::Error => StatusCode::Error,
        }
    }
}

impl From<StatusCode> for StatusKind {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Online => StatusKind::Online,
            StatusCode::Offline => StatusKind::Offline,
            StatusCode::Error => StatusKind::Error,
        }
    }
}

/// `sensor/status`
#[derive(Clone, PartialEq, Message)]
pub struct StatusMessage {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub device_id: String,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    #[prost(string, tag = "4")]
    pub message: String,
}

/// Inbound request envelope
#[derive(Clone, PartialEq, Message)]
pub struct ActionRequestMessage {
    #[prost(string, tag = "1")]
    pub topic: String,
    #[prost(string, tag = "2")]
    pub ack_topic: String,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

/// Outbound acknowledgment envelope
#[derive(Clone, PartialEq, Message)]
pub struct ActionAckMessage {
    #[prost(string, tag = "1")]
    pub ack: String,
    #[prost(bool, tag = "2")]
    pub success: bool,
    #[prost(string, tag = "3")]
    pub error: String,
    #[prost(string, tag = "4")]
    pub result: String,
}

fn gps_position(reading: &SensorReading) -> GpsPosition {
    GpsPosition {
        latitude: reading.latitude,
        longitude: reading.longitude,
        altitude: reading.altitude,
        accuracy: GPS_ACCURACY_METERS,
    }
}

pub fn encode_sensor_data(reading: &SensorReading, device_id: &str) -> Vec<u8> {
    SensorData {
        cpu_temperature: reading.cpu_temperature,
        compass_heading: reading.compass_heading,
        gps: Some(gps_position(reading)),
        timestamp: reading.timestamp.timestamp_millis(),
        device_id: device_id.to_string(),
        version: SENSOR_DATA_VERSION.to_string(),
    }
    .encode_to_vec()
}

pub fn encode_temperature(reading: &SensorReading) -> Vec<u8> {
    TemperatureData {
        temperature: reading.cpu_temperature,
        unit: "celsius".to_string(),
        timestamp: reading.timestamp.timestamp_millis(),
    }
    .encode_to_vec()
}

pub fn encode_compass(reading: &SensorReading) -> Vec<u8> {
    CompassData {
        heading: reading.compass_heading,
        unit: "degrees".to_string(),
        timestamp: reading.timestamp.timestamp_millis(),
    }
    .encode_to_vec()
}

pub fn encode_gps(reading: &SensorReading) -> Vec<u8> {
    GpsPositionData {
        position: Some(gps_position(reading)),
        unit: "decimal_degrees".to_string(),
        timestamp: reading.timestamp.timestamp_millis(),
    }
    .encode_to_vec()
}

pub fn encode_status(status: &DeviceStatus) -> Vec<u8> {
    StatusMessage {
        status: StatusCode::from(status.status) as i32,
        device_id: status.device_id.clone(),
        timestamp: status.timestamp_millis(),
        message: status.message.clone(),
    }
    .encode_to_vec()
}

pub fn decode_status(bytes: &[u8]) -> Result<StatusMessage, prost::DecodeError> {
    StatusMessage::decode(bytes)
}

pub fn decode_action_request(bytes: &[u8]) -> Result<ActionRequest, prost::DecodeError> {
    let message = ActionRequestMessage::decode(bytes)?;
    Ok(ActionRequest {
        target_topic: message.topic,
        ack_topic: Some(message.ack_topic).filter(|topic| !topic.is_empty()),
        payload: message.payload,
    })
}

pub fn encode_action_request(request: &ActionRequest) -> Vec<u8> {
    ActionRequestMessage {
        topic: request.target_topic.clone(),
        ack_topic: request.ack_topic.clone().unwrap_or_default(),
        payload: request.payload.clone(),
    }
    .encode_to_vec()
}

pub fn encode_ack(ack: &ActionAck) -> Vec<u8> {
    ActionAckMessage {
        ack: ack.action.clone(),
        success: ack.success,
        error: ack.error.clone(),
        result: ack.result.clone(),
    }
    .encode_to_vec()
}

pub fn decode_ack(bytes: &[u8]) -> Result<ActionAck, prost::DecodeError> {
    let message = ActionAckMessage::decode(bytes)?;
    Ok(ActionAck {
        action: message.ack,
        success: message.success,
        error: message.error,
        result: message.result,
    })
}
