//! JSON views of telemetry, status and actions
//!
//! Timestamps are ISO 8601 with millisecond precision. Temperature, heading
//! and altitude are rounded to two decimals, coordinates to six.

use crate::protocol::{ActionAck, ActionRequest, DeviceStatus, SensorReading, StatusKind};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::protobuf::{GPS_ACCURACY_METERS, SENSOR_DATA_VERSION};

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn iso_millis(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsJson {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f64,
}

impl GpsJson {
    fn from_reading(reading: &SensorReading) -> Self {
        Self {
            latitude: round_to(reading.latitude, 6),
            longitude: round_to(reading.longitude, 6),
            altitude: round_to(reading.altitude, 2),
            accuracy: GPS_ACCURACY_METERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDataJson {
    pub device_id: String,
    pub version: String,
    pub timestamp: String,
    pub cpu_temperature: f64,
    pub compass_heading: f64,
    pub gps: GpsJson,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureJson {
    pub temperature: f64,
    pub unit: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompassJson {
    pub heading: f64,
    pub unit: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsPositionJson {
    pub position: GpsJson,
    pub unit: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusJson {
    pub status: StatusKind,
    pub device_id: String,
    pub timestamp: String,
    pub message: String,
}

/// JSON request shape; the payload is carried as a UTF-8 string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequestJson {
    pub topic: String,
    #[serde(default)]
    pub ack_topic: String,
    #[serde(default)]
    pub payload: String,
}

pub fn encode_sensor_data(
    reading: &SensorReading,
    device_id: &str,
) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&SensorDataJson {
        device_id: device_id.to_string(),
        version: SENSOR_DATA_VERSION.to_string(),
        timestamp: iso_millis(&reading.timestamp),
        cpu_temperature: round_to(reading.cpu_temperature, 2),
        compass_heading: round_to(reading.compass_heading, 2),
        gps: GpsJson::from_reading(reading),
    })
}

pub fn encode_temperature(reading: &SensorReading) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&TemperatureJson {
        temperature: round_to(reading.cpu_temperature, 2),
        unit: "celsius".to_string(),
        timestamp: iso_millis(&reading.timestamp),
    })
}

pub fn encode_compass(reading: &SensorReading) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&CompassJson {
        heading: round_to(reading.compass_heading, 2),
        unit: "degrees".to_string(),
        timestamp: iso_millis(&reading.timestamp),
    })
}

pub fn encode_gps(reading: &SensorReading) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&GpsPositionJson {
        position: GpsJson::from_reading(reading),
        unit: "decimal_degrees".to_string(),
        timestamp: iso_millis(&reading.timestamp),
    })
}

pub fn encode_status(status: &DeviceStatus) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&StatusJson {
        status: status.status,
        device_id: status.device_id.clone(),
        timestamp: iso_millis(&status.timestamp),
        message: status.message.clone(),
    })
}

pub fn decode_status(bytes: &[u8]) -> Result<StatusJson, serde_json::Error> {
    serde_json::from_slice(bytes)
}

pub fn decode_action_request(bytes: &[u8]) -> Result<ActionRequest, serde_json::Error> {
    let message: ActionRequestJson = serde_json::from_slice(bytes)?;
    Ok(ActionRequest {
        target_topic: message.topic,
        ack_topic: Some(message.ack_topic).filter(|topic| !topic.is_empty()),
        payload: message.payload.into_bytes(),
    })
}

/// Non-UTF-8 payload bytes are replaced lossily
pub fn encode_action_request(request: &ActionRequest) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&ActionRequestJson {
        topic: request.target_topic.clone(),
        ack_topic: request.ack_topic.clone().unwrap_or_default(),
        payload: String::from_utf8_lossy(&request.payload).into_owned(),
    })
}

pub fn encode_ack(ack: &ActionAck) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(ack)
}

pub fn decode_ack(bytes: &[u8]) -> Result<ActionAck, serde_json::Error> {
    serde_json::from_slice(bytes)
}
