//! Wire encoders for everything the device sends or receives
//!
//! The same [`WireFormat`] is used for telemetry, status envelopes and the
//! action protocol, so a deployment is either all-protobuf or all-JSON.

pub mod json;
pub mod protobuf;

use crate::protocol::{
    ActionAck, ActionRequest, DeviceStatus, SensorReading, SENSOR_ALL_TOPIC,
    SENSOR_COMPASS_TOPIC, SENSOR_GPS_TOPIC, SENSOR_TEMPERATURE_TOPIC,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Protobuf,
    Json,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Protobuf => write!(f, "protobuf"),
            WireFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "protobuf" | "proto" | "pb" => Ok(WireFormat::Protobuf),
            "json" => Ok(WireFormat::Json),
            other => Err(EncodingError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Protobuf decode failed: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown wire format: {0}")]
    UnknownFormat(String),
}

/// Encode every telemetry view of one reading, paired with its topic.
///
/// Order is fixed: combined, temperature, compass, GPS.
pub fn encode_reading_views(
    format: WireFormat,
    reading: &SensorReading,
    device_id: &str,
) -> Result<Vec<(&'static str, Vec<u8>)>, EncodingError> {
    Ok(match format {
        WireFormat::Protobuf => vec![
            (SENSOR_ALL_TOPIC, protobuf::encode_sensor_data(reading, device_id)),
            (SENSOR_TEMPERATURE_TOPIC, protobuf::encode_temperature(reading)),
            (SENSOR_COMPASS_TOPIC, protobuf::encode_compass(reading)),
            (SENSOR_GPS_TOPIC, protobuf::encode_gps(reading)),
        ],
        WireFormat::Json => vec![
            (SENSOR_ALL_TOPIC, json::encode_sensor_data(reading, device_id)?),
            (SENSOR_TEMPERATURE_TOPIC, json::encode_temperature(reading)?),
            (SENSOR_COMPASS_TOPIC, json::encode_compass(reading)?),
            (SENSOR_GPS_TOPIC, json::encode_gps(reading)?),
        ],
    })
}

pub fn encode_status(format: WireFormat, status: &DeviceStatus) -> Result<Vec<u8>, EncodingError> {
    match format {
        WireFormat::Protobuf => Ok(protobuf::encode_status(status)),
        WireFormat::Json => Ok(json::encode_status(status)?),
    }
}

pub fn decode_action_request(
    format: WireFormat,
    bytes: &[u8],
) -> Result<ActionRequest, EncodingError> {
    match format {
        WireFormat::Protobuf => Ok(protobuf::decode_action_request(bytes)?),
        WireFormat::Json => Ok(json::decode_action_request(bytes)?),
    }
}

pub fn encode_action_request(
    format: WireFormat,
    request: &ActionRequest,
) -> Result<Vec<u8>, EncodingError> {
    match format {
        WireFormat::Protobuf => Ok(protobuf::encode_action_request(request)),
        WireFormat::Json => Ok(json::encode_action_request(request)?),
    }
}

pub fn encode_ack(format: WireFormat, ack: &ActionAck) -> Result<Vec<u8>, EncodingError> {
    match format {
        WireFormat::Protobuf => Ok(protobuf::encode_ack(ack)),
        WireFormat::Json => Ok(json::encode_ack(ack)?),
    }
}

pub fn decode_ack(format: WireFormat, bytes: &[u8]) -> Result<ActionAck, EncodingError> {
    match format {
        WireFormat::Protobuf => Ok(protobuf::decode_ack(bytes)?),
        WireFormat::Json => Ok(json::decode_ack(bytes)?),
    }
}
