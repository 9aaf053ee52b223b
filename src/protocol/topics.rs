//! Topic layout and device ID validation for the sensor simulator
//!
//! Telemetry views are published under `sensor/`, action requests arrive under
//! `action/`, and acknowledgments are published under `action/ack/`.

use thiserror::Error;

/// Combined reading (every sensor in one envelope)
pub const SENSOR_ALL_TOPIC: &str = "sensor/all";
/// CPU temperature view
pub const SENSOR_TEMPERATURE_TOPIC: &str = "sensor/temperature";
/// Compass heading view
pub const SENSOR_COMPASS_TOPIC: &str = "sensor/compass";
/// GPS position view
pub const SENSOR_GPS_TOPIC: &str = "sensor/gps";
/// Retained device status (ONLINE / OFFLINE / ERROR)
pub const SENSOR_STATUS_TOPIC: &str = "sensor/status";

/// Root of every action request topic
pub const ACTION_ROOT: &str = "action";
/// Wildcard subscription covering every action sub-topic
pub const ACTION_WILDCARD_TOPIC: &str = "action/#";
/// Prefix joined with a request's ack topic
pub const ACTION_ACK_PREFIX: &str = "action/ack/";

/// Extract the action name from a request's target topic.
///
/// The name is the final `/`-separated segment; a target without any `/`
/// is its own name.
///
/// ```
/// use sensor_sim::protocol::action_name;
///
/// assert_eq!(action_name("action/device/reboot"), "reboot");
/// assert_eq!(action_name("reboot"), "reboot");
/// ```
pub fn action_name(target_topic: &str) -> &str {
    match target_topic.rfind('/') {
        Some(idx) => &target_topic[idx + 1..],
        None => target_topic,
    }
}

/// Build the acknowledgment topic: `action/ack/{ack_topic}`
pub fn ack_topic(ack_topic: &str) -> String {
    format!("{ACTION_ACK_PREFIX}{ack_topic}")
}

/// Build the request topic for an action path: `action/{path}`
pub fn action_topic(path: &str) -> String {
    format!("{ACTION_ROOT}/{}", path.trim_start_matches('/'))
}

/// True for topics in the acknowledgment namespace.
///
/// The device subscribes to `action/#`, so its own acknowledgments are
/// delivered back to it and must not be treated as requests.
pub fn is_ack_topic(topic: &str) -> bool {
    topic.starts_with(ACTION_ACK_PREFIX)
}

pub fn validate_device_id(device_id: &str) -> Result<(), ValidationError> {
    if device_id.is_empty() {
        return Err(ValidationError::EmptyDeviceId);
    }

    for ch in device_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidDeviceIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for device identity
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Device ID cannot be empty")]
    EmptyDeviceId,
    #[error("Device ID contains invalid character: '{0}'")]
    InvalidDeviceIdChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn action_name_is_last_segment(
            prefix in "[a-z]{1,8}(/[a-z]{1,8}){0,3}",
            name in "[a-zA-Z0-9_-]{1,16}"
        ) {
            let target = format!("{prefix}/{name}");
            prop_assert_eq!(action_name(&target), name.as_str());
        }

        #[test]
        fn action_name_never_contains_separator(topic in ".*") {
            prop_assert!(!action_name(&topic).contains('/'));
        }

        #[test]
        fn valid_device_id_format(id in "[a-zA-Z0-9._-]{1,64}") {
            prop_assert!(validate_device_id(&id).is_ok(), "Valid device ID should pass: {}", id);
        }
    }

    #[test]
    fn test_action_name_examples() {
        assert_eq!(action_name("action/device/reboot"), "reboot");
        assert_eq!(action_name("action/message"), "message");
        assert_eq!(action_name("reboot"), "reboot");
        assert_eq!(action_name("action/device/"), "");
        assert_eq!(action_name(""), "");
    }

    #[test]
    fn test_ack_topic_construction() {
        assert_eq!(ack_topic("dev1"), "action/ack/dev1");
        assert_eq!(ack_topic("ops/console-7"), "action/ack/ops/console-7");
    }

    #[test]
    fn test_action_topic_construction() {
        assert_eq!(action_topic("device/reboot"), "action/device/reboot");
        assert_eq!(action_topic("/device/reboot"), "action/device/reboot");
    }

    #[test]
    fn test_ack_namespace_detection() {
        assert!(is_ack_topic("action/ack/dev1"));
        assert!(!is_ack_topic("action/device/reboot"));
        assert!(!is_ack_topic("action/acknowledge"));
    }

    #[test]
    fn test_device_id_validation_examples() {
        assert!(validate_device_id("sensor_simulator").is_ok());
        assert!(validate_device_id("imx8mp-01.lab").is_ok());

        assert_eq!(validate_device_id(""), Err(ValidationError::EmptyDeviceId));
        assert_eq!(
            validate_device_id("device/1"),
            Err(ValidationError::InvalidDeviceIdChar('/'))
        );
        assert_eq!(
            validate_device_id("device 1"),
            Err(ValidationError::InvalidDeviceIdChar(' '))
        );
    }
}
