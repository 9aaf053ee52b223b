//! Crate-wide error type for the sensor simulator
//!
//! Module-level errors convert into [`SimulatorError`]. Any error can be
//! turned into an ERROR status envelope for `sensor/status`, with sensitive
//! details stripped first.

use crate::protocol::DeviceStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for simulator operations
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] crate::transport::mqtt::SessionError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] crate::encoding::EncodingError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] crate::device::LifecycleError),

    #[error("Handler failed for action {action}: {reason}")]
    HandlerFault { action: String, reason: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SimulatorError {
    /// Convert into an ERROR status suitable for publishing
    pub fn to_status(&self, device_id: &str) -> DeviceStatus {
        DeviceStatus::error(device_id, sanitize_error_message(&self.to_string()))
    }

    pub fn handler_fault<A: Into<String>, R: Into<String>>(action: A, reason: R) -> Self {
        Self::HandlerFault {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").ok());

static SECRET_PATH_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+").ok()
});

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Strip credentials and secret-looking paths, then cap the length
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    if let Some(pattern) = SECRET_PATTERN.as_ref() {
        sanitized = pattern.replace_all(&sanitized, "${1}=***").to_string();
    }

    if let Some(pattern) = SECRET_PATH_PATTERN.as_ref() {
        sanitized = pattern
            .replace_all(&sanitized, "/***REDACTED***/")
            .to_string();
    }

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for simulator operations
pub type SimulatorResult<T> = Result<T, SimulatorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusKind;

    #[test]
    fn test_error_status_creation() {
        let error = SimulatorError::internal("sensor bus stalled");
        let status = error.to_status("dev");

        assert_eq!(status.status, StatusKind::Error);
        assert_eq!(status.device_id, "dev");
        assert_eq!(status.message, "Internal error: sensor bus stalled");
    }

    #[test]
    fn test_handler_fault_message() {
        let error = SimulatorError::handler_fault("reboot", "watchdog busy");
        assert_eq!(
            error.to_string(),
            "Handler failed for action reboot: watchdog busy"
        );
    }

    #[test]
    fn test_status_message_is_sanitized() {
        let error =
            SimulatorError::internal("Failed to authenticate: password=secret123 token=abc456");
        let status = error.to_status("dev");

        assert!(!status.message.contains("secret123"));
        assert!(!status.message.contains("abc456"));
        assert!(status.message.contains("password=***"));
        assert!(status.message.contains("token=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_file_path_redaction() {
        let sanitized =
            sanitize_error_message("Failed to read /home/user/.ssh/id_rsa and /etc/secrets/api.key");
        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("/home/user/.ssh/id_rsa"));
    }

    #[test]
    fn test_sanitize_case_insensitive_and_colons() {
        let sanitized = sanitize_error_message("PASSWORD=secret123 token: abc456 Key=xyz");
        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
        assert!(!sanitized.contains("xyz"));
    }

    #[test]
    fn test_sanitize_exactly_500_chars() {
        let sanitized = sanitize_error_message(&"x".repeat(500));
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }
}
