//! Actions every simulated device answers out of the box

use super::registry::ActionRegistry;
use tracing::info;

pub const REBOOT_ACTION: &str = "reboot";
pub const MESSAGE_ACTION: &str = "message";

/// Simulated reboot; the device keeps running
pub fn reboot(payload: &[u8]) -> String {
    info!(payload = %String::from_utf8_lossy(payload), "Reboot requested");
    "Rebooted successfully".to_string()
}

/// Logs the operator's message and reports health
pub fn message(payload: &[u8]) -> String {
    info!(payload = %String::from_utf8_lossy(payload), "Message received");
    "Status: OK".to_string()
}

pub fn register_builtin_actions(registry: &mut ActionRegistry) {
    registry.register(REBOOT_ACTION, reboot);
    registry.register(MESSAGE_ACTION, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_actions_registered() {
        let mut registry = ActionRegistry::new();
        register_builtin_actions(&mut registry);

        assert_eq!(registry.names(), vec!["message", "reboot"]);
        assert_eq!(registry.dispatch("reboot", b"now").output, "Rebooted successfully");
        assert_eq!(registry.dispatch("message", b"hello").output, "Status: OK");
    }

    #[test]
    fn test_handlers_accept_non_utf8_payloads() {
        assert_eq!(message(&[0xff, 0xfe]), "Status: OK");
    }
}
