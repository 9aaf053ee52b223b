//! Inbound action envelope handling
//!
//! Decodes requests arriving on `action/#`, resolves them through the
//! [`ActionRegistry`] and publishes the acknowledgment when the requester
//! asked for one. Runs on the event listener task, concurrently with the
//! publisher's telemetry cadence; the transport serializes the two.

use super::registry::ActionRegistry;
use crate::action_span;
use crate::encoding::{self, WireFormat};
use crate::error::SimulatorError;
use crate::observability::DeviceMetrics;
use crate::protocol::{is_ack_topic, ActionAck, ActionRequest, ActionResult, SENSOR_STATUS_TOPIC};
use crate::transport::{QoS, Transport};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn, Instrument};

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundDisposition {
    /// A handler was looked up (found or not) and the request answered
    Dispatched {
        action: String,
        result: ActionResult,
        ack: AckDelivery,
    },
    /// Envelope bytes could not be decoded
    Malformed(String),
    /// Decoded, or never decoded, but not a request this device acts on
    NotAnAction(String),
}

/// Acknowledgment outcome for a dispatched request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckDelivery {
    /// Request carried no acknowledgment topic
    NotRequested,
    Published { topic: String },
    /// Logged and counted; never retried
    Failed { topic: String, reason: String },
}

/// Routes decoded action requests to handlers and answers them
pub struct ActionDispatcher<T: Transport> {
    registry: Arc<ActionRegistry>,
    transport: Arc<T>,
    format: WireFormat,
    device_id: String,
    metrics: Arc<DeviceMetrics>,
}

impl<T: Transport> ActionDispatcher<T> {
    pub fn new(
        registry: Arc<ActionRegistry>,
        transport: Arc<T>,
        format: WireFormat,
        device_id: impl Into<String>,
        metrics: Arc<DeviceMetrics>,
    ) -> Self {
        Self {
            registry,
            transport,
            format,
            device_id: device_id.into(),
            metrics,
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Handle one message delivered on the action wildcard subscription
    pub async fn handle_message(
        &self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> InboundDisposition {
        if is_ack_topic(topic) {
            trace!(topic = %topic, "Ignoring message in the acknowledgment namespace");
            self.metrics.envelope_ignored();
            return InboundDisposition::NotAnAction("acknowledgment namespace".to_string());
        }
        if retain {
            // Still answered: the requester may be waiting on its ack topic
            debug!(topic = %topic, "Handling retained action request");
        }

        let request = match encoding::decode_action_request(self.format, payload) {
            Ok(request) => request,
            Err(e) => {
                debug!(topic = %topic, format = %self.format, "Dropping malformed action envelope: {}", e);
                self.metrics.envelope_malformed();
                return InboundDisposition::Malformed(e.to_string());
            }
        };

        // Only a missing target is dropped; an empty action name is answered as unknown
        if request.target_topic.is_empty() {
            trace!(topic = %topic, "Envelope names no action");
            self.metrics.envelope_ignored();
            return InboundDisposition::NotAnAction("envelope has no target topic".to_string());
        }

        self.dispatch(request).await
    }

    async fn dispatch(&self, request: ActionRequest) -> InboundDisposition {
        let span = action_span!(action = %request.action_name(), target = %request.target_topic);
        self.dispatch_in_span(request).instrument(span).await
    }

    async fn dispatch_in_span(&self, request: ActionRequest) -> InboundDisposition {
        let action = request.action_name().to_string();
        self.metrics.action_received();

        let registry = &self.registry;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            registry.dispatch(&action, &request.payload)
        }));

        let result = match outcome {
            Ok(result) if result.found => {
                debug!("Action handled");
                self.metrics.action_dispatched(&action);
                result
            }
            Ok(result) => {
                info!("No handler registered for action");
                self.metrics.action_missed();
                result
            }
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!(reason = %reason, "Action handler panicked");
                self.metrics.action_faulted(&action);
                self.publish_fault_status(&action, &reason).await;
                ActionResult::faulted(&reason)
            }
        };

        let ack = match request.ack_destination() {
            Some(topic) => self.publish_ack(&action, &result, topic).await,
            None => AckDelivery::NotRequested,
        };

        InboundDisposition::Dispatched {
            action,
            result,
            ack,
        }
    }

    async fn publish_ack(&self, action: &str, result: &ActionResult, topic: String) -> AckDelivery {
        let ack = ActionAck::from_result(action, result);
        let payload = match encoding::encode_ack(self.format, &ack) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic = %topic, "Failed to encode acknowledgment: {}", e);
                self.metrics.ack_failed();
                return AckDelivery::Failed {
                    topic,
                    reason: e.to_string(),
                };
            }
        };

        match self
            .transport
            .publish(&topic, payload, QoS::AtLeastOnce, false)
            .await
        {
            Ok(()) => {
                debug!(topic = %topic, success = ack.success, "Published acknowledgment");
                self.metrics.ack_published();
                AckDelivery::Published { topic }
            }
            Err(e) => {
                warn!(topic = %topic, "Failed to publish acknowledgment: {}", e);
                self.metrics.ack_failed();
                AckDelivery::Failed {
                    topic,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn publish_fault_status(&self, action: &str, reason: &str) {
        let status = SimulatorError::handler_fault(action, reason).to_status(&self.device_id);
        let payload = match encoding::encode_status(self.format, &status) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode error status: {}", e);
                self.metrics.status_failed();
                return;
            }
        };

        match self
            .transport
            .publish_retained(SENSOR_STATUS_TOPIC, payload, QoS::AtLeastOnce)
            .await
        {
            Ok(()) => self.metrics.status_published(),
            Err(e) => {
                warn!("Failed to publish error status: {}", e);
                self.metrics.status_failed();
            }
        }
    }
}

/// Best-effort text from a panic payload
fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::protobuf;
    use crate::protocol::{StatusKind, NO_HANDLER_ERROR};
    use crate::testing::MockTransport;

    fn registry() -> Arc<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        registry.register("reboot", |_| "Rebooted successfully".to_string());
        registry.register("explode", |_| panic!("disk on fire"));
        Arc::new(registry)
    }

    fn dispatcher(transport: Arc<MockTransport>) -> ActionDispatcher<MockTransport> {
        ActionDispatcher::new(
            registry(),
            transport,
            WireFormat::Protobuf,
            "dev1",
            Arc::new(DeviceMetrics::new()),
        )
    }

    fn envelope(target: &str, ack_topic: Option<&str>) -> Vec<u8> {
        protobuf::encode_action_request(&ActionRequest {
            target_topic: target.to_string(),
            ack_topic: ack_topic.map(str::to_string),
            payload: b"p".to_vec(),
        })
    }

    #[tokio::test]
    async fn test_known_action_is_acknowledged() {
        let transport = Arc::new(MockTransport::online());
        let dispatcher = dispatcher(transport.clone());

        let disposition = dispatcher
            .handle_message(
                "action/device/reboot",
                &envelope("action/device/reboot", Some("dev1")),
                false,
            )
            .await;

        assert_eq!(
            disposition,
            InboundDisposition::Dispatched {
                action: "reboot".to_string(),
                result: ActionResult::handled("Rebooted successfully"),
                ack: AckDelivery::Published {
                    topic: "action/ack/dev1".to_string()
                },
            }
        );

        let published = transport.published_on("action/ack/dev1").await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert!(!published[0].retain);

        let ack = protobuf::decode_ack(&published[0].payload).unwrap();
        assert_eq!(ack.action, "reboot");
        assert!(ack.success);
        assert_eq!(ack.error, "");
        assert_eq!(ack.result, "Rebooted successfully");
    }

    #[tokio::test]
    async fn test_empty_ack_topic_publishes_nothing() {
        let transport = Arc::new(MockTransport::online());
        let dispatcher = dispatcher(transport.clone());

        let disposition = dispatcher
            .handle_message("action/device/reboot", &envelope("action/device/reboot", Some("")), false)
            .await;

        assert!(matches!(
            disposition,
            InboundDisposition::Dispatched {
                ack: AckDelivery::NotRequested,
                ..
            }
        ));
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action_acknowledged_as_failure() {
        let transport = Arc::new(MockTransport::online());
        let dispatcher = dispatcher(transport.clone());

        dispatcher
            .handle_message("action/erase", &envelope("action/erase", Some("req")), false)
            .await;

        let published = transport.published_on("action/ack/req").await;
        let ack = protobuf::decode_ack(&published[0].payload).unwrap();
        assert_eq!(ack.action, "erase");
        assert!(!ack.success);
        assert_eq!(ack.error, NO_HANDLER_ERROR);
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained_and_reported() {
        let transport = Arc::new(MockTransport::online());
        let dispatcher = dispatcher(transport.clone());

        let disposition = dispatcher
            .handle_message("action/explode", &envelope("action/explode", Some("req")), false)
            .await;

        match disposition {
            InboundDisposition::Dispatched { result, .. } => {
                assert_eq!(result.error, "Handler failed: disk on fire");
            }
            other => panic!("unexpected disposition: {other:?}"),
        }

        let statuses = transport.published_on(SENSOR_STATUS_TOPIC).await;
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].retain);
        let status = protobuf::decode_status(&statuses[0].payload).unwrap();
        assert_eq!(StatusKind::from(status.status()), StatusKind::Error);
        assert!(status.message.contains("disk on fire"));

        let ack = protobuf::decode_ack(&transport.published_on("action/ack/req").await[0].payload)
            .unwrap();
        assert!(!ack.success);
    }

    #[tokio::test]
    async fn test_ack_namespace_is_not_an_action() {
        let transport = Arc::new(MockTransport::online());
        let dispatcher = dispatcher(transport.clone());
        let bytes = envelope("action/device/reboot", Some("dev1"));

        assert!(matches!(
            dispatcher.handle_message("action/ack/dev1", &bytes, false).await,
            InboundDisposition::NotAnAction(_)
        ));
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_retained_request_is_still_acknowledged() {
        let transport = Arc::new(MockTransport::online());
        let dispatcher = dispatcher(transport.clone());

        let disposition = dispatcher
            .handle_message(
                "action/device/reboot",
                &envelope("action/device/reboot", Some("dev1")),
                true,
            )
            .await;

        assert!(matches!(
            disposition,
            InboundDisposition::Dispatched {
                ack: AckDelivery::Published { .. },
                ..
            }
        ));
        let published = transport.published_on("action/ack/dev1").await;
        assert_eq!(published.len(), 1);
        let ack = protobuf::decode_ack(&published[0].payload).unwrap();
        assert_eq!(ack.action, "reboot");
        assert!(ack.success);
    }

    #[tokio::test]
    async fn test_trailing_slash_target_is_answered_as_unknown() {
        let transport = Arc::new(MockTransport::online());
        let dispatcher = dispatcher(transport.clone());

        let disposition = dispatcher
            .handle_message("action/device/", &envelope("action/device/", Some("dev1")), false)
            .await;

        assert!(matches!(
            disposition,
            InboundDisposition::Dispatched { ref action, ref result, .. }
                if action.is_empty() && !result.found
        ));
        let published = transport.published_on("action/ack/dev1").await;
        assert_eq!(published.len(), 1);
        let ack = protobuf::decode_ack(&published[0].payload).unwrap();
        assert_eq!(ack.action, "");
        assert!(!ack.success);
        assert_eq!(ack.error, NO_HANDLER_ERROR);
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_dropped() {
        let transport = Arc::new(MockTransport::online());
        let dispatcher = ActionDispatcher::new(
            registry(),
            transport.clone(),
            WireFormat::Json,
            "dev1",
            Arc::new(DeviceMetrics::new()),
        );

        let disposition = dispatcher
            .handle_message("action/device/reboot", b"{not json", false)
            .await;

        assert!(matches!(disposition, InboundDisposition::Malformed(_)));
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_target_is_not_an_action() {
        let transport = Arc::new(MockTransport::online());
        let dispatcher = dispatcher(transport.clone());

        let disposition = dispatcher
            .handle_message("action/x", &envelope("", Some("dev1")), false)
            .await;
        assert!(matches!(disposition, InboundDisposition::NotAnAction(_)));
    }

    #[tokio::test]
    async fn test_ack_failure_is_reported_not_retried() {
        let transport = Arc::new(MockTransport::new());
        let dispatcher = dispatcher(transport.clone());

        let disposition = dispatcher
            .handle_message(
                "action/device/reboot",
                &envelope("action/device/reboot", Some("dev1")),
                false,
            )
            .await;

        assert!(matches!(
            disposition,
            InboundDisposition::Dispatched {
                ack: AckDelivery::Failed { .. },
                ..
            }
        ));
        assert_eq!(transport.publish_attempts(), 1);
    }
}
