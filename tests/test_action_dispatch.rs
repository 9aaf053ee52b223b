//! End-to-end action handling through a running publisher
//!
//! Requests are injected into the mock transport's event stream and the
//! acknowledgments are read back from what the device published.


use sensor_sim::actions::{register_builtin_actions, ActionRegistry};
use sensor_sim::encoding::WireFormat;
use sensor_sim::protocol::{StatusKind, NO_HANDLER_ERROR, SENSOR_STATUS_TOPIC};
use sensor_sim::testing::MockTransport;
use sensor_sim::transport::mqtt::EventRoute;
use std::time::Duration;
use test_helpers::*;

const ACK_DEV1: &str = "action/ack/dev1";
const WAIT: Duration = Duration::from_secs(2);

fn builtin_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    register_builtin_actions(&mut registry);
    registry
}

#[tokio::test]
async fn test_reboot_request_is_acknowledged() {
    let mut publisher = build_publisher(
        MockTransport::new(),
        builtin_registry(),
        WireFormat::Protobuf,
    );
    publisher.start().await.unwrap();
    let transport = publisher.transport().clone();

    transport.inject_message(
        "action/device/reboot",
        request_bytes(WireFormat::Protobuf, "device/reboot", Some("dev1"), b"now"),
    );

    let acked = wait_until(WAIT, || async { !transport.published_on(ACK_DEV1).await.is_empty() }).await;
    assert!(acked, "no acknowledgment published");

    let acks = transport.published_on(ACK_DEV1).await;
    assert_eq!(acks.len(), 1);
    assert!(!acks[0].retain);

    let ack = decode_ack(WireFormat::Protobuf, &acks[0]);
    assert_eq!(ack.action, "reboot");
    assert!(ack.success);
    assert_eq!(ack.error, "");
    assert_eq!(ack.result, "Rebooted successfully");

    publisher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_json_request_gets_json_acknowledgment() {
    let mut publisher = build_publisher(MockTransport::new(), builtin_registry(), WireFormat::Json);
    publisher.start().await.unwrap();
    let transport = publisher.transport().clone();

    transport.inject_message(
        "action/device/message",
        request_bytes(WireFormat::Json, "device/message", Some("console"), b"hello"),
    );

    let topic = "action/ack/console";
    assert!(wait_until(WAIT, || async { !transport.published_on(topic).await.is_empty() }).await);

    let acks = transport.published_on(topic).await;
    let body: serde_json::Value = serde_json::from_slice(&acks[0].payload).unwrap();
    assert_eq!(body["ack"], "message");
    assert_eq!(body["success"], true);
    assert_eq!(body["result"], "Status: OK");

    publisher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_action_is_acknowledged_as_failure() {
    let mut publisher = build_publisher(
        MockTransport::new(),
        builtin_registry(),
        WireFormat::Protobuf,
    );
    publisher.start().await.unwrap();
    let transport = publisher.transport().clone();

    transport.inject_message(
        "action/device/erase",
        request_bytes(WireFormat::Protobuf, "device/erase", Some("dev1"), b""),
    );

    assert!(wait_until(WAIT, || async { !transport.published_on(ACK_DEV1).await.is_empty() }).await);
    let ack = decode_ack(WireFormat::Protobuf, &transport.published_on(ACK_DEV1).await[0]);
    assert_eq!(ack.action, "erase");
    assert!(!ack.success);
    assert_eq!(ack.error, NO_HANDLER_ERROR);
    assert!(ack.result.contains("erase"));

    let snapshot = publisher.metrics().snapshot();
    assert_eq!(snapshot.actions.missed, 1);

    publisher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_request_without_ack_topic_publishes_nothing() {
    let mut registry = ActionRegistry::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    registry.register("ping", move |payload: &[u8]| {
        let _ = tx.send(payload.to_vec());
        "pong".to_string()
    });

    let mut publisher = build_publisher(MockTransport::new(), registry, WireFormat::Protobuf);
    publisher.start().await.unwrap();
    let transport = publisher.transport().clone();

    transport.inject_message(
        "action/ping",
        request_bytes(WireFormat::Protobuf, "ping", Some(""), b"x"),
    );

    let seen = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
    assert_eq!(seen, Some(b"x".to_vec()));

    // Give a stray ack time to show up before asserting its absence
    tokio::time::sleep(Duration::from_millis(50)).await;
    let acks: Vec<_> = transport
        .published()
        .await
        .into_iter()
        .filter(|message| message.topic.starts_with("action/ack/"))
        .collect();
    assert!(acks.is_empty());

    publisher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handler_panic_reports_error_and_device_keeps_serving() {
    let mut registry = builtin_registry();
    registry.register("explode", |_payload: &[u8]| -> String { panic!("fuse blown") });

    let mut publisher = build_publisher(MockTransport::new(), registry, WireFormat::Protobuf);
    publisher.start().await.unwrap();
    let transport = publisher.transport().clone();

    transport.inject_message(
        "action/explode",
        request_bytes(WireFormat::Protobuf, "explode", Some("dev1"), b""),
    );
    transport.inject_message(
        "action/device/reboot",
        request_bytes(WireFormat::Protobuf, "device/reboot", Some("dev1"), b""),
    );

    assert!(wait_until(WAIT, || async { transport.published_on(ACK_DEV1).await.len() >= 2 }).await);

    let acks = transport.published_on(ACK_DEV1).await;
    let faulted = decode_ack(WireFormat::Protobuf, &acks[0]);
    assert_eq!(faulted.action, "explode");
    assert!(!faulted.success);
    assert!(faulted.error.starts_with("Handler failed: "));
    assert!(faulted.error.contains("fuse blown"));

    let recovered = decode_ack(WireFormat::Protobuf, &acks[1]);
    assert_eq!(recovered.action, "reboot");
    assert!(recovered.success);

    let error_status = transport
        .published_on(SENSOR_STATUS_TOPIC)
        .await
        .into_iter()
        .find(|message| decode_status(message).0 == StatusKind::Error)
        .expect("no ERROR status published");
    assert!(error_status.retain);
    assert!(decode_status(&error_status).2.contains("explode"));

    let snapshot = publisher.metrics().snapshot();
    assert_eq!(snapshot.actions.faulted, 1);
    assert_eq!(snapshot.actions.per_action["explode"].faults, 1);

    publisher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_and_ack_namespace_messages_are_ignored() {
    let mut publisher = build_publisher(
        MockTransport::new(),
        builtin_registry(),
        WireFormat::Protobuf,
    );
    publisher.start().await.unwrap();
    let transport = publisher.transport().clone();

    // Another device's acknowledgment arriving through action/#
    transport.inject_message(ACK_DEV1, b"\x0a\x06reboot\x10\x01".to_vec());
    transport.inject_message("action/device/reboot", vec![0xff, 0xff, 0xff, 0xff]);

    let metrics = publisher.metrics();
    assert!(
        wait_until(WAIT, || {
            let metrics = metrics.clone();
            async move {
                let snapshot = metrics.snapshot();
                snapshot.actions.ignored == 1 && snapshot.actions.malformed == 1
            }
        })
        .await
    );

    // The only thing on the ack topic is what was injected, nothing published
    assert!(transport.published_on(ACK_DEV1).await.is_empty());
    assert_eq!(metrics.snapshot().actions.dispatched, 0);

    publisher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retained_request_is_answered() {
    let mut publisher = build_publisher(
        MockTransport::new(),
        builtin_registry(),
        WireFormat::Protobuf,
    );
    publisher.start().await.unwrap();
    let transport = publisher.transport().clone();

    transport.inject(EventRoute::MessageReceived {
        topic: "action/device/reboot".to_string(),
        payload: request_bytes(WireFormat::Protobuf, "device/reboot", Some("dev1"), b""),
        retain: true,
    });

    assert!(wait_until(WAIT, || async { !transport.published_on(ACK_DEV1).await.is_empty() }).await);
    let ack = decode_ack(WireFormat::Protobuf, &transport.published_on(ACK_DEV1).await[0]);
    assert_eq!(ack.action, "reboot");
    assert!(ack.success);

    publisher.shutdown().await.unwrap();
}
