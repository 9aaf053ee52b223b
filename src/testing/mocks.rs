//! Mock implementations for testing
//!
//! [`MockTransport`] implements [`Transport`] without a broker. Its background
//! context is the real [`BackgroundLoop`], fed from a channel instead of a
//! socket, so state transitions, reconnection and quiescence behave exactly as
//! they do for [`MqttSession`](crate::transport::mqtt::MqttSession).

use crate::transport::mqtt::{BackgroundLoop, EventRoute, EventSource, LoopContext, ReconnectConfig};
use crate::transport::{QoS, SessionEvent, SessionState, Transport, WillMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};

const MOCK_STOP_GRACE: Duration = Duration::from_millis(500);

/// One publish that reached the mock's "wire"
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Error)]
pub enum MockTransportError {
    #[error("Mock transport not connected (state: {0:?})")]
    NotConnected(SessionState),
    #[error("Mock connection refused")]
    ConnectionRefused,
    #[error("Mock publish failure")]
    PublishRejected,
    #[error("Mock will set after connect")]
    WillAfterConnect,
    #[error("Mock background loop unavailable: {0}")]
    LoopUnavailable(String),
}

type ScriptedStep = (Duration, Result<EventRoute, String>);

/// Event source fed by [`MockTransport::inject`] and friends
struct ChannelSource {
    steps: mpsc::UnboundedReceiver<ScriptedStep>,
    resubscribed: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_route(&mut self) -> Result<EventRoute, String> {
        match self.steps.recv().await {
            Some((delay, result)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            // Nothing more will ever arrive; idle like a quiet connection
            None => std::future::pending().await,
        }
    }

    fn resubscribe(&mut self, filters: &[(String, QoS)]) {
        if let Ok(mut log) = self.resubscribed.lock() {
            log.extend(filters.iter().map(|(filter, _)| filter.clone()));
        }
    }
}

/// Mock transport for testing
pub struct MockTransport {
    state_tx: Arc<watch::Sender<SessionState>>,
    published: Mutex<Vec<PublishedMessage>>,
    publish_attempts: AtomicUsize,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    resubscribed: Arc<std::sync::Mutex<Vec<String>>>,
    will: Mutex<Option<WillMessage>>,
    refuse_connect: bool,
    confirm_connection: bool,
    fail_publish: AtomicBool,
    connected_once: AtomicBool,
    closing: Arc<AtomicBool>,
    reconnect: ReconnectConfig,
    steps_tx: mpsc::UnboundedSender<ScriptedStep>,
    steps_rx: Mutex<Option<mpsc::UnboundedReceiver<ScriptedStep>>>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    background: Mutex<Option<BackgroundLoop>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Accepts connections and confirms them once the loop starts
    pub fn new() -> Self {
        Self::build(false, true)
    }

    /// Already connected, no background loop; for exercising publish paths
    pub fn online() -> Self {
        let mock = Self::new();
        mock.state_tx.send_replace(SessionState::Connected);
        mock
    }

    /// `connect` fails as if the broker refused the session
    pub fn refusing_connections() -> Self {
        Self::build(true, true)
    }

    /// `connect` succeeds but no confirmation ever arrives
    pub fn without_confirmation() -> Self {
        Self::build(false, false)
    }

    fn build(refuse_connect: bool, confirm_connection: bool) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (steps_tx, steps_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            state_tx: Arc::new(state_tx),
            published: Mutex::new(Vec::new()),
            publish_attempts: AtomicUsize::new(0),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            resubscribed: Arc::new(std::sync::Mutex::new(Vec::new())),
            will: Mutex::new(None),
            refuse_connect,
            confirm_connection,
            fail_publish: AtomicBool::new(false),
            connected_once: AtomicBool::new(false),
            closing: Arc::new(AtomicBool::new(false)),
            reconnect: ReconnectConfig {
                max_attempts: None,
                backoff_pattern: vec![10],
                sustained_delay: 10,
            },
            steps_tx,
            steps_rx: Mutex::new(Some(steps_rx)),
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: Mutex::new(Some(events_rx)),
            background: Mutex::new(None),
        }
    }

    /// Give up after `max_attempts` failed reconnections instead of retrying forever
    pub fn with_reconnect_limit(mut self, max_attempts: u32) -> Self {
        self.reconnect.max_attempts = Some(max_attempts);
        self
    }

    /// Make every publish fail (connected or not)
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Queue a routed event for the background loop
    pub fn inject(&self, route: EventRoute) {
        self.inject_delayed(Duration::ZERO, route);
    }

    /// Queue an event that stays in flight for `delay` before delivery
    pub fn inject_delayed(&self, delay: Duration, route: EventRoute) {
        let _ = self.steps_tx.send((delay, Ok(route)));
    }

    pub fn inject_message(&self, topic: &str, payload: Vec<u8>) {
        self.inject(EventRoute::MessageReceived {
            topic: topic.to_string(),
            payload,
            retain: false,
        });
    }

    /// Simulate the network dropping the session
    pub fn drop_connection(&self, reason: &str) {
        let _ = self
            .steps_tx
            .send((Duration::ZERO, Err(reason.to_string())));
    }

    /// Simulate the broker accepting a reconnection
    pub fn restore_connection(&self) {
        self.inject(EventRoute::ConnectionAcknowledged {
            session_present: false,
        });
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    /// Every publish call, including rejected ones
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .await
            .iter()
            .map(|(filter, _)| filter.clone())
            .collect()
    }

    /// Filters re-issued by the background loop after (re)connection
    pub fn resubscribed(&self) -> Vec<String> {
        self.resubscribed
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub async fn will(&self) -> Option<WillMessage> {
        self.will.lock().await.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn set_will(&self, will: WillMessage) -> Result<(), Self::Error> {
        if self.connected_once.load(Ordering::SeqCst) {
            return Err(MockTransportError::WillAfterConnect);
        }
        *self.will.lock().await = Some(will);
        Ok(())
    }

    async fn connect(&self) -> Result<(), Self::Error> {
        if self.refuse_connect {
            self.state_tx
                .send_replace(SessionState::Failed("connection refused".to_string()));
            return Err(MockTransportError::ConnectionRefused);
        }

        self.connected_once.store(true, Ordering::SeqCst);
        self.closing.store(false, Ordering::SeqCst);
        self.state_tx.send_replace(SessionState::Connecting);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.closing.store(true, Ordering::SeqCst);
        self.state_tx.send_replace(SessionState::Disconnected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        matches!(*self.state_tx.borrow(), SessionState::Connected)
    }

    fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);

        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MockTransportError::PublishRejected);
        }
        let state = self.state();
        if state != SessionState::Connected {
            return Err(MockTransportError::NotConnected(state));
        }

        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), Self::Error> {
        let state = self.state();
        if state != SessionState::Connected {
            return Err(MockTransportError::NotConnected(state));
        }
        self.subscriptions.lock().await.push((filter.to_string(), qos));
        Ok(())
    }

    async fn loop_start(&self) -> Result<(), Self::Error> {
        if !self.connected_once.load(Ordering::SeqCst) {
            return Err(MockTransportError::LoopUnavailable(
                "connect() has not completed".to_string(),
            ));
        }

        let mut background = self.background.lock().await;
        if background.is_some() {
            return Err(MockTransportError::LoopUnavailable("already running".to_string()));
        }

        let steps = self.steps_rx.lock().await.take().ok_or_else(|| {
            MockTransportError::LoopUnavailable("event script already consumed".to_string())
        })?;
        let events_tx = self.events_tx.lock().await.take().ok_or_else(|| {
            MockTransportError::LoopUnavailable("event channel already consumed".to_string())
        })?;

        let pending = self.confirm_connection.then_some(EventRoute::ConnectionAcknowledged {
            session_present: false,
        });

        let ctx = LoopContext {
            state_tx: self.state_tx.clone(),
            events_tx,
            closing: self.closing.clone(),
            subscriptions: self.subscriptions.clone(),
            reconnect: self.reconnect.clone(),
            pending,
        };
        let source = ChannelSource {
            steps,
            resubscribed: self.resubscribed.clone(),
        };

        *background = Some(BackgroundLoop::spawn(source, ctx));
        Ok(())
    }

    async fn loop_stop(&self) -> Result<(), Self::Error> {
        let Some(mut background) = self.background.lock().await.take() else {
            return Ok(());
        };
        background.stop(MOCK_STOP_GRACE).await;

        let serviced = matches!(
            self.state(),
            SessionState::Connected | SessionState::Connecting
        );
        if serviced {
            self.state_tx.send_replace(SessionState::Disconnected);
        }
        Ok(())
    }

    async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.lock().await.take()
    }
}
