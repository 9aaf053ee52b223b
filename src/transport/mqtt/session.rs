//! Impure I/O operations for the MQTT session
//!
//! This module handles network communication, async coordination, and
//! integration with the rumqttc client.

use super::connection::{configure_mqtt_options, SessionConfig, SessionError};
use super::event_loop::{
    BackgroundLoop, LoopContext, RumqttcSource, LOOP_DRAIN_GRACE, LOOP_STOP_GRACE,
};
use super::health_monitor::HealthMonitor;
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{QoS, SessionEvent, SessionState, Transport, WillMessage};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

/// Request queue capacity between the client handle and the event loop
const REQUEST_CAPACITY: usize = 10;

/// Event loop connected but not yet handed to the background task
struct PendingLoop {
    event_loop: EventLoop,
    connack: EventRoute,
}

/// MQTT transport session for the simulated device
pub struct MqttSession {
    config: SessionConfig,
    will: Mutex<Option<WillMessage>>,
    client: Mutex<Option<AsyncClient>>,
    pending: Mutex<Option<PendingLoop>>,
    state_tx: Arc<watch::Sender<SessionState>>,
    closing: Arc<AtomicBool>,
    subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    background: Mutex<Option<BackgroundLoop>>,
}

impl MqttSession {
    pub fn new(config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            config,
            will: Mutex::new(None),
            client: Mutex::new(None),
            pending: Mutex::new(None),
            state_tx: Arc::new(state_tx),
            closing: Arc::new(AtomicBool::new(false)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: Mutex::new(Some(events_rx)),
            background: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Wait until the background loop confirms the session
    ///
    /// Returns false on timeout or if the session fails first.
    pub async fn wait_connected(&self, timeout: std::time::Duration) -> bool {
        let mut state_rx = self.state_tx.subscribe();
        let settled = tokio::time::timeout(
            timeout,
            state_rx.wait_for(|state| {
                matches!(state, SessionState::Connected | SessionState::Failed(_))
            }),
        )
        .await;

        matches!(settled, Ok(Ok(state)) if *state == SessionState::Connected)
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state_tx.send_replace(next.clone());
        if previous != next {
            HealthMonitor::log_state_transition(&previous, &next);
        }
    }

    /// Check session state before operations
    fn check_connection_state(&self) -> Result<(), SessionError> {
        let current_state = self.state_tx.borrow().clone();
        if !HealthMonitor::can_publish(&current_state) {
            return Err(SessionError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }

    async fn connected_client(&self) -> Result<AsyncClient, SessionError> {
        self.check_connection_state()?;
        self.client
            .lock()
            .await
            .clone()
            .ok_or(SessionError::NotConnected {
                state: SessionState::Disconnected,
            })
    }

    /// Poll until the broker acknowledges the connection
    async fn await_connack(event_loop: &mut EventLoop) -> Result<EventRoute, SessionError> {
        loop {
            let event = event_loop
                .poll()
                .await
                .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

            let route = MessageHandler::route_mqtt_event(&event);
            if matches!(route, EventRoute::ConnectionAcknowledged { .. }) {
                return Ok(route);
            }
            debug!(target: "mqtt_transport", "Pre-connack event: {:?}", route);
        }
    }
}

#[async_trait]
impl Transport for MqttSession {
    type Error = SessionError;

    async fn set_will(&self, will: WillMessage) -> Result<(), Self::Error> {
        if self.client.lock().await.is_some() {
            return Err(SessionError::WillAfterConnect);
        }
        *self.will.lock().await = Some(will);
        Ok(())
    }

    async fn connect(&self) -> Result<(), Self::Error> {
        if self.client.lock().await.is_some() {
            return Err(SessionError::ConnectionFailed(
                "session already established; create a new session to reconnect".to_string(),
            ));
        }

        info!(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            "Connecting to MQTT broker"
        );
        self.closing.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Connecting);

        let options = {
            let will = self.will.lock().await;
            configure_mqtt_options(&self.config, will.as_ref())
        };
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let outcome =
            tokio::time::timeout(self.config.connect_timeout, Self::await_connack(&mut event_loop))
                .await;

        let connack = match outcome {
            Ok(Ok(route)) => route,
            Ok(Err(e)) => {
                self.set_state(SessionState::Failed(e.to_string()));
                return Err(e);
            }
            Err(_) => {
                let e = SessionError::ConnectTimeout(self.config.connect_timeout);
                self.set_state(SessionState::Failed(e.to_string()));
                return Err(e);
            }
        };

        *self.client.lock().await = Some(client);
        *self.pending.lock().await = Some(PendingLoop {
            event_loop,
            connack,
        });
        // Connected is published by the background loop once it starts
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        let already_down = matches!(*self.state_tx.borrow(), SessionState::Disconnected);
        if already_down && self.client.lock().await.is_none() {
            return Ok(());
        }

        self.closing.store(true, Ordering::SeqCst);
        self.pending.lock().await.take();

        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.try_disconnect() {
                warn!("Disconnect request could not be queued: {}", e);
            }
        }

        self.set_state(SessionState::Disconnected);
        info!("MQTT session disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        HealthMonitor::can_publish(&self.state_tx.borrow())
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
        let client = self.connected_client().await?;

        // try_publish: never wait on the request queue
        client
            .try_publish(topic, qos, retain, payload)
            .map_err(|e| SessionError::PublishFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", "Published to {} (qos={:?}, retain={})", topic, qos, retain);
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), Self::Error> {
        let client = self.connected_client().await?;

        client
            .try_subscribe(filter, qos)
            .map_err(|e| SessionError::SubscriptionFailed(Box::new(e)))?;

        let mut subscriptions = self.subscriptions.lock().await;
        if !subscriptions.iter().any(|(existing, _)| existing == filter) {
            subscriptions.push((filter.to_string(), qos));
        }

        info!("Subscribed to {}", filter);
        Ok(())
    }

    async fn loop_start(&self) -> Result<(), Self::Error> {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return Err(SessionError::LoopUnavailable("already running".to_string()));
        }

        let PendingLoop {
            event_loop,
            connack,
        } = self.pending.lock().await.take().ok_or_else(|| {
            SessionError::LoopUnavailable("connect() has not completed".to_string())
        })?;

        let events_tx = self.events_tx.lock().await.take().ok_or_else(|| {
            SessionError::LoopUnavailable("event channel already consumed".to_string())
        })?;

        let client = self.client.lock().await.clone().ok_or_else(|| {
            SessionError::LoopUnavailable("client handle missing".to_string())
        })?;

        let ctx = LoopContext {
            state_tx: self.state_tx.clone(),
            events_tx,
            closing: self.closing.clone(),
            subscriptions: self.subscriptions.clone(),
            reconnect: self.config.reconnect.clone(),
            pending: Some(connack),
        };

        *background = Some(BackgroundLoop::spawn(
            RumqttcSource::new(event_loop, client),
            ctx,
        ));
        Ok(())
    }

    async fn loop_stop(&self) -> Result<(), Self::Error> {
        let Some(mut background) = self.background.lock().await.take() else {
            return Ok(());
        };

        // After a local disconnect, let queued publishes and the DISCONNECT flush
        if self.closing.load(Ordering::SeqCst) && !background.wait_for_exit(LOOP_DRAIN_GRACE).await
        {
            debug!(target: "mqtt_transport", "Background loop still draining, signalling stop");
        }
        background.stop(LOOP_STOP_GRACE).await;

        // Nothing services the connection any more
        if matches!(
            *self.state_tx.borrow(),
            SessionState::Connected | SessionState::Connecting
        ) {
            self.set_state(SessionState::Disconnected);
        }
        Ok(())
    }

    async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.lock().await.take()
    }
}
