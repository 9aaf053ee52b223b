//! Device publisher lifecycle
//!
//! Drives `Idle → Connecting → WaitingForConfirmation → Running →
//! ShuttingDown → Stopped`. The publisher owns the telemetry cadence; a
//! spawned listener consumes the transport's event channel and hands action
//! requests to the [`ActionDispatcher`].

use super::shutdown::ShutdownHandle;
use crate::actions::{ActionDispatcher, ActionRegistry};
use crate::config::SimulatorConfig;
use crate::encoding::{self, EncodingError, WireFormat};
use crate::lifecycle_span;
use crate::observability::DeviceMetrics;
use crate::protocol::{DeviceStatus, ACTION_WILDCARD_TOPIC, SENSOR_STATUS_TOPIC};
use crate::telemetry::SensorSimulator;
use crate::transport::{QoS, SessionEvent, SessionState, Transport, WillMessage};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn, Instrument};

/// How long shutdown waits for the event listener to drain
const LISTENER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Publisher lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Connecting,
    WaitingForConfirmation,
    Running,
    ShuttingDown,
    /// Terminal
    Stopped,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to connect to broker: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Connection not confirmed after {attempts} attempts")]
    ConfirmationTimeout { attempts: u32 },

    #[error("Failed to subscribe to {filter}: {source}")]
    Subscribe {
        filter: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Background loop error: {0}")]
    Loop(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Cannot {operation} while {from:?}")]
    InvalidState {
        from: PublisherState,
        operation: &'static str,
    },

    #[error("Startup interrupted by shutdown request")]
    Interrupted,
}

/// Publisher settings derived from the simulator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherSettings {
    pub device_id: String,
    pub format: WireFormat,
    pub interval: Duration,
    pub confirmation_attempts: u32,
    pub confirmation_interval: Duration,
}

impl PublisherSettings {
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self {
            device_id: config.device.id.clone(),
            format: config.telemetry.format,
            interval: config.telemetry_interval(),
            confirmation_attempts: config.startup.confirmation_attempts,
            confirmation_interval: config.confirmation_interval(),
        }
    }
}

/// Telemetry publisher and session orchestrator
pub struct Publisher<T>
where
    T: Transport + 'static,
{
    settings: PublisherSettings,
    transport: Arc<T>,
    registry: Arc<ActionRegistry>,
    simulator: SensorSimulator,
    metrics: Arc<DeviceMetrics>,
    shutdown: ShutdownHandle,
    state: PublisherState,
    listener: Option<JoinHandle<()>>,
    /// Serializes status publishes so a reconnect cannot follow OFFLINE
    status_gate: Arc<Mutex<()>>,
    online_at: Option<DateTime<Utc>>,
}

impl<T> Publisher<T>
where
    T: Transport + 'static,
{
    /// Handlers must all be registered before this call; the registry is
    /// read-only from here on
    pub fn new(
        settings: PublisherSettings,
        transport: Arc<T>,
        registry: ActionRegistry,
        simulator: SensorSimulator,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            settings,
            transport,
            registry: Arc::new(registry),
            simulator,
            metrics: Arc::new(DeviceMetrics::new()),
            shutdown,
            state: PublisherState::Idle,
            listener: None,
            status_gate: Arc::new(Mutex::new(())),
            online_at: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<DeviceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn metrics(&self) -> Arc<DeviceMetrics> {
        self.metrics.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    fn transition(&mut self, next: PublisherState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "Publisher state transition");
            self.state = next;
        }
    }

    // ========== PURE HELPERS ==========

    /// OFFLINE status the broker publishes if the device vanishes
    fn will_message(settings: &PublisherSettings) -> Result<WillMessage, EncodingError> {
        let status = DeviceStatus::offline(&settings.device_id);
        Ok(WillMessage {
            topic: SENSOR_STATUS_TOPIC.to_string(),
            payload: encoding::encode_status(settings.format, &status)?,
            qos: QoS::AtLeastOnce,
            retain: true,
        })
    }

    /// OFFLINE status never predates the ONLINE one it follows
    fn offline_status(device_id: &str, online_at: Option<DateTime<Utc>>) -> DeviceStatus {
        let mut status = DeviceStatus::offline(device_id);
        if let Some(online_at) = online_at {
            status.timestamp = status.timestamp.max(online_at);
        }
        status
    }

    // ========== STARTUP ==========

    /// Connect, confirm, announce ONLINE and subscribe to actions
    ///
    /// Any failure here is fatal: the session is torn down and the publisher
    /// ends in `Stopped`.
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        if self.state != PublisherState::Idle {
            return Err(LifecycleError::InvalidState {
                from: self.state,
                operation: "start",
            });
        }

        let span = lifecycle_span!(device_id = %self.settings.device_id, phase = "startup");
        let result = self.startup_sequence().instrument(span).await;

        if let Err(e) = &result {
            error!(device_id = %self.settings.device_id, "Startup failed: {}", e);
            self.abort_startup().await;
        }
        result
    }

    async fn startup_sequence(&mut self) -> Result<(), LifecycleError> {
        self.transition(PublisherState::Connecting);

        let will = Self::will_message(&self.settings)?;
        self.transport
            .set_will(will)
            .await
            .map_err(|e| LifecycleError::Connect(Box::new(e)))?;
        self.transport
            .connect()
            .await
            .map_err(|e| LifecycleError::Connect(Box::new(e)))?;

        let events = self
            .transport
            .take_events()
            .await
            .ok_or_else(|| LifecycleError::Loop("session event receiver already taken".into()))?;
        self.transport
            .loop_start()
            .await
            .map_err(|e| LifecycleError::Loop(Box::new(e)))?;

        self.transition(PublisherState::WaitingForConfirmation);
        self.await_confirmation().await?;

        self.transition(PublisherState::Running);
        self.announce_online().await;

        self.transport
            .subscribe(ACTION_WILDCARD_TOPIC, QoS::AtLeastOnce)
            .await
            .map_err(|e| LifecycleError::Subscribe {
                filter: ACTION_WILDCARD_TOPIC.to_string(),
                source: Box::new(e),
            })?;

        let dispatcher = ActionDispatcher::new(
            self.registry.clone(),
            self.transport.clone(),
            self.settings.format,
            self.settings.device_id.clone(),
            self.metrics.clone(),
        );
        self.listener = Some(spawn_event_listener(
            events,
            dispatcher,
            self.transport.clone(),
            self.settings.clone(),
            self.metrics.clone(),
            StatusGuard {
                gate: self.status_gate.clone(),
                shutdown: self.shutdown.clone(),
            },
        ));

        info!(
            device_id = %self.settings.device_id,
            actions = ?self.registry.names(),
            "Device online"
        );
        Ok(())
    }

    /// Poll `is_connected` within the fixed attempt budget
    async fn await_confirmation(&self) -> Result<(), LifecycleError> {
        let attempts = self.settings.confirmation_attempts;

        for attempt in 1..=attempts {
            if self.transport.is_connected() {
                info!(attempt, "Broker confirmed connection");
                return Ok(());
            }
            if self.shutdown.is_triggered() {
                return Err(LifecycleError::Interrupted);
            }
            debug!(attempt, attempts, "Waiting for connection confirmation");
            tokio::time::sleep(self.settings.confirmation_interval).await;
        }

        if self.transport.is_connected() {
            return Ok(());
        }
        Err(LifecycleError::ConfirmationTimeout { attempts })
    }

    async fn announce_online(&mut self) {
        let status = DeviceStatus::online(&self.settings.device_id);
        self.online_at = Some(status.timestamp);
        publish_status(&*self.transport, self.settings.format, &status, &self.metrics).await;
    }

    async fn abort_startup(&mut self) {
        if let Err(e) = self.transport.loop_stop().await {
            warn!("Failed to stop background loop after startup failure: {}", e);
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!("Failed to disconnect after startup failure: {}", e);
        }
        self.transition(PublisherState::Stopped);
    }

    // ========== RUNNING ==========

    /// Publish telemetry on the configured cadence until shutdown is requested
    ///
    /// Connectivity faults never end the loop. Once the session has
    /// permanently failed (reconnection attempts exhausted) ticks publish
    /// nothing, and the device idles until shutdown is requested.
    pub async fn run_telemetry(&mut self) -> Result<(), LifecycleError> {
        if self.state != PublisherState::Running {
            return Err(LifecycleError::InvalidState {
                from: self.state,
                operation: "publish telemetry",
            });
        }

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.shutdown.clone();
        let mut failure_reported = false;

        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            format = %self.settings.format,
            "Telemetry cadence started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.wait() => {
                    info!("Shutdown requested, leaving telemetry loop");
                    return Ok(());
                }

                _ = ticker.tick() => {
                    if let SessionState::Failed(reason) = self.transport.state() {
                        if !failure_reported {
                            error!(
                                "MQTT session permanently failed, telemetry suspended until shutdown: {}",
                                reason
                            );
                            failure_reported = true;
                        }
                        self.metrics.telemetry_tick();
                    } else {
                        self.publish_telemetry().await;
                    }
                }
            }
        }
    }

    /// Sample once and publish every view; returns how many publishes succeeded
    pub async fn publish_telemetry(&mut self) -> usize {
        self.metrics.telemetry_tick();
        let reading = self.simulator.sample();

        let views = match encoding::encode_reading_views(
            self.settings.format,
            &reading,
            &self.settings.device_id,
        ) {
            Ok(views) => views,
            Err(e) => {
                warn!("Failed to encode telemetry: {}", e);
                self.metrics.telemetry_failed();
                return 0;
            }
        };

        let mut published = 0;
        for (topic, payload) in views {
            match self
                .transport
                .publish(topic, payload, QoS::AtMostOnce, false)
                .await
            {
                Ok(()) => {
                    published += 1;
                    self.metrics.telemetry_published();
                }
                Err(e) => {
                    warn!(topic, "Failed to publish telemetry: {}", e);
                    self.metrics.telemetry_failed();
                }
            }
        }

        debug!(
            published,
            temperature = reading.cpu_temperature,
            heading = reading.compass_heading,
            "Telemetry tick"
        );
        published
    }

    // ========== SHUTDOWN ==========

    /// Announce OFFLINE, disconnect and wait for the background context
    ///
    /// Idempotent once `Stopped`. Teardown always runs to completion; the
    /// first teardown error is returned afterwards.
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        if matches!(
            self.state,
            PublisherState::Stopped | PublisherState::ShuttingDown
        ) {
            return Ok(());
        }

        let span = lifecycle_span!(device_id = %self.settings.device_id, phase = "shutdown");
        self.teardown().instrument(span).await
    }

    async fn teardown(&mut self) -> Result<(), LifecycleError> {
        let was_running = self.state == PublisherState::Running;
        self.transition(PublisherState::ShuttingDown);

        {
            let _gate = self.status_gate.lock().await;
            self.shutdown.trigger();

            if was_running {
                let status = Self::offline_status(&self.settings.device_id, self.online_at);
                publish_status(&*self.transport, self.settings.format, &status, &self.metrics)
                    .await;
            }
        }

        let mut first_error = None;
        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect failed: {}", e);
            first_error = Some(LifecycleError::Loop(Box::new(e)));
        }
        if let Err(e) = self.transport.loop_stop().await {
            warn!("Failed to stop background loop: {}", e);
            if first_error.is_none() {
                first_error = Some(LifecycleError::Loop(Box::new(e)));
            }
        }

        if let Some(mut listener) = self.listener.take() {
            if tokio::time::timeout(LISTENER_DRAIN_TIMEOUT, &mut listener)
                .await
                .is_err()
            {
                warn!("Event listener did not drain in time, aborting");
                listener.abort();
            }
        }

        self.transition(PublisherState::Stopped);

        match serde_json::to_string(&self.metrics.snapshot()) {
            Ok(snapshot) => info!(metrics = %snapshot, "Device stopped"),
            Err(e) => debug!("Failed to serialize metrics snapshot: {}", e),
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Start, publish until shutdown, then tear down
    pub async fn run(&mut self) -> Result<(), LifecycleError> {
        self.start().await?;
        let outcome = self.run_telemetry().await;
        let stopped = self.shutdown().await;
        outcome.and(stopped)
    }
}

/// Publish a retained status, logging and counting failure
async fn publish_status<T: Transport>(
    transport: &T,
    format: WireFormat,
    status: &DeviceStatus,
    metrics: &DeviceMetrics,
) -> bool {
    let payload = match encoding::encode_status(format, status) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(status = ?status.status, "Failed to encode status: {}", e);
            metrics.status_failed();
            return false;
        }
    };

    match transport
        .publish_retained(SENSOR_STATUS_TOPIC, payload, QoS::AtLeastOnce)
        .await
    {
        Ok(()) => {
            info!(status = ?status.status, "Published device status");
            metrics.status_published();
            true
        }
        Err(e) => {
            warn!(status = ?status.status, "Failed to publish device status: {}", e);
            metrics.status_failed();
            false
        }
    }
}

/// Lets the listener republish ONLINE only while shutdown has not begun
struct StatusGuard {
    gate: Arc<Mutex<()>>,
    shutdown: ShutdownHandle,
}

/// Consume session events until the background context closes the channel
fn spawn_event_listener<T>(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    dispatcher: ActionDispatcher<T>,
    transport: Arc<T>,
    settings: PublisherSettings,
    metrics: Arc<DeviceMetrics>,
    status: StatusGuard,
) -> JoinHandle<()>
where
    T: Transport + 'static,
{
    tokio::spawn(async move {
        let mut confirmed_once = false;

        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Connected { session_present } => {
                    if !confirmed_once {
                        confirmed_once = true;
                        continue;
                    }
                    info!(session_present, "MQTT session re-established");
                    metrics.reconnected();

                    let _gate = status.gate.lock().await;
                    if status.shutdown.is_triggered() {
                        debug!("Shutdown in progress, not republishing ONLINE");
                        continue;
                    }
                    let online = DeviceStatus::online(&settings.device_id);
                    publish_status(&*transport, settings.format, &online, &metrics).await;
                }
                SessionEvent::Disconnected { reason } => {
                    warn!("MQTT session dropped: {}", reason);
                    metrics.disconnected();
                }
                SessionEvent::Published { message_id } => {
                    trace!(message_id, "Broker acknowledged publish");
                }
                SessionEvent::Message {
                    topic,
                    payload,
                    retain,
                } => {
                    let disposition = dispatcher.handle_message(&topic, &payload, retain).await;
                    trace!(topic = %topic, ?disposition, "Inbound message handled");
                }
            }
        }

        debug!("Session event channel closed, listener exiting");
    })
}
