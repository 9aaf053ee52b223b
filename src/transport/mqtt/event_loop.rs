//! Background context servicing an MQTT session
//!
//! One spawned task polls the connection, turns routed events into
//! [`SessionEvent`]s, and drives reconnection after a drop. The task owns the
//! event sender, so joining it is enough to guarantee no event is produced
//! afterwards.

use super::connection::ReconnectConfig;
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{QoS, SessionEvent, SessionState};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `stop` waits for a graceful exit before aborting the task
pub const LOOP_STOP_GRACE: Duration = Duration::from_secs(2);

/// How long a closing session may keep polling to flush queued requests
pub const LOOP_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Anything that yields routed connection events
#[async_trait]
pub trait EventSource: Send + 'static {
    /// Next routed event; an error means the connection dropped
    async fn next_route(&mut self) -> Result<EventRoute, String>;

    /// Re-issue tracked subscriptions after reconnecting; must not block
    fn resubscribe(&mut self, filters: &[(String, QoS)]);
}

/// rumqttc event loop plus the client handle used for re-subscription
pub struct RumqttcSource {
    event_loop: EventLoop,
    client: AsyncClient,
}

impl RumqttcSource {
    pub fn new(event_loop: EventLoop, client: AsyncClient) -> Self {
        Self { event_loop, client }
    }
}

#[async_trait]
impl EventSource for RumqttcSource {
    async fn next_route(&mut self) -> Result<EventRoute, String> {
        self.event_loop
            .poll()
            .await
            .map(|event| MessageHandler::route_mqtt_event(&event))
            .map_err(|e| e.to_string())
    }

    fn resubscribe(&mut self, filters: &[(String, QoS)]) {
        for (filter, qos) in filters {
            // try_subscribe: this task is the one draining the request queue
            if let Err(e) = self.client.try_subscribe(filter.clone(), *qos) {
                error!("Failed to re-subscribe to {}: {}", filter, e);
            } else {
                debug!(target: "mqtt_transport", "Re-subscribed to: {}", filter);
            }
        }
    }
}

/// Shared state the background task reads and updates
pub struct LoopContext {
    pub state_tx: Arc<watch::Sender<SessionState>>,
    pub events_tx: mpsc::UnboundedSender<SessionEvent>,
    /// Set by a local disconnect; errors then end the loop instead of reconnecting
    pub closing: Arc<AtomicBool>,
    pub subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    pub reconnect: ReconnectConfig,
    /// Route observed before the task started (the initial ConnAck)
    pub pending: Option<EventRoute>,
}

impl LoopContext {
    fn transition(&self, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(event);
        let previous = self.state_tx.send_replace(next.clone());
        if previous != next {
            HealthMonitor::log_state_transition(&previous, &next);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Receiver may already be gone during teardown
        let _ = self.events_tx.send(event);
    }
}

/// Handle to the spawned background task
pub struct BackgroundLoop {
    handle: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl BackgroundLoop {
    pub fn spawn<S: EventSource>(source: S, ctx: LoopContext) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_event_loop(source, ctx, shutdown_rx));
        Self {
            handle: Some(handle),
            shutdown_tx,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait, without signalling, for the task to end on its own
    ///
    /// Returns false if it is still running after `grace`.
    pub async fn wait_for_exit(&mut self, grace: Duration) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return true;
        };

        if tokio::time::timeout(grace, handle).await.is_ok() {
            self.handle = None;
            true
        } else {
            false
        }
    }

    /// Signal shutdown and wait for the task to exit, aborting after `grace`
    pub async fn stop(&mut self, grace: Duration) {
        let _ = self.shutdown_tx.send(true);

        let Some(mut handle) = self.handle.take() else {
            return;
        };

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => {
                info!("Background loop shut down gracefully");
            }
            Ok(Err(e)) if !e.is_cancelled() => {
                warn!("Background loop ended with error: {}", e);
            }
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Background loop didn't shut down gracefully, forcing abort");
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}

impl Drop for BackgroundLoop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_event_loop<S: EventSource>(
    mut source: S,
    mut ctx: LoopContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Starting MQTT background loop");
    let mut reconnect_attempts = 0u32;

    if let Some(route) = ctx.pending.take() {
        process_route(route, &ctx, &mut source, &mut reconnect_attempts, &mut shutdown_rx).await;
    }

    loop {
        tokio::select! {
            biased;

            // Check for shutdown signal first (higher priority)
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received, stopping background loop");
                    break;
                }
            }

            result = source.next_route() => {
                let keep_running = match result {
                    Ok(route) => {
                        process_route(route, &ctx, &mut source, &mut reconnect_attempts, &mut shutdown_rx).await
                    }
                    Err(reason) => {
                        handle_connection_loss(
                            ConnectionEvent::NetworkError(reason),
                            &ctx,
                            &mut reconnect_attempts,
                            &mut shutdown_rx,
                        )
                        .await
                    }
                };
                if !keep_running {
                    break;
                }
            }
        }
    }

    info!("MQTT background loop stopped");
}

/// Returns true to keep polling
async fn process_route<S: EventSource>(
    route: EventRoute,
    ctx: &LoopContext,
    source: &mut S,
    reconnect_attempts: &mut u32,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    match route {
        EventRoute::ConnectionAcknowledged { session_present } => {
            *reconnect_attempts = 0;
            ctx.transition(ConnectionEvent::ConnAckReceived);
            let filters = ctx.subscriptions.lock().await.clone();
            source.resubscribe(&filters);
            ctx.emit(SessionEvent::Connected { session_present });
            true
        }
        EventRoute::MessageReceived {
            topic,
            payload,
            retain,
        } => {
            debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
            ctx.emit(SessionEvent::Message {
                topic,
                payload,
                retain,
            });
            true
        }
        EventRoute::PublishAcknowledged { message_id } => {
            ctx.emit(SessionEvent::Published { message_id });
            true
        }
        EventRoute::Disconnected => {
            handle_connection_loss(
                ConnectionEvent::DisconnectedByBroker,
                ctx,
                reconnect_attempts,
                shutdown_rx,
            )
            .await
        }
        EventRoute::SubscriptionConfirmed { packet_id, rejected } => {
            if rejected {
                warn!("Broker rejected subscription (packet {})", packet_id);
            } else {
                debug!(target: "mqtt_transport", "Subscription confirmed: packet {}", packet_id);
            }
            true
        }
        EventRoute::InfrastructureEvent(event) => {
            debug!(target: "mqtt_transport", "MQTT event: {}", event);
            true
        }
        EventRoute::OutgoingEvent => true,
    }
}

/// Returns true when polling should resume (rumqttc reconnects on the next poll)
async fn handle_connection_loss(
    loss: ConnectionEvent,
    ctx: &LoopContext,
    reconnect_attempts: &mut u32,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    let was_connected = matches!(*ctx.state_tx.borrow(), SessionState::Connected);
    let reason = match &loss {
        ConnectionEvent::NetworkError(reason) => reason.clone(),
        _ => "Broker disconnected".to_string(),
    };

    if ctx.closing.load(Ordering::SeqCst) {
        ctx.transition(ConnectionEvent::ClosedByClient);
        if was_connected {
            ctx.emit(SessionEvent::Disconnected { reason });
        }
        return false;
    }

    ctx.transition(loss);
    if was_connected {
        warn!("MQTT connection lost: {}", reason);
        ctx.emit(SessionEvent::Disconnected {
            reason: reason.clone(),
        });
    } else {
        debug!(target: "mqtt_transport", "Reconnection attempt failed: {}", reason);
    }

    let decision = HealthMonitor::should_attempt_reconnection(
        *reconnect_attempts,
        &ctx.reconnect,
        *shutdown_rx.borrow(),
    );

    match decision {
        ReconnectionDecision::Proceed { attempt, delay_ms } => {
            *reconnect_attempts = attempt;
            ctx.transition(ConnectionEvent::ReconnectionStarted(attempt));

            let max_display = ctx
                .reconnect
                .max_attempts
                .map_or("∞".to_string(), |max| max.to_string());
            info!(
                "Attempting reconnection {}/{} after {}ms delay",
                attempt, max_display, delay_ms
            );

            interruptible_sleep(shutdown_rx, delay_ms).await
        }
        ReconnectionDecision::AbortShutdownRequested => {
            info!("Shutdown signal received, stopping reconnection");
            false
        }
        ReconnectionDecision::AbortMaxAttemptsExceeded { max_attempts } => {
            ctx.transition(ConnectionEvent::PermanentFailure(format!(
                "Max reconnection attempts ({max_attempts}) exceeded"
            )));
            false
        }
    }
}

/// Returns true if the sleep completed, false if shutdown was requested
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
