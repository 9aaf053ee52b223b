//! Thread-safe device metrics
//!
//! Atomic counters for telemetry, action dispatch and session activity, plus
//! per-action statistics behind a mutex. One collector is shared (via `Arc`)
//! between the publisher cadence and the action dispatcher.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
pub struct DeviceMetrics {
    // Telemetry cadence
    telemetry_ticks: AtomicU64,
    telemetry_published: AtomicU64,
    telemetry_failed: AtomicU64,
    status_published: AtomicU64,
    status_failed: AtomicU64,

    // Action protocol
    actions_received: AtomicU64,
    actions_dispatched: AtomicU64,
    actions_missed: AtomicU64,
    actions_faulted: AtomicU64,
    envelopes_malformed: AtomicU64,
    envelopes_ignored: AtomicU64,
    acks_published: AtomicU64,
    acks_failed: AtomicU64,

    // Session
    reconnections: AtomicU64,
    disconnections: AtomicU64,

    action_stats: Mutex<HashMap<String, ActionStats>>,
    started_at: AtomicU64,
}

/// Per-action counters
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ActionStats {
    pub invocations: u64,
    pub faults: u64,
    pub last_invoked: u64,
}

impl Default for DeviceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceMetrics {
    pub fn new() -> Self {
        Self {
            telemetry_ticks: AtomicU64::new(0),
            telemetry_published: AtomicU64::new(0),
            telemetry_failed: AtomicU64::new(0),
            status_published: AtomicU64::new(0),
            status_failed: AtomicU64::new(0),
            actions_received: AtomicU64::new(0),
            actions_dispatched: AtomicU64::new(0),
            actions_missed: AtomicU64::new(0),
            actions_faulted: AtomicU64::new(0),
            envelopes_malformed: AtomicU64::new(0),
            envelopes_ignored: AtomicU64::new(0),
            acks_published: AtomicU64::new(0),
            acks_failed: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
            disconnections: AtomicU64::new(0),
            action_stats: Mutex::new(HashMap::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn telemetry_tick(&self) {
        self.telemetry_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn telemetry_published(&self) {
        self.telemetry_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn telemetry_failed(&self) {
        self.telemetry_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_published(&self) {
        self.status_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_failed(&self) {
        self.status_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn action_received(&self) {
        self.actions_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn action_dispatched(&self, action: &str) {
        self.actions_dispatched.fetch_add(1, Ordering::Relaxed);
        self.with_action_stats(action, |stats| stats.invocations += 1);
    }

    pub fn action_missed(&self) {
        self.actions_missed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn action_faulted(&self, action: &str) {
        self.actions_faulted.fetch_add(1, Ordering::Relaxed);
        self.with_action_stats(action, |stats| {
            stats.invocations += 1;
            stats.faults += 1;
        });
    }

    pub fn envelope_malformed(&self) {
        self.envelopes_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn envelope_ignored(&self) {
        self.envelopes_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_published(&self) {
        self.acks_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_failed(&self) {
        self.acks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnected(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn disconnected(&self) {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
    }

    fn with_action_stats(&self, action: &str, update: impl FnOnce(&mut ActionStats)) {
        if let Ok(mut stats) = self.action_stats.lock() {
            let entry = stats.entry(action.to_string()).or_default();
            entry.last_invoked = current_timestamp();
            update(entry);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let started = self.started_at.load(Ordering::Relaxed);

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(started),
            telemetry: TelemetryMetrics {
                ticks: self.telemetry_ticks.load(Ordering::Relaxed),
                published: self.telemetry_published.load(Ordering::Relaxed),
                failed: self.telemetry_failed.load(Ordering::Relaxed),
                status_published: self.status_published.load(Ordering::Relaxed),
                status_failed: self.status_failed.load(Ordering::Relaxed),
            },
            actions: ActionMetrics {
                received: self.actions_received.load(Ordering::Relaxed),
                dispatched: self.actions_dispatched.load(Ordering::Relaxed),
                missed: self.actions_missed.load(Ordering::Relaxed),
                faulted: self.actions_faulted.load(Ordering::Relaxed),
                malformed: self.envelopes_malformed.load(Ordering::Relaxed),
                ignored: self.envelopes_ignored.load(Ordering::Relaxed),
                acks_published: self.acks_published.load(Ordering::Relaxed),
                acks_failed: self.acks_failed.load(Ordering::Relaxed),
                per_action: self
                    .action_stats
                    .lock()
                    .map(|stats| stats.clone())
                    .unwrap_or_default(),
            },
            session: SessionMetrics {
                reconnections: self.reconnections.load(Ordering::Relaxed),
                disconnections: self.disconnections.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub telemetry: TelemetryMetrics,
    pub actions: ActionMetrics,
    pub session: SessionMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryMetrics {
    pub ticks: u64,
    pub published: u64,
    pub failed: u64,
    pub status_published: u64,
    pub status_failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionMetrics {
    pub received: u64,
    pub dispatched: u64,
    pub missed: u64,
    pub faulted: u64,
    pub malformed: u64,
    pub ignored: u64,
    pub acks_published: u64,
    pub acks_failed: u64,
    pub per_action: HashMap<String, ActionStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMetrics {
    pub reconnections: u64,
    pub disconnections: u64,
}

/// Seconds since the Unix epoch
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
