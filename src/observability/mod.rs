//! Observability for the sensor simulator
//!
//! Structured logging and in-process metrics.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, init_with_verbosity, LogFormat};
pub use metrics::{DeviceMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{action_span, lifecycle_span, session_span};
