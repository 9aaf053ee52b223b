//! The simulated device
//!
//! [`Publisher`] owns the session lifecycle and telemetry cadence;
//! [`ShutdownHandle`] is the only thing the signal path needs to stop it.

pub mod lifecycle;
pub mod shutdown;

pub use lifecycle::{LifecycleError, Publisher, PublisherSettings, PublisherState};
pub use shutdown::ShutdownHandle;
