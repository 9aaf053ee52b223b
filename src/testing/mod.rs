//! Testing utilities and mock implementations
//!
//! This module provides a mock transport for exercising the publisher and
//! the action dispatcher without an MQTT broker.

pub mod mocks;

pub use mocks::*;
