//! Protocol message types and topic layout for the sensor simulator
//!
//! This module defines what travels between the device and the broker,
//! independent of the byte encoding chosen for it.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
