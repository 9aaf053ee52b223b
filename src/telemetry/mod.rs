//! Telemetry generation for the simulated device

pub mod simulator;

pub use simulator::{SensorSimulator, SimulationParams};
