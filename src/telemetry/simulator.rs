//! Simulated sensor readings
//!
//! CPU temperature follows a uniform sample plus a slow sinusoidal load term,
//! the compass heading is a bounded random walk, and the GPS position drifts
//! at a configured ground speed with small positional noise.

use crate::config::TelemetrySection;
use crate::protocol::SensorReading;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Starting fix (San Francisco)
pub const START_LATITUDE: f64 = 37.7749;
pub const START_LONGITUDE: f64 = -122.4194;
pub const START_ALTITUDE: f64 = 100.0;

const METERS_PER_DEGREE: f64 = 111_000.0;
const GPS_NOISE_DEGREES: f64 = 0.00001;
const ALTITUDE_NOISE_FACTOR: f64 = 10.0;

/// Generator parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    pub temp_min: f64,
    pub temp_max: f64,
    pub compass_variation: f64,
    /// Metres per second
    pub gps_drift: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self::from(&TelemetrySection::default())
    }
}

impl From<&TelemetrySection> for SimulationParams {
    fn from(section: &TelemetrySection) -> Self {
        Self {
            temp_min: section.temp_min,
            temp_max: section.temp_max,
            compass_variation: section.compass_variation,
            gps_drift: section.gps_drift,
        }
    }
}

pub struct SensorSimulator {
    params: SimulationParams,
    rng: StdRng,
    heading: f64,
    latitude: f64,
    longitude: f64,
    altitude: f64,
    last_update: Option<DateTime<Utc>>,
}

impl SensorSimulator {
    pub fn new(params: SimulationParams) -> Self {
        Self::with_rng(params, StdRng::from_os_rng())
    }

    /// Deterministic generator for tests and replays
    pub fn seeded(params: SimulationParams, seed: u64) -> Self {
        Self::with_rng(params, StdRng::seed_from_u64(seed))
    }

    fn with_rng(params: SimulationParams, rng: StdRng) -> Self {
        Self {
            params,
            rng,
            heading: 0.0,
            latitude: START_LATITUDE,
            longitude: START_LONGITUDE,
            altitude: START_ALTITUDE,
            last_update: None,
        }
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn sample(&mut self) -> SensorReading {
        self.sample_at(Utc::now())
    }

    /// Produce the reading for `now`; drift is measured from the previous sample
    pub fn sample_at(&mut self, now: DateTime<Utc>) -> SensorReading {
        let cpu_temperature = self.next_temperature(now);
        let compass_heading = self.next_heading();
        self.advance_position(now);

        SensorReading {
            cpu_temperature,
            compass_heading,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            timestamp: now,
        }
    }

    fn next_temperature(&mut self, now: DateTime<Utc>) -> f64 {
        let SimulationParams {
            temp_min, temp_max, ..
        } = self.params;
        let base = self.rng.random_range(temp_min..=temp_max);

        let seconds = now.timestamp() as f64;
        let load = 5.0 * (seconds * 0.1).sin() + 2.0 * (seconds * 0.05).sin();

        (base + load).clamp(temp_min, temp_max)
    }

    fn next_heading(&mut self) -> f64 {
        let step = self.rng.random_range(0.0..360.0) * self.params.compass_variation / 360.0;
        self.heading = (self.heading + step).rem_euclid(360.0);
        self.heading
    }

    fn advance_position(&mut self, now: DateTime<Utc>) {
        let elapsed_secs = self
            .last_update
            .map(|last| (now - last).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        let meters = self.params.gps_drift * elapsed_secs;
        let lat_drift = meters / METERS_PER_DEGREE;
        let lon_drift = meters / (METERS_PER_DEGREE * self.latitude.to_radians().cos());

        self.latitude += lat_drift + self.noise();
        self.longitude += lon_drift + self.noise();
        self.altitude += self.noise() * ALTITUDE_NOISE_FACTOR;

        self.last_update = Some(now);
    }

    fn noise(&mut self) -> f64 {
        self.rng
            .random_range(-GPS_NOISE_DEGREES..=GPS_NOISE_DEGREES)
    }
}
