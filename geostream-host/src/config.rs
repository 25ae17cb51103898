use std::path::Path;

use geostream_logic::{AuthorizationStatus, Coordinate, ServiceSettings};
use serde::{Deserialize, Serialize};

use crate::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
/// Behaviour of the [crate::SimulatedProvider]
pub struct SimulationSettings {
    /// Where the random walk begins
    pub start: Coordinate,
    /// Seed for the random walk, the same seed always produces the same track
    pub seed: u64,
    /// Milliseconds between fixes in continuous mode, also the delay before a one-shot fix
    pub interval_ms: u64,
    /// Largest change in latitude or longitude between two fixes, in degrees
    pub step_degrees: f64,
    /// Milliseconds the simulated permission prompt stays up
    pub permission_delay_ms: u64,
    /// Simulate the user refusing the permission prompt
    pub deny: bool,
    /// Permission status before any prompt
    pub initial_status: AuthorizationStatus,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            start: Coordinate::new(43.0845, -77.6749),
            seed: 0,
            interval_ms: 1000,
            step_degrees: 0.0005,
            permission_delay_ms: 500,
            deny: false,
            initial_status: AuthorizationStatus::NotDetermined,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
/// Everything the host can read from its settings file
pub struct HostConfig {
    pub service: ServiceSettings,
    pub simulation: SimulationSettings,
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse host settings")
    }
}
