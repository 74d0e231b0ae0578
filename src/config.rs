//! Vehicle configuration. Every default is the reference vehicle.

use crate::fault_injection::{FaultInjectionConfig, FaultInjectionError};
use crate::plant::{BatteryParams, CoolingParams, InverterParams, MotorParams, StageKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PACING_INTERVAL_MS: u64 = 10;
const DEFAULT_NOISE_SEED: u64 = 0x0005_EED0_FA11;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    FaultInjection(#[from] FaultInjectionError),
}

/// Commands and boundary conditions held constant during a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatingPoint {
    /// Bus current command [A].
    pub i_bus_cmd: f64,
    /// Mechanical speed [rad/s].
    pub omega_mech: f64,
    /// Coolant velocity [m/s].
    pub fluid_velocity: f64,
}

impl Default for OperatingPoint {
    fn default() -> Self {
        Self {
            i_bus_cmd: 200.0,
            omega_mech: 100.0,
            fluid_velocity: 1.0,
        }
    }
}

/// Additive measurement noise on the snapshot, as a fraction of each value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub enabled: bool,
    pub seed: u64,
    pub battery_fraction: f64,
    pub inverter_fraction: f64,
    pub motor_fraction: f64,
    pub cooling_fraction: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seed: DEFAULT_NOISE_SEED,
            battery_fraction: 0.01,
            inverter_fraction: 0.0,
            motor_fraction: 0.02,
            cooling_fraction: 0.01,
        }
    }
}

impl NoiseConfig {
    pub fn fraction_for(&self, stage: StageKind) -> f64 {
        match stage {
            StageKind::Battery => self.battery_fraction,
            StageKind::Inverter => self.inverter_fraction,
            StageKind::Motor => self.motor_fraction,
            StageKind::Cooling => self.cooling_fraction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub battery: BatteryParams,
    pub inverter: InverterParams,
    pub motor: MotorParams,
    pub cooling: CoolingParams,
    pub operating_point: OperatingPoint,
    pub noise: NoiseConfig,
    pub fault_injection: FaultInjectionConfig,
    /// Minimum interval between two snapshot retrievals.
    #[serde(with = "duration_ms")]
    pub pacing_interval: Duration,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            battery: BatteryParams::default(),
            inverter: InverterParams::default(),
            motor: MotorParams::default(),
            cooling: CoolingParams::default(),
            operating_point: OperatingPoint::default(),
            noise: NoiseConfig::default(),
            fault_injection: FaultInjectionConfig::default(),
            pacing_interval: Duration::from_millis(DEFAULT_PACING_INTERVAL_MS),
        }
    }
}

impl VehicleConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        tracing::info!(path = %path.display(), "vehicle config loaded");
        Ok(config)
    }

    /// Rejects parameters the plant models cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fault_injection.validate()?;

        if self.battery.q_nominal_ah.is_nan() || self.battery.q_nominal_ah <= 0.0 {
            return Err(invalid("battery.q_nominal_ah must be positive"));
        }
        if self.motor.n_pp == 0 {
            return Err(invalid("motor.n_pp must be at least 1"));
        }

        let op = &self.operating_point;
        if ![op.i_bus_cmd, op.omega_mech, op.fluid_velocity]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(invalid("operating point values must be finite"));
        }

        for stage in StageKind::PIPELINE {
            let fraction = self.noise.fraction_for(stage);
            if !fraction.is_finite() || fraction < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{stage} noise fraction {fraction} must be finite and non-negative"
                )));
            }
        }

        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid(reason.to_string())
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
