//! Per-tick simulation snapshot and the measurement noise applied to it.

use crate::config::NoiseConfig;
use crate::plant::{BatteryOutputs, CoolingOutputs, InverterOutputs, MotorOutputs, StageKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_KEY_COUNT: usize = 15;

/// Latest measured values of one vehicle, keyed as the telemetry consumer
/// expects them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimSnapshot {
    pub vehicle_id: u32,
    /// Seconds since the vehicle's first tick.
    pub elapsed_time: f64,
    pub v_bus: f64,
    pub i_bus: f64,
    pub batt_soc: f64,
    pub v_d: f64,
    pub v_q: f64,
    pub i_d: f64,
    pub iq_cmd: f64,
    pub torque_mech: f64,
    pub omega_mech: f64,
    #[serde(rename = "T_junc_batt")]
    pub t_junc_batt: f64,
    #[serde(rename = "T_junc_inverter")]
    pub t_junc_inverter: f64,
    #[serde(rename = "T_junc_motor")]
    pub t_junc_motor: f64,
    #[serde(rename = "T_fluid")]
    pub t_fluid: f64,
}

impl SimSnapshot {
    pub const KEYS: [&'static str; SNAPSHOT_KEY_COUNT] = [
        "vehicle_id",
        "elapsed_time",
        "v_bus",
        "i_bus",
        "batt_soc",
        "v_d",
        "v_q",
        "i_d",
        "iq_cmd",
        "torque_mech",
        "omega_mech",
        "T_junc_batt",
        "T_junc_inverter",
        "T_junc_motor",
        "T_fluid",
    ];

    pub fn new(vehicle_id: u32) -> Self {
        Self {
            vehicle_id,
            ..Self::default()
        }
    }

    /// Every key with its value, in [`Self::KEYS`] order.
    pub fn entries(&self) -> [(&'static str, f64); SNAPSHOT_KEY_COUNT] {
        let values = [
            f64::from(self.vehicle_id),
            self.elapsed_time,
            self.v_bus,
            self.i_bus,
            self.batt_soc,
            self.v_d,
            self.v_q,
            self.i_d,
            self.iq_cmd,
            self.torque_mech,
            self.omega_mech,
            self.t_junc_batt,
            self.t_junc_inverter,
            self.t_junc_motor,
            self.t_fluid,
        ];
        let mut entries = [("", 0.0); SNAPSHOT_KEY_COUNT];
        for (entry, (key, value)) in entries.iter_mut().zip(Self::KEYS.into_iter().zip(values)) {
            *entry = (key, value);
        }
        entries
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries()
            .into_iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value)
    }

    /// JSON object with every key. Non-finite values become `null`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn csv_header() -> String {
        Self::KEYS.join(",")
    }

    pub fn to_csv_row(&self) -> String {
        self.entries()
            .iter()
            .map(|(_, value)| value.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(crate) fn record_battery(&mut self, outputs: &BatteryOutputs, noise: &mut NoiseChannel) {
        self.v_bus = noise.apply(outputs.v_bus);
        self.i_bus = noise.apply(outputs.i_bus);
        // SOC is an estimate, not a measurement.
        self.batt_soc = outputs.batt_soc;
    }

    pub(crate) fn record_inverter(&mut self, outputs: &InverterOutputs, noise: &mut NoiseChannel) {
        self.v_d = noise.apply(outputs.v_d);
        self.v_q = noise.apply(outputs.v_q);
        self.i_d = noise.apply(outputs.i_d);
        self.iq_cmd = noise.apply(outputs.i_q);
    }

    pub(crate) fn record_motor(&mut self, outputs: &MotorOutputs, noise: &mut NoiseChannel) {
        self.torque_mech = noise.apply(outputs.torque_mech);
        self.omega_mech = noise.apply(outputs.omega_mech);
    }

    pub(crate) fn record_cooling(&mut self, outputs: &CoolingOutputs, noise: &mut NoiseChannel) {
        self.t_junc_batt = noise.apply(outputs.t_junc_batt);
        self.t_junc_inverter = noise.apply(outputs.t_junc_inverter);
        self.t_junc_motor = noise.apply(outputs.t_junc_motor);
        self.t_fluid = noise.apply(outputs.t_fluid);
    }
}

/// Uniform noise source for one stage.
#[derive(Debug, Clone)]
pub struct NoiseChannel {
    rng: StdRng,
    fraction: f64,
}

impl NoiseChannel {
    pub fn new(seed: u64, fraction: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            fraction,
        }
    }

    /// `value + uniform(-p*|value|, p*|value|)`. Faulted (non-finite) values
    /// pass through unchanged.
    pub fn apply(&mut self, value: f64) -> f64 {
        let spread = self.fraction * value.abs();
        if !value.is_finite() || !(spread > 0.0 && spread.is_finite()) {
            return value;
        }
        value + self.rng.gen_range(-spread..=spread)
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }
}

/// Independently seeded noise channels, one per stage.
#[derive(Debug, Clone)]
pub struct MeasurementNoise {
    channels: [NoiseChannel; 4],
}

impl MeasurementNoise {
    pub fn new(config: &NoiseConfig, vehicle_id: u32) -> Self {
        let base = config.seed ^ (u64::from(vehicle_id) << 32);
        let channels = StageKind::PIPELINE.map(|stage| {
            let fraction = if config.enabled {
                config.fraction_for(stage)
            } else {
                0.0
            };
            NoiseChannel::new(base.wrapping_add(stage.index() as u64 * 0x9E37_79B9), fraction)
        });
        Self { channels }
    }

    pub fn channel(&mut self, stage: StageKind) -> &mut NoiseChannel {
        &mut self.channels[stage.index()]
    }
}
