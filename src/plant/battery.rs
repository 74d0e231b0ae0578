use super::{PlantError, PlantStage, StageKind};
use crate::signal_frame;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

const SECONDS_PER_HOUR: f64 = 3600.0;
const INITIAL_SOC_PERCENT: f64 = 100.0;

// Discharge curve: open-circuit voltage against state of charge.
const SOC_BREAKPOINTS: [f64; 21] = [
    0.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 35.0, 40.0, 45.0, 50.0, 55.0, 60.0, 65.0, 70.0, 75.0,
    80.0, 85.0, 90.0, 95.0, 100.0,
];
const VOLTAGE_BREAKPOINTS: [f64; 21] = [
    285.7, 291.4, 297.1, 302.9, 308.6, 314.3, 320.0, 325.7, 331.4, 337.1, 342.9, 348.6, 354.3,
    360.0, 365.7, 371.4, 377.2, 382.9, 388.6, 394.3, 400.0,
];

const_assert_eq!(SOC_BREAKPOINTS.len(), VOLTAGE_BREAKPOINTS.len());

signal_frame! {
    /// Battery inputs received by the BMM.
    pub struct BatteryInputs / BatteryInput {
        /// Commanded bus current [A], positive when discharging.
        i_bus_cmd => IBusCmd = "i_bus_cmd",
    }
}

signal_frame! {
    /// Battery outputs published by the BMM.
    pub struct BatteryOutputs / BatterySignal {
        /// DC bus voltage [V].
        v_bus => VBus = "v_bus",
        /// DC bus current [A].
        i_bus => IBus = "i_bus",
        /// State of charge [%].
        batt_soc => BattSoc = "batt_soc",
        /// Resistive loss [W].
        batt_losses => BattLosses = "batt_losses",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryParams {
    /// Nominal voltage at 100 % state of charge [V].
    pub v_nominal: f64,
    /// Pack capacity [A.h].
    pub q_nominal_ah: f64,
    /// Internal resistance [Ohm].
    pub r_internal: f64,
}

impl Default for BatteryParams {
    fn default() -> Self {
        Self {
            v_nominal: 400.0,
            // 16 modules @ 232 A.h / 5.3 kWh.
            q_nominal_ah: 3712.0,
            r_internal: 0.01,
        }
    }
}

/// HV battery pack with coulomb-counting state of charge.
#[derive(Debug, Clone)]
pub struct Battery {
    params: BatteryParams,
    state: BatteryOutputs,
}

impl Battery {
    pub fn new(params: BatteryParams) -> Self {
        Self::with_state_of_charge(params, INITIAL_SOC_PERCENT)
    }

    pub fn with_state_of_charge(params: BatteryParams, soc_percent: f64) -> Self {
        Self {
            params,
            state: BatteryOutputs {
                v_bus: Self::discharge_voltage(soc_percent),
                i_bus: 0.0,
                batt_soc: soc_percent,
                batt_losses: 0.0,
            },
        }
    }

    pub fn params(&self) -> &BatteryParams {
        &self.params
    }

    /// Piecewise-linear lookup on the discharge curve. Values outside the
    /// table clamp to the nearest endpoint.
    pub fn discharge_voltage(soc_percent: f64) -> f64 {
        interpolate(soc_percent, &SOC_BREAKPOINTS, &VOLTAGE_BREAKPOINTS)
    }

    fn ampere_seconds(&self) -> f64 {
        self.params.q_nominal_ah * SECONDS_PER_HOUR
    }
}

impl PlantStage for Battery {
    type Inputs = BatteryInputs;
    type Outputs = BatteryOutputs;

    const KIND: StageKind = StageKind::Battery;

    fn update(&mut self, inputs: &BatteryInputs, dt_s: f64) -> Result<BatteryOutputs, PlantError> {
        if self.ampere_seconds() == 0.0 {
            return Err(PlantError::DivisionByZero {
                stage: StageKind::Battery,
                quantity: "q_nominal_ah",
            });
        }

        // Perfect tracking of the current command.
        let i_bus = inputs.i_bus_cmd;
        let soc = self.state.batt_soc - i_bus / self.ampere_seconds() * dt_s * 100.0;

        self.state = BatteryOutputs {
            v_bus: Self::discharge_voltage(soc),
            i_bus,
            batt_soc: soc,
            batt_losses: i_bus * i_bus * self.params.r_internal,
        };

        Ok(self.state)
    }

    fn outputs(&self) -> BatteryOutputs {
        self.state
    }
}

fn interpolate(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    debug_assert_eq!(xs.len(), ys.len());

    if x.is_nan() {
        return f64::NAN;
    }

    let last = xs.len() - 1;
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[last] {
        return ys[last];
    }

    let upper = xs.partition_point(|&breakpoint| breakpoint <= x);
    let lower = upper - 1;
    let fraction = (x - xs[lower]) / (xs[upper] - xs[lower]);
    ys[lower] + fraction * (ys[upper] - ys[lower])
}
