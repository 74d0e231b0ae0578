use super::{PlantError, PlantStage, StageKind};
use crate::signal_frame;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Electrical offsets of phases a, b and c.
pub const PHASE_OFFSETS: [f64; 3] = [0.0, -2.0 * PI / 3.0, 2.0 * PI / 3.0];

signal_frame! {
    /// Inverter inputs received by the PMM.
    pub struct InverterInputs / InverterInput {
        /// DC bus voltage [V].
        v_bus => VBus = "v_bus",
        /// DC bus current [A].
        i_bus => IBus = "i_bus",
        /// Electrical angle [rad].
        theta_elec => ThetaElec = "theta_elec",
    }
}

signal_frame! {
    /// Rotating-frame quantities published by the PMM.
    pub struct InverterOutputs / InverterSignal {
        v_d => VD = "v_d",
        v_q => VQ = "v_q",
        i_d => ID = "i_d",
        /// Quadrature current, forwarded to the motor as its current command.
        i_q => IQ = "i_q",
        /// Conduction plus switching loss [W].
        inverter_losses => InverterLosses = "inverter_losses",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InverterParams {
    /// Switch on-resistance [Ohm].
    pub r_ds_on: f64,
    /// Switching frequency [Hz].
    pub f_switching: f64,
    /// Switch rise time [s].
    pub t_rise: f64,
    /// Switch fall time [s].
    pub t_fall: f64,
}

impl Default for InverterParams {
    fn default() -> Self {
        Self {
            r_ds_on: 0.004,
            f_switching: 30_000.0,
            t_rise: 100e-9,
            t_fall: 100e-9,
        }
    }
}

/// Three balanced phase quantities.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThreePhase {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl ThreePhase {
    /// `magnitude * sin(theta + offset)` for each phase offset.
    pub fn from_magnitude(magnitude: f64, theta: f64) -> Self {
        let [a, b, c] = PHASE_OFFSETS.map(|offset| magnitude * (theta + offset).sin());
        Self { a, b, c }
    }

    fn phases(&self) -> [f64; 3] {
        [self.a, self.b, self.c]
    }
}

/// Direct and quadrature components of a three-phase quantity at angle
/// `theta`.
pub fn park_transform(phases: ThreePhase, theta: f64) -> (f64, f64) {
    let mut d = 0.0;
    let mut q = 0.0;
    for (phase, offset) in phases.phases().into_iter().zip(PHASE_OFFSETS) {
        d += phase * (theta + offset).cos();
        q -= phase * (theta + offset).sin();
    }
    (2.0 / 3.0 * d, 2.0 / 3.0 * q)
}

/// Motor controller: DC bus in, rotating-frame voltage and current out.
#[derive(Debug, Clone)]
pub struct Inverter {
    params: InverterParams,
    voltages: ThreePhase,
    currents: ThreePhase,
    state: InverterOutputs,
}

impl Inverter {
    pub fn new(params: InverterParams) -> Self {
        Self {
            params,
            voltages: ThreePhase::default(),
            currents: ThreePhase::default(),
            state: InverterOutputs::default(),
        }
    }

    pub fn params(&self) -> &InverterParams {
        &self.params
    }

    /// Phase voltages from the last update.
    pub fn phase_voltages(&self) -> ThreePhase {
        self.voltages
    }

    pub fn phase_currents(&self) -> ThreePhase {
        self.currents
    }

    fn losses(&self, inputs: &InverterInputs, i_q: f64) -> f64 {
        let conduction = 1.5 * i_q * i_q * self.params.r_ds_on;
        let switching = 0.5
            * inputs.v_bus
            * inputs.i_bus
            * (self.params.t_rise + self.params.t_fall)
            * self.params.f_switching;
        conduction + switching
    }
}

impl PlantStage for Inverter {
    type Inputs = InverterInputs;
    type Outputs = InverterOutputs;

    const KIND: StageKind = StageKind::Inverter;

    fn update(&mut self, inputs: &InverterInputs, _dt_s: f64) -> Result<InverterOutputs, PlantError> {
        let theta = inputs.theta_elec;
        self.voltages = ThreePhase::from_magnitude(inputs.v_bus, theta);
        self.currents = ThreePhase::from_magnitude(inputs.i_bus, theta);

        let (v_d, v_q) = park_transform(self.voltages, theta);
        let (i_d, i_q) = park_transform(self.currents, theta);

        self.state = InverterOutputs {
            v_d,
            v_q,
            i_d,
            i_q,
            inverter_losses: self.losses(inputs, i_q),
        };

        Ok(self.state)
    }

    fn outputs(&self) -> InverterOutputs {
        self.state
    }
}
