pub mod battery;
pub mod inverter;
pub mod motor;
pub mod cooling;

pub use battery::{Battery, BatteryInputs, BatteryOutputs, BatteryParams};
pub use cooling::{CoolingInputs, CoolingOutputs, CoolingParams, CoolingSystem};
pub use inverter::{park_transform, Inverter, InverterInputs, InverterOutputs, InverterParams, ThreePhase};
pub use motor::{Motor, MotorInputs, MotorOutputs, MotorParams};

use crate::catalog::EcuTag;
use crate::signals::SignalFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The closed set of physical stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Battery,
    Inverter,
    Motor,
    Cooling,
}

impl StageKind {
    pub const PIPELINE: [StageKind; 4] = [
        StageKind::Battery,
        StageKind::Inverter,
        StageKind::Motor,
        StageKind::Cooling,
    ];

    /// The control unit responsible for this stage.
    pub fn ecu_tag(self) -> EcuTag {
        match self {
            StageKind::Battery => EcuTag::Bmm,
            StageKind::Inverter | StageKind::Motor => EcuTag::Pmm,
            StageKind::Cooling => EcuTag::Tmm,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Battery => "battery",
            StageKind::Inverter => "inverter",
            StageKind::Motor => "motor",
            StageKind::Cooling => "cooling",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlantError {
    #[error("{stage} stage divided by zero: {quantity} is zero")]
    DivisionByZero {
        stage: StageKind,
        quantity: &'static str,
    },
}

/// A pure per-tick transform from inputs to outputs.
///
/// Stages know nothing about faults, buses or diagnostics.
pub trait PlantStage {
    type Inputs: SignalFrame;
    type Outputs: SignalFrame;

    const KIND: StageKind;

    fn update(&mut self, inputs: &Self::Inputs, dt_s: f64) -> Result<Self::Outputs, PlantError>;

    /// Latest outputs, or the initial state before the first update.
    fn outputs(&self) -> Self::Outputs;
}
