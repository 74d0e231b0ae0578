use super::{PlantError, PlantStage, StageKind};
use crate::signal_frame;
use serde::{Deserialize, Serialize};

signal_frame! {
    /// Heat sources and coolant flow received by the TMM.
    pub struct CoolingInputs / CoolingInput {
        batt_losses => BattLosses = "batt_losses",
        inverter_losses => InverterLosses = "inverter_losses",
        motor_losses => MotorLosses = "motor_losses",
        /// Coolant velocity [m/s].
        fluid_velocity => FluidVelocity = "fluid_velocity",
    }
}

signal_frame! {
    /// Temperatures published by the TMM, all in degC.
    pub struct CoolingOutputs / CoolingSignal {
        t_junc_batt => TJuncBatt = "T_junc_batt",
        t_junc_inverter => TJuncInverter = "T_junc_inverter",
        t_junc_motor => TJuncMotor = "T_junc_motor",
        t_fluid => TFluid = "T_fluid",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoolingParams {
    /// Ambient temperature [degC].
    pub t_ambient: f64,
    /// Junction-to-coolant thermal resistances [K/W].
    pub rth_batt_junc: f64,
    pub rth_inverter_junc: f64,
    pub rth_motor_junc: f64,
    /// Coolant density [kg/m^3].
    pub fluid_density: f64,
    /// Pipe cross-section [m^2].
    pub pipe_area: f64,
    /// Coolant specific heat [J/(kg.K)].
    pub fluid_heat_capacity: f64,
}

impl Default for CoolingParams {
    fn default() -> Self {
        Self {
            t_ambient: 25.0,
            rth_batt_junc: 0.05,
            rth_inverter_junc: 0.05,
            rth_motor_junc: 0.01,
            fluid_density: 1070.0,
            pipe_area: 3.14e-4,
            fluid_heat_capacity: 3500.0,
        }
    }
}

/// Steady-state cooling loop without thermal capacitance.
#[derive(Debug, Clone)]
pub struct CoolingSystem {
    params: CoolingParams,
    state: CoolingOutputs,
}

impl CoolingSystem {
    pub fn new(params: CoolingParams) -> Self {
        let ambient = params.t_ambient;
        Self {
            params,
            state: CoolingOutputs {
                t_junc_batt: ambient,
                t_junc_inverter: ambient,
                t_junc_motor: ambient,
                t_fluid: ambient,
            },
        }
    }

    pub fn params(&self) -> &CoolingParams {
        &self.params
    }

    /// Coolant heat-carrying capacity `rho * v * A * c_p` [W/K].
    fn mass_flow_heat_capacity(&self, fluid_velocity: f64) -> f64 {
        self.params.fluid_density
            * fluid_velocity
            * self.params.pipe_area
            * self.params.fluid_heat_capacity
    }
}

impl PlantStage for CoolingSystem {
    type Inputs = CoolingInputs;
    type Outputs = CoolingOutputs;

    const KIND: StageKind = StageKind::Cooling;

    fn update(&mut self, inputs: &CoolingInputs, _dt_s: f64) -> Result<CoolingOutputs, PlantError> {
        let p = &self.params;
        self.state.t_junc_batt = p.t_ambient + p.rth_batt_junc * inputs.batt_losses;
        self.state.t_junc_inverter = p.t_ambient + p.rth_inverter_junc * inputs.inverter_losses;
        self.state.t_junc_motor = p.t_ambient + p.rth_motor_junc * inputs.motor_losses;

        // No flow: the coolant keeps its previous temperature.
        let m_dot_c = self.mass_flow_heat_capacity(inputs.fluid_velocity);
        if m_dot_c != 0.0 {
            let total_loss = inputs.batt_losses + inputs.inverter_losses + inputs.motor_losses;
            self.state.t_fluid = self.params.t_ambient + total_loss / m_dot_c;
        }

        Ok(self.state)
    }

    fn outputs(&self) -> CoolingOutputs {
        self.state
    }
}
