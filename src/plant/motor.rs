use super::{PlantError, PlantStage, StageKind};
use crate::signal_frame;
use serde::{Deserialize, Serialize};

signal_frame! {
    /// Motor inputs received by the PMM.
    pub struct MotorInputs / MotorInput {
        /// Quadrature current command [A].
        iq_cmd => IqCmd = "iq_cmd",
        /// DC bus voltage [V].
        v_bus => VBus = "v_bus",
        /// DC bus current [A].
        i_bus => IBus = "i_bus",
        /// Mechanical speed [rad/s].
        omega_mech => OmegaMech = "omega_mech",
    }
}

signal_frame! {
    /// Motor outputs published by the PMM.
    pub struct MotorOutputs / MotorSignal {
        /// Shaft torque [N.m].
        torque_mech => TorqueMech = "torque_mech",
        /// Mechanical speed [rad/s].
        omega_mech => OmegaMech = "omega_mech",
        /// Electrical speed [rad/s].
        omega_elec => OmegaElec = "omega_elec",
        /// Winding resistive loss [W].
        motor_losses => MotorLosses = "motor_losses",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorParams {
    /// Direct-axis inductance [H].
    pub ld: f64,
    /// Quadrature-axis inductance [H].
    pub lq: f64,
    /// Back-EMF constant [Vphpk/(rad/s)].
    pub ke: f64,
    /// Winding resistance [Ohm].
    pub rs: f64,
    /// Pole pairs.
    pub n_pp: u32,
    /// Flux linkage [Wb].
    pub flux_linkage: f64,
}

impl Default for MotorParams {
    fn default() -> Self {
        Self {
            ld: 165e-6,
            lq: 165e-6,
            ke: 0.067,
            rs: 0.04,
            n_pp: 32,
            flux_linkage: 0.15,
        }
    }
}

/// Permanent-magnet motor reduced to a power balance.
#[derive(Debug, Clone)]
pub struct Motor {
    params: MotorParams,
    i_q: f64,
    state: MotorOutputs,
}

impl Motor {
    pub fn new(params: MotorParams) -> Self {
        Self {
            params,
            i_q: 0.0,
            state: MotorOutputs::default(),
        }
    }

    pub fn params(&self) -> &MotorParams {
        &self.params
    }

    /// Quadrature current tracked during the last update.
    pub fn i_q(&self) -> f64 {
        self.i_q
    }
}

impl PlantStage for Motor {
    type Inputs = MotorInputs;
    type Outputs = MotorOutputs;

    const KIND: StageKind = StageKind::Motor;

    /// Fails with [`PlantError::DivisionByZero`] at standstill: torque from
    /// the power balance is undefined when `omega_mech` is zero.
    fn update(&mut self, inputs: &MotorInputs, _dt_s: f64) -> Result<MotorOutputs, PlantError> {
        if inputs.omega_mech == 0.0 {
            return Err(PlantError::DivisionByZero {
                stage: StageKind::Motor,
                quantity: "omega_mech",
            });
        }

        // Perfect tracking of the current command.
        self.i_q = inputs.iq_cmd;
        let motor_losses = 1.5 * self.i_q * self.i_q * self.params.rs;
        let elec_power = inputs.v_bus * inputs.i_bus;

        self.state = MotorOutputs {
            torque_mech: (elec_power - motor_losses) / inputs.omega_mech,
            omega_mech: inputs.omega_mech,
            omega_elec: inputs.omega_mech * f64::from(self.params.n_pp),
            motor_losses,
        };

        Ok(self.state)
    }

    fn outputs(&self) -> MotorOutputs {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_torque_from_power_balance() {
        let mut motor = Motor::new(MotorParams::default());
        let inputs = MotorInputs {
            iq_cmd: -200.0,
            v_bus: 400.0,
            i_bus: 200.0,
            omega_mech: 100.0,
        };

        let outputs = motor.update(&inputs, 0.01).unwrap();

        assert!((outputs.motor_losses - 2400.0).abs() < 1e-9);
        assert!((outputs.torque_mech - 776.0).abs() < 1e-9);
        assert_eq!(outputs.omega_elec, 3200.0);
    }

    #[test]
    fn test_standstill_is_an_error() {
        let mut motor = Motor::new(MotorParams::default());
        let inputs = MotorInputs {
            omega_mech: 0.0,
            ..MotorInputs::default()
        };

        let err = motor.update(&inputs, 0.01).unwrap_err();
        assert_eq!(
            err,
            PlantError::DivisionByZero {
                stage: StageKind::Motor,
                quantity: "omega_mech"
            }
        );
    }
}
