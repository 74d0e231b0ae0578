//! Electronic control units wrapping one plant stage each.
//!
//! An ECU keeps three frames: the inputs it was handed, the plant outputs as
//! computed (`intermediate`) and the outputs it publishes, which equal the
//! intermediate frame with any fault overrides written over it.

use crate::bus::{BusError, BusMessage, Mailbox, MessageBus, Topic};
use crate::catalog::{Bounds, DtcCatalog, DtcCode, EcuTag};
use crate::fault_injection::{
    DtcSet, FaultInjectionError, FaultInjectionStats, FaultInjector, FaultMode, FaultTargets,
};
use crate::plant::{PlantError, PlantStage, StageKind};
use crate::signals::{Signal, SignalFrame};
use thiserror::Error;

/// Message an ECU publishes: its full input and output frames.
pub type EcuMessage<P> = BusMessage<<P as PlantStage>::Inputs, <P as PlantStage>::Outputs>;

type OutputSignal<P> = <<P as PlantStage>::Outputs as SignalFrame>::Signal;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EcuError {
    #[error("{stage} ECU read its {frame} frame before it was populated")]
    StaleOutput {
        stage: StageKind,
        frame: &'static str,
    },

    #[error("{stage} ECU has no signal `{key}`")]
    UnknownSignal { stage: StageKind, key: String },

    #[error("{0} ECU publishes on no topic")]
    NoTopic(StageKind),

    #[error(transparent)]
    Fault(#[from] FaultInjectionError),

    #[error(transparent)]
    Plant(#[from] PlantError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Debug, Clone, Copy)]
struct RationalityCheck<S> {
    code: DtcCode,
    signal: S,
    bounds: Bounds,
}

pub struct Ecu<P: PlantStage>
where
    OutputSignal<P>: FaultTargets,
{
    tag: EcuTag,
    plant: P,
    inputs: Option<P::Inputs>,
    intermediate: Option<P::Outputs>,
    outputs: Option<P::Outputs>,
    injector: FaultInjector<OutputSignal<P>>,
    checks: Vec<RationalityCheck<OutputSignal<P>>>,
    active_dtcs: DtcSet,
    topic: Option<Topic<EcuMessage<P>>>,
}

impl<P: PlantStage> Ecu<P>
where
    OutputSignal<P>: FaultTargets,
{
    pub fn new(plant: P, catalog: &DtcCatalog) -> Self {
        let tag = P::KIND.ecu_tag();

        let checks = catalog
            .codes_for(tag)
            .filter_map(|(code, definition)| {
                let signal = OutputSignal::<P>::from_name(&definition.signal)?;
                let bounds = definition.bounds()?;
                Some(RationalityCheck {
                    code: *code,
                    signal,
                    bounds,
                })
            })
            .collect();

        Self {
            tag,
            plant,
            inputs: None,
            intermediate: None,
            outputs: None,
            injector: FaultInjector::new(tag, catalog),
            checks,
            active_dtcs: DtcSet::new(),
            topic: None,
        }
    }

    pub fn tag(&self) -> EcuTag {
        self.tag
    }

    pub fn stage(&self) -> StageKind {
        P::KIND
    }

    pub fn plant(&self) -> &P {
        &self.plant
    }

    pub fn populate_inputs(&mut self, inputs: P::Inputs) {
        self.inputs = Some(inputs);
    }

    /// Stores fresh plant outputs. Any active override is written over them
    /// so a fault stays visible until it is cleared.
    pub fn populate_outputs(&mut self, outputs: P::Outputs) {
        self.intermediate = Some(outputs);
        let mut published = outputs;
        self.injector.apply(&mut published);
        self.outputs = Some(published);
    }

    /// Runs the wrapped stage on the current inputs and populates the outputs.
    pub fn run_plant(&mut self, dt_s: f64) -> Result<P::Outputs, EcuError> {
        let inputs = self.inputs()?;
        let outputs = self.plant.update(&inputs, dt_s)?;
        self.populate_outputs(outputs);
        Ok(outputs)
    }

    pub fn inject_fault(&mut self, mode: FaultMode) {
        self.injector.inject_fault(mode);
        if let Some(intermediate) = self.intermediate {
            let mut faulted = intermediate;
            self.injector.apply(&mut faulted);
            self.outputs = Some(faulted);
        }
        self.set_dtcs();
    }

    pub fn clear_fault(&mut self, mode: FaultMode) {
        self.injector.clear_fault(mode);
        if let Some(intermediate) = self.intermediate {
            let mut restored = intermediate;
            self.injector.apply(&mut restored);
            self.outputs = Some(restored);
        }
        self.clear_dtcs();
    }

    pub fn inject_named(&mut self, mode: &str) -> Result<FaultMode, EcuError> {
        let mode: FaultMode = mode.parse()?;
        self.inject_fault(mode);
        Ok(mode)
    }

    pub fn clear_named(&mut self, mode: &str) -> Result<FaultMode, EcuError> {
        let mode: FaultMode = mode.parse()?;
        self.clear_fault(mode);
        Ok(mode)
    }

    /// Recomputes the active set from the injector and the rationality checks
    /// on the published outputs. Returns whether the set changed.
    pub fn set_dtcs(&mut self) -> bool {
        let mut raised = DtcSet::new();
        for code in self.injector.active_dtcs() {
            self.raise(&mut raised, *code);
        }

        if let Some(outputs) = self.outputs {
            for check in &self.checks {
                let value = outputs.get(check.signal);
                // Non-finite values belong to the open/short/comms codes.
                if value.is_finite() && !check.bounds.contains(value) {
                    self.raise(&mut raised, check.code);
                }
            }
        }
        raised.sort_unstable();

        if raised == self.active_dtcs {
            return false;
        }

        if raised.is_empty() {
            tracing::info!(ecu = %self.tag, stage = %P::KIND, "DTCs cleared");
        } else {
            tracing::warn!(ecu = %self.tag, stage = %P::KIND, dtcs = ?raised, "DTCs raised");
        }
        self.active_dtcs = raised;
        true
    }

    fn raise(&self, set: &mut DtcSet, code: DtcCode) {
        if !set.contains(&code) && set.push(code).is_err() {
            tracing::warn!(ecu = %self.tag, "DTC set full, dropping {}", code);
        }
    }

    pub fn clear_dtcs(&mut self) {
        if !self.active_dtcs.is_empty() {
            tracing::info!(ecu = %self.tag, stage = %P::KIND, "DTCs cleared");
        }
        self.active_dtcs.clear();
    }

    pub fn active_dtcs(&self) -> &[DtcCode] {
        &self.active_dtcs
    }

    pub fn inputs(&self) -> Result<P::Inputs, EcuError> {
        self.inputs.ok_or(EcuError::StaleOutput {
            stage: P::KIND,
            frame: "input",
        })
    }

    pub fn outputs(&self) -> Result<P::Outputs, EcuError> {
        self.outputs.ok_or(EcuError::StaleOutput {
            stage: P::KIND,
            frame: "output",
        })
    }

    /// Plant outputs before fault overrides.
    pub fn intermediate(&self) -> Result<P::Outputs, EcuError> {
        self.intermediate.ok_or(EcuError::StaleOutput {
            stage: P::KIND,
            frame: "intermediate",
        })
    }

    pub fn get_input(&self, key: &str) -> Result<f64, EcuError> {
        let inputs = self.inputs()?;
        inputs.get_named(key).ok_or_else(|| self.unknown(key))
    }

    pub fn get_output(&self, key: &str) -> Result<f64, EcuError> {
        let outputs = self.outputs()?;
        outputs.get_named(key).ok_or_else(|| self.unknown(key))
    }

    fn unknown(&self, key: &str) -> EcuError {
        EcuError::UnknownSignal {
            stage: P::KIND,
            key: key.to_string(),
        }
    }

    /// Registers this ECU as the publisher of topic `name` on `bus`.
    pub fn advertise(&mut self, bus: &mut MessageBus, name: &str) -> Result<Topic<EcuMessage<P>>, EcuError> {
        let topic = bus.topic::<EcuMessage<P>>(name)?;
        self.topic = Some(topic.clone());
        Ok(topic)
    }

    /// Mailbox receiving every message published on `topic`.
    pub fn subscribe<M: Clone + 'static>(
        &self,
        bus: &mut MessageBus,
        topic: &Topic<M>,
    ) -> Result<Mailbox<M>, EcuError> {
        tracing::debug!(stage = %P::KIND, topic = topic.name(), "subscribed");
        Ok(bus.mailbox(topic)?)
    }

    /// Publishes the current frames. Returns the number of handlers reached.
    pub fn send(&self, bus: &mut MessageBus) -> Result<usize, EcuError> {
        let topic = self.topic.as_ref().ok_or(EcuError::NoTopic(P::KIND))?;
        let message = BusMessage {
            inputs: self.inputs()?,
            outputs: self.outputs()?,
        };
        Ok(bus.send(topic, &message)?)
    }

    pub fn injector(&self) -> &FaultInjector<OutputSignal<P>> {
        &self.injector
    }
}

/// Stage-independent view of an ECU.
pub trait EcuControl {
    fn tag(&self) -> EcuTag;

    fn stage(&self) -> StageKind;

    fn active_dtcs(&self) -> &[DtcCode];

    fn inject_fault(&mut self, mode: FaultMode);

    fn clear_fault(&mut self, mode: FaultMode);

    /// Whether any override or injected DTC is active.
    fn is_faulted(&self) -> bool;

    fn set_dtcs(&mut self) -> bool;

    fn clear_dtcs(&mut self);

    fn get_output(&self, key: &str) -> Result<f64, EcuError>;

    /// Published outputs as `(name, value)` pairs.
    fn output_entries(&self) -> Result<Vec<(&'static str, f64)>, EcuError>;

    fn fault_stats(&self) -> &FaultInjectionStats;
}

impl<P: PlantStage> EcuControl for Ecu<P>
where
    OutputSignal<P>: FaultTargets,
{
    fn tag(&self) -> EcuTag {
        Ecu::tag(self)
    }

    fn stage(&self) -> StageKind {
        P::KIND
    }

    fn active_dtcs(&self) -> &[DtcCode] {
        Ecu::active_dtcs(self)
    }

    fn inject_fault(&mut self, mode: FaultMode) {
        Ecu::inject_fault(self, mode);
    }

    fn clear_fault(&mut self, mode: FaultMode) {
        Ecu::clear_fault(self, mode);
    }

    fn is_faulted(&self) -> bool {
        self.injector.is_faulted()
    }

    fn set_dtcs(&mut self) -> bool {
        Ecu::set_dtcs(self)
    }

    fn clear_dtcs(&mut self) {
        Ecu::clear_dtcs(self);
    }

    fn get_output(&self, key: &str) -> Result<f64, EcuError> {
        Ecu::get_output(self, key)
    }

    fn output_entries(&self) -> Result<Vec<(&'static str, f64)>, EcuError> {
        Ok(self.outputs()?.entries())
    }

    fn fault_stats(&self) -> &FaultInjectionStats {
        self.injector.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::plant::{Battery, BatteryInputs, BatteryParams};

    fn battery_ecu() -> Ecu<Battery> {
        let catalog = Catalog::builtin().unwrap();
        Ecu::new(Battery::new(BatteryParams::default()), catalog.dtcs())
    }

    #[test]
    fn test_reading_before_populate_fails() {
        let ecu = battery_ecu();
        assert_eq!(
            ecu.get_output("v_bus"),
            Err(EcuError::StaleOutput {
                stage: StageKind::Battery,
                frame: "output"
            })
        );
    }

    #[test]
    fn test_unknown_signal() {
        let mut ecu = battery_ecu();
        ecu.populate_inputs(BatteryInputs { i_bus_cmd: 200.0 });
        ecu.run_plant(0.01).unwrap();

        assert!(matches!(
            ecu.get_output("torque_mech"),
            Err(EcuError::UnknownSignal { .. })
        ));
        assert_eq!(ecu.get_input("i_bus_cmd"), Ok(200.0));
    }

    #[test]
    fn test_short_then_clear_restores_outputs() {
        let mut ecu = battery_ecu();
        ecu.populate_inputs(BatteryInputs { i_bus_cmd: 200.0 });
        let clean = ecu.run_plant(0.01).unwrap();

        ecu.inject_fault(FaultMode::Short);
        assert_eq!(ecu.get_output("v_bus"), Ok(0.0));
        assert_eq!(ecu.get_output("batt_soc"), Ok(clean.batt_soc));
        assert!(ecu.active_dtcs().iter().any(|c| c.as_str() == "D001"));

        ecu.clear_fault(FaultMode::Short);
        assert_eq!(ecu.outputs(), Ok(clean));
        assert!(ecu.active_dtcs().is_empty());
    }

    #[test]
    fn test_rationality_check_raises_out_of_range_codes() {
        let mut ecu = battery_ecu();
        ecu.populate_inputs(BatteryInputs { i_bus_cmd: 300.0 });
        ecu.run_plant(0.01).unwrap();

        assert!(ecu.set_dtcs());
        let codes: Vec<&str> = ecu.active_dtcs().iter().map(DtcCode::as_str).collect();
        assert_eq!(codes, vec!["A002"]);
        assert!(!ecu.set_dtcs());
    }

    #[test]
    fn test_invalid_mode_name() {
        let mut ecu = battery_ecu();
        let err = ecu.inject_named("arc").unwrap_err();
        assert_eq!(
            err,
            EcuError::Fault(FaultInjectionError::InvalidFaultMode("arc".into()))
        );
        assert_eq!(ecu.injector().stats().total_injections, 0);
    }

    #[test]
    fn test_send_requires_topic() {
        let mut bus = MessageBus::new();
        let mut ecu = battery_ecu();
        ecu.populate_inputs(BatteryInputs { i_bus_cmd: 200.0 });
        ecu.run_plant(0.01).unwrap();

        assert_eq!(ecu.send(&mut bus), Err(EcuError::NoTopic(StageKind::Battery)));

        let topic = ecu.advertise(&mut bus, "battery-inverter").unwrap();
        let mailbox = ecu.subscribe(&mut bus, &topic).unwrap();
        assert_eq!(ecu.send(&mut bus), Ok(1));
        assert_eq!(mailbox.take().unwrap().inputs.i_bus_cmd, 200.0);
    }
}
