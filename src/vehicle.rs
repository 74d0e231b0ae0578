use crate::bus::{
    BusError, Mailbox, MessageBus, Topic, TOPIC_BATTERY_INVERTER, TOPIC_INVERTER_MOTOR,
    TOPIC_MOTOR_COOLING, TOPIC_THERMAL,
};
use crate::catalog::{Catalog, CatalogError, DtcCode};
use crate::config::{ConfigError, VehicleConfig};
use crate::ecu::{Ecu, EcuControl, EcuError, EcuMessage};
use crate::fault_injection::{FaultAction, FaultMode, FaultScheduler};
use crate::fault_tree::{self, Diagnosis};
use crate::plant::{
    Battery, BatteryInputs, CoolingInputs, CoolingSystem, Inverter, InverterInputs, Motor,
    MotorInputs, PlantError, StageKind,
};
use crate::telemetry::{MeasurementNoise, SimSnapshot};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Plant(#[from] PlantError),

    #[error(transparent)]
    Ecu(EcuError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("clock went backwards: tick at {now:?} precedes previous tick end {previous:?}")]
    ClockRegression { previous: Duration, now: Duration },
}

impl From<EcuError> for SimError {
    fn from(err: EcuError) -> Self {
        match err {
            EcuError::Plant(err) => SimError::Plant(err),
            EcuError::Bus(err) => SimError::Bus(err),
            other => SimError::Ecu(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickPhase {
    Uninitialized,
    /// First tick seen: timestamps captured, no physics yet.
    Warming,
    Running,
}

/// Timestamps of the latest tick, relative to the vehicle's clock origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TickTiming {
    pub start: Duration,
    pub end: Duration,
    /// Time since the first tick.
    pub elapsed: Duration,
    pub delta: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleStats {
    pub ticks: u64,
    pub running_ticks: u64,
    /// Running ticks that ended with at least one matched symptom.
    pub diagnosed_ticks: u64,
    pub dtc_changes: u64,
    pub last_tick_us: u64,
    pub max_tick_us: u64,
}

/// Subscriptions feeding each downstream stage.
struct Links {
    inverter_battery: Mailbox<EcuMessage<Battery>>,
    motor_battery: Mailbox<EcuMessage<Battery>>,
    motor_inverter: Mailbox<EcuMessage<Inverter>>,
    cooling_battery: Mailbox<EcuMessage<Battery>>,
    cooling_inverter: Mailbox<EcuMessage<Inverter>>,
    cooling_motor: Mailbox<EcuMessage<Motor>>,
}

/// One powertrain: four ECUs on a private bus, driven tick by tick.
pub struct Vehicle {
    id: u32,
    config: VehicleConfig,
    catalog: Arc<Catalog>,

    bus: MessageBus,
    battery: Ecu<Battery>,
    inverter: Ecu<Inverter>,
    motor: Ecu<Motor>,
    cooling: Ecu<CoolingSystem>,
    links: Links,
    thermal_topic: Topic<EcuMessage<CoolingSystem>>,

    schedulers: Option<[FaultScheduler; 4]>,
    noise: MeasurementNoise,

    phase: TickPhase,
    epoch: Instant,
    origin: Duration,
    timing: TickTiming,

    snapshot: SimSnapshot,
    diagnosis: Diagnosis,
    last_retrieval: Option<Instant>,
    stats: VehicleStats,
}

impl Vehicle {
    pub fn new(id: u32, catalog: Arc<Catalog>, config: VehicleConfig) -> Result<Self, SimError> {
        config.validate()?;

        let dtcs = catalog.dtcs();
        let mut battery = Ecu::new(Battery::new(config.battery), dtcs);
        let mut inverter = Ecu::new(Inverter::new(config.inverter), dtcs);
        let mut motor = Ecu::new(Motor::new(config.motor), dtcs);
        let mut cooling = Ecu::new(CoolingSystem::new(config.cooling), dtcs);

        let mut bus = MessageBus::new();
        let battery_topic = battery.advertise(&mut bus, TOPIC_BATTERY_INVERTER)?;
        let inverter_topic = inverter.advertise(&mut bus, TOPIC_INVERTER_MOTOR)?;
        let motor_topic = motor.advertise(&mut bus, TOPIC_MOTOR_COOLING)?;
        let thermal_topic = cooling.advertise(&mut bus, TOPIC_THERMAL)?;

        let links = Links {
            inverter_battery: inverter.subscribe(&mut bus, &battery_topic)?,
            motor_battery: motor.subscribe(&mut bus, &battery_topic)?,
            motor_inverter: motor.subscribe(&mut bus, &inverter_topic)?,
            cooling_battery: cooling.subscribe(&mut bus, &battery_topic)?,
            cooling_inverter: cooling.subscribe(&mut bus, &inverter_topic)?,
            cooling_motor: cooling.subscribe(&mut bus, &motor_topic)?,
        };

        let schedulers = config
            .fault_injection
            .enabled
            .then(|| StageKind::PIPELINE.map(|stage| FaultScheduler::new(stage, &config.fault_injection)));
        let noise = MeasurementNoise::new(&config.noise, id);

        tracing::info!(
            vehicle = id,
            fault_injection = config.fault_injection.enabled,
            "vehicle created"
        );

        Ok(Self {
            id,
            config,
            catalog,
            bus,
            battery,
            inverter,
            motor,
            cooling,
            links,
            thermal_topic,
            schedulers,
            noise,
            phase: TickPhase::Uninitialized,
            epoch: Instant::now(),
            origin: Duration::ZERO,
            timing: TickTiming::default(),
            snapshot: SimSnapshot::new(id),
            diagnosis: Diagnosis::default(),
            last_retrieval: None,
            stats: VehicleStats::default(),
        })
    }

    /// Ticks on the wall clock.
    pub fn tick(&mut self) -> Result<TickPhase, SimError> {
        let phase = self.tick_at(self.epoch.elapsed())?;
        self.timing.end = self.epoch.elapsed();
        Ok(phase)
    }

    /// Ticks at `now`, measured on any monotonic clock shared by every call.
    pub fn tick_at(&mut self, now: Duration) -> Result<TickPhase, SimError> {
        let started = Instant::now();
        self.stats.ticks += 1;

        if self.phase == TickPhase::Uninitialized {
            self.origin = now;
            self.timing = TickTiming {
                start: now,
                end: now,
                elapsed: Duration::ZERO,
                delta: Duration::ZERO,
            };
            self.phase = TickPhase::Warming;
            tracing::info!(vehicle = self.id, "vehicle warming up");
            return Ok(self.phase);
        }

        let delta = now
            .checked_sub(self.timing.end)
            .ok_or(SimError::ClockRegression {
                previous: self.timing.end,
                now,
            })?;

        self.timing.start = now;
        self.timing.delta = delta;
        self.timing.elapsed = now.saturating_sub(self.origin);

        if let Err(err) = self.run_pipeline(delta.as_secs_f64()) {
            tracing::error!(vehicle = self.id, error = %err, "tick failed");
            return Err(err);
        }
        self.refresh_snapshot()?;
        self.refresh_diagnosis();

        self.timing.end = now;
        if self.phase == TickPhase::Warming {
            tracing::info!(vehicle = self.id, "vehicle running");
        }
        self.phase = TickPhase::Running;
        self.stats.running_ticks += 1;

        let tick_us = started.elapsed().as_micros() as u64;
        self.stats.last_tick_us = tick_us;
        self.stats.max_tick_us = self.stats.max_tick_us.max(tick_us);

        tracing::debug!(
            vehicle = self.id,
            elapsed_s = self.timing.elapsed.as_secs_f64(),
            dt_s = delta.as_secs_f64(),
            tick_us,
            "tick"
        );

        Ok(self.phase)
    }

    fn run_pipeline(&mut self, dt_s: f64) -> Result<(), SimError> {
        let op = self.config.operating_point;
        let theta_elec = (op.omega_mech
            * f64::from(self.config.motor.n_pp)
            * self.timing.elapsed.as_secs_f64())
        .rem_euclid(TAU);

        self.battery.populate_inputs(BatteryInputs {
            i_bus_cmd: op.i_bus_cmd,
        });
        self.finish_stage(StageKind::Battery, dt_s)?;

        let battery = self.links.inverter_battery.take()?;
        self.inverter.populate_inputs(InverterInputs {
            v_bus: battery.outputs.v_bus,
            i_bus: battery.outputs.i_bus,
            theta_elec,
        });
        self.finish_stage(StageKind::Inverter, dt_s)?;

        let battery = self.links.motor_battery.take()?;
        let inverter = self.links.motor_inverter.take()?;
        self.motor.populate_inputs(MotorInputs {
            iq_cmd: inverter.outputs.i_q,
            v_bus: battery.outputs.v_bus,
            i_bus: battery.outputs.i_bus,
            omega_mech: op.omega_mech,
        });
        self.finish_stage(StageKind::Motor, dt_s)?;

        let battery = self.links.cooling_battery.take()?;
        let inverter = self.links.cooling_inverter.take()?;
        let motor = self.links.cooling_motor.take()?;
        self.cooling.populate_inputs(CoolingInputs {
            batt_losses: battery.outputs.batt_losses,
            inverter_losses: inverter.outputs.inverter_losses,
            motor_losses: motor.outputs.motor_losses,
            fluid_velocity: op.fluid_velocity,
        });
        self.finish_stage(StageKind::Cooling, dt_s)?;

        Ok(())
    }

    /// Plant update, fault schedule, DTC evaluation and publish for a stage
    /// whose inputs are populated.
    fn finish_stage(&mut self, stage: StageKind, dt_s: f64) -> Result<(), SimError> {
        match stage {
            StageKind::Battery => self.battery.run_plant(dt_s).map(drop)?,
            StageKind::Inverter => self.inverter.run_plant(dt_s).map(drop)?,
            StageKind::Motor => self.motor.run_plant(dt_s).map(drop)?,
            StageKind::Cooling => self.cooling.run_plant(dt_s).map(drop)?,
        }

        let action = self
            .schedulers
            .as_mut()
            .map(|schedulers| schedulers[stage.index()].next_action());

        let ecu = self.ecu_mut(stage);
        let before = ecu.active_dtcs().to_vec();
        match action {
            Some(FaultAction::Inject(mode)) => ecu.inject_fault(mode),
            Some(FaultAction::Clear(mode)) if ecu.is_faulted() => ecu.clear_fault(mode),
            _ => {}
        }
        ecu.set_dtcs();
        let changed = ecu.active_dtcs() != before.as_slice();
        if changed {
            self.stats.dtc_changes += 1;
        }

        match stage {
            StageKind::Battery => self.battery.send(&mut self.bus)?,
            StageKind::Inverter => self.inverter.send(&mut self.bus)?,
            StageKind::Motor => self.motor.send(&mut self.bus)?,
            StageKind::Cooling => self.cooling.send(&mut self.bus)?,
        };
        Ok(())
    }

    fn refresh_snapshot(&mut self) -> Result<(), SimError> {
        self.snapshot.elapsed_time = self.timing.elapsed.as_secs_f64();
        self.snapshot.record_battery(
            &self.battery.outputs()?,
            self.noise.channel(StageKind::Battery),
        );
        self.snapshot.record_inverter(
            &self.inverter.outputs()?,
            self.noise.channel(StageKind::Inverter),
        );
        self.snapshot
            .record_motor(&self.motor.outputs()?, self.noise.channel(StageKind::Motor));
        self.snapshot.record_cooling(
            &self.cooling.outputs()?,
            self.noise.channel(StageKind::Cooling),
        );
        Ok(())
    }

    fn refresh_diagnosis(&mut self) {
        let diagnosis = fault_tree::diagnose(self.catalog.fault_tree(), &self.active_dtcs());

        if diagnosis.has_symptoms() {
            self.stats.diagnosed_ticks += 1;
            if diagnosis.symptoms != self.diagnosis.symptoms {
                let symptoms: Vec<&str> = diagnosis.symptoms.keys().map(String::as_str).collect();
                tracing::warn!(
                    vehicle = self.id,
                    ?symptoms,
                    most_probable_cause = ?diagnosis.most_probable_cause(),
                    "symptoms matched"
                );
            }
        } else if self.diagnosis.has_symptoms() {
            tracing::info!(vehicle = self.id, "symptoms cleared");
        }

        self.diagnosis = diagnosis;
    }

    /// Latest snapshot, at most once per pacing interval. Blocks the caller
    /// until the interval since the previous retrieval has passed.
    pub fn get_sim_outputs(&mut self) -> SimSnapshot {
        if let Some(last) = self.last_retrieval {
            let due = last + self.config.pacing_interval;
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.last_retrieval = Some(Instant::now());
        self.snapshot
    }

    /// Latest snapshot without pacing.
    pub fn snapshot(&self) -> &SimSnapshot {
        &self.snapshot
    }

    pub fn diagnosis(&self) -> &Diagnosis {
        &self.diagnosis
    }

    /// Sorted union of every ECU's active DTCs.
    pub fn active_dtcs(&self) -> Vec<DtcCode> {
        let mut codes: Vec<DtcCode> = self
            .ecus()
            .iter()
            .flat_map(|ecu| ecu.active_dtcs().iter().copied())
            .collect();
        codes.sort_unstable();
        codes.dedup();
        codes
    }

    /// Injects `mode` on one stage outside the random schedule.
    pub fn inject_fault(&mut self, stage: StageKind, mode: FaultMode) {
        tracing::info!(vehicle = self.id, %stage, %mode, "manual fault injection");
        self.apply_manual(stage, |ecu| ecu.inject_fault(mode));
    }

    pub fn clear_fault(&mut self, stage: StageKind, mode: FaultMode) {
        tracing::info!(vehicle = self.id, %stage, %mode, "manual fault clear");
        self.apply_manual(stage, |ecu| ecu.clear_fault(mode));
    }

    fn apply_manual(&mut self, stage: StageKind, action: impl FnOnce(&mut dyn EcuControl)) {
        let ecu = self.ecu_mut(stage);
        let before = ecu.active_dtcs().to_vec();
        action(&mut *ecu);
        let changed = ecu.active_dtcs() != before.as_slice();
        if changed {
            self.stats.dtc_changes += 1;
        }
    }

    /// Registers `handler` for every cooling-stage publication.
    pub fn on_thermal<F>(&mut self, handler: F) -> Result<(), SimError>
    where
        F: FnMut(&EcuMessage<CoolingSystem>) + 'static,
    {
        self.bus.subscribe(&self.thermal_topic, handler)?;
        Ok(())
    }

    pub fn ecus(&self) -> [&dyn EcuControl; 4] {
        [&self.battery, &self.inverter, &self.motor, &self.cooling]
    }

    pub fn ecu(&self, stage: StageKind) -> &dyn EcuControl {
        match stage {
            StageKind::Battery => &self.battery,
            StageKind::Inverter => &self.inverter,
            StageKind::Motor => &self.motor,
            StageKind::Cooling => &self.cooling,
        }
    }

    fn ecu_mut(&mut self, stage: StageKind) -> &mut dyn EcuControl {
        match stage {
            StageKind::Battery => &mut self.battery,
            StageKind::Inverter => &mut self.inverter,
            StageKind::Motor => &mut self.motor,
            StageKind::Cooling => &mut self.cooling,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    pub fn timing(&self) -> &TickTiming {
        &self.timing
    }

    pub fn stats(&self) -> &VehicleStats {
        &self.stats
    }

    pub fn config(&self) -> &VehicleConfig {
        &self.config
    }

    pub fn fault_injection_enabled(&self) -> bool {
        self.schedulers.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(config: VehicleConfig) -> Vehicle {
        let catalog = Arc::new(Catalog::builtin().unwrap());
        Vehicle::new(1, catalog, config).unwrap()
    }

    #[test]
    fn test_first_tick_only_warms_up() {
        let mut vehicle = vehicle(VehicleConfig::default());
        assert_eq!(vehicle.phase(), TickPhase::Uninitialized);

        assert_eq!(vehicle.tick_at(Duration::from_millis(5)).unwrap(), TickPhase::Warming);
        assert!(vehicle.ecu(StageKind::Battery).get_output("v_bus").is_err());

        assert_eq!(vehicle.tick_at(Duration::from_millis(15)).unwrap(), TickPhase::Running);
        assert_eq!(vehicle.timing().delta, Duration::from_millis(10));
        assert_eq!(vehicle.timing().elapsed, Duration::from_millis(10));
    }

    #[test]
    fn test_clock_regression() {
        let mut vehicle = vehicle(VehicleConfig::default());
        vehicle.tick_at(Duration::from_millis(20)).unwrap();

        let err = vehicle.tick_at(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, SimError::ClockRegression { .. }));
    }

    #[test]
    fn test_nominal_tick_raises_nothing() {
        let mut vehicle = vehicle(VehicleConfig::default());
        vehicle.tick_at(Duration::ZERO).unwrap();
        vehicle.tick_at(Duration::from_millis(10)).unwrap();

        assert!(vehicle.active_dtcs().is_empty());
        assert!(!vehicle.diagnosis().has_symptoms());
        let torque = vehicle.ecu(StageKind::Motor).get_output("torque_mech").unwrap();
        assert!((torque - 776.0).abs() < 1e-6);
    }

    #[test]
    fn test_bus_carries_one_topic_per_stage() {
        let vehicle = vehicle(VehicleConfig::default());
        let names: Vec<&str> = vehicle.bus.topic_names().collect();
        assert_eq!(
            names,
            vec![
                TOPIC_BATTERY_INVERTER,
                TOPIC_INVERTER_MOTOR,
                TOPIC_MOTOR_COOLING,
                TOPIC_THERMAL
            ]
        );
    }

    #[test]
    fn test_thermal_handler_sees_each_publication() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut vehicle = vehicle(VehicleConfig::default());
        let seen = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        vehicle
            .on_thermal(move |_| counter.set(counter.get() + 1))
            .unwrap();

        for ms in [0, 10, 20, 30] {
            vehicle.tick_at(Duration::from_millis(ms)).unwrap();
        }
        assert_eq!(seen.get(), 3);
    }
}
