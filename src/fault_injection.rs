use crate::catalog::{DtcCatalog, DtcCode, EcuTag};
use crate::plant::battery::BatterySignal;
use crate::plant::cooling::CoolingSignal;
use crate::plant::inverter::InverterSignal;
use crate::plant::motor::MotorSignal;
use crate::plant::StageKind;
use crate::signals::{Signal, SignalFrame};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MAX_ACTIVE_DTCS: usize = 32;
const MAX_OVERRIDES: usize = 16;

const DEFAULT_ACTIVATION_PROBABILITY: f64 = 0.5;
const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

// Vehicle-wide code lists raised by each fault mode. Every injector keeps only
// the codes its own ECU defines.
const SHORT_DTCS: &[&str] = &[
    "A001", "A002", "A004", "A005", "A006", "A007", "D001", "D002", "D003", "D004", "D005", "D006",
];
const OPEN_DTCS: &[&str] = &[
    "A001", "A002", "A004", "A005", "A006", "A007", "C001", "C002", "C003", "C004",
];
const COMMS_MISSING_DTCS: &[&str] = &[
    "B001", "B002", "B004", "B005", "B006", "B007", "B011", "B013",
];

/// Active DTCs of one ECU.
pub type DtcSet = heapless::Vec<DtcCode, MAX_ACTIVE_DTCS>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FaultInjectionError {
    #[error("`{0}` is not one of: short, open, comms_missing")]
    InvalidFaultMode(String),

    #[error("activation probability {0} is outside [0, 1]")]
    InvalidProbability(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultMode {
    Short,
    Open,
    CommsMissing,
}

impl FaultMode {
    pub const ALL: [FaultMode; 3] = [FaultMode::Short, FaultMode::Open, FaultMode::CommsMissing];

    pub fn as_str(self) -> &'static str {
        match self {
            FaultMode::Short => "short",
            FaultMode::Open => "open",
            FaultMode::CommsMissing => "comms_missing",
        }
    }

    /// Value forced onto every targeted signal.
    pub fn fault_value(self) -> f64 {
        match self {
            FaultMode::Short => 0.0,
            FaultMode::Open => f64::INFINITY,
            FaultMode::CommsMissing => f64::NAN,
        }
    }

    pub fn dtc_codes(self) -> &'static [&'static str] {
        match self {
            FaultMode::Short => SHORT_DTCS,
            FaultMode::Open => OPEN_DTCS,
            FaultMode::CommsMissing => COMMS_MISSING_DTCS,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FaultMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultMode {
    type Err = FaultInjectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FaultMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| FaultInjectionError::InvalidFaultMode(s.to_string()))
    }
}

/// Output signals a fault mode overrides on one ECU type.
pub trait FaultTargets: Signal {
    fn fault_targets(mode: FaultMode) -> &'static [Self];
}

impl FaultTargets for BatterySignal {
    fn fault_targets(_mode: FaultMode) -> &'static [Self] {
        &[BatterySignal::VBus, BatterySignal::IBus]
    }
}

impl FaultTargets for InverterSignal {
    fn fault_targets(_mode: FaultMode) -> &'static [Self] {
        &[
            InverterSignal::VD,
            InverterSignal::VQ,
            InverterSignal::ID,
            InverterSignal::IQ,
        ]
    }
}

impl FaultTargets for MotorSignal {
    fn fault_targets(_mode: FaultMode) -> &'static [Self] {
        &[]
    }
}

impl FaultTargets for CoolingSignal {
    fn fault_targets(mode: FaultMode) -> &'static [Self] {
        match mode {
            FaultMode::CommsMissing => &[CoolingSignal::TJuncInverter, CoolingSignal::TFluid],
            FaultMode::Short | FaultMode::Open => &[],
        }
    }
}

/// Override slot for one faultable signal. `None` means the signal passes
/// through untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalOverride<S> {
    pub signal: S,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct FaultInjectionStats {
    pub total_injections: u32,
    pub total_clears: u32,
    pub short_injections: u32,
    pub open_injections: u32,
    pub comms_missing_injections: u32,
}

impl FaultInjectionStats {
    fn record_injection(&mut self, mode: FaultMode) {
        self.total_injections = self.total_injections.saturating_add(1);
        let counter = match mode {
            FaultMode::Short => &mut self.short_injections,
            FaultMode::Open => &mut self.open_injections,
            FaultMode::CommsMissing => &mut self.comms_missing_injections,
        };
        *counter = counter.saturating_add(1);
    }
}

/// Deterministic fault application for one ECU.
#[derive(Debug, Clone)]
pub struct FaultInjector<S: FaultTargets> {
    tag: EcuTag,
    mode_dtcs: [DtcSet; 3],
    overrides: heapless::Vec<SignalOverride<S>, MAX_OVERRIDES>,
    active_dtcs: DtcSet,
    stats: FaultInjectionStats,
}

impl<S: FaultTargets> FaultInjector<S> {
    /// Builds the mode table for an ECU with tag `tag`, keeping only codes the
    /// catalog defines for that tag on one of this ECU's signals.
    pub fn new(tag: EcuTag, catalog: &DtcCatalog) -> Self {
        let mode_dtcs = FaultMode::ALL.map(|mode| Self::codes_for_mode(tag, catalog, mode));

        let mut overrides = heapless::Vec::new();
        for mode in FaultMode::ALL {
            for &signal in S::fault_targets(mode) {
                let known = overrides.iter().any(|o: &SignalOverride<S>| o.signal == signal);
                if !known && overrides.push(SignalOverride { signal, value: None }).is_err() {
                    tracing::warn!(ecu = %tag, ?signal, "override table full, signal not faultable");
                }
            }
        }

        Self {
            tag,
            mode_dtcs,
            overrides,
            active_dtcs: DtcSet::new(),
            stats: FaultInjectionStats::default(),
        }
    }

    fn codes_for_mode(tag: EcuTag, catalog: &DtcCatalog, mode: FaultMode) -> DtcSet {
        let mut codes = DtcSet::new();
        let owned = mode
            .dtc_codes()
            .iter()
            .filter_map(|code| DtcCode::new(code).ok())
            .filter(|code| {
                catalog
                    .get(tag, code)
                    .is_some_and(|definition| S::from_name(&definition.signal).is_some())
            });

        for code in owned {
            if codes.push(code).is_err() {
                tracing::warn!(ecu = %tag, %mode, "DTC set full, dropping {}", code);
                break;
            }
        }
        codes
    }

    pub fn inject_fault(&mut self, mode: FaultMode) {
        let value = mode.fault_value();
        for target in S::fault_targets(mode) {
            if let Some(slot) = self.overrides.iter_mut().find(|o| o.signal == *target) {
                slot.value = Some(value);
            }
        }

        self.active_dtcs = self.mode_dtcs[mode.index()].clone();
        self.stats.record_injection(mode);

        tracing::debug!(ecu = %self.tag, %mode, dtcs = ?self.active_dtcs, "fault injected");
    }

    /// Removes the overrides of `mode` and empties the active set.
    pub fn clear_fault(&mut self, mode: FaultMode) {
        for target in S::fault_targets(mode) {
            if let Some(slot) = self.overrides.iter_mut().find(|o| o.signal == *target) {
                slot.value = None;
            }
        }

        self.active_dtcs.clear();
        self.stats.total_clears = self.stats.total_clears.saturating_add(1);
    }

    /// Parses `mode` first, so an unknown name leaves the injector untouched.
    pub fn inject_named(&mut self, mode: &str) -> Result<FaultMode, FaultInjectionError> {
        let mode: FaultMode = mode.parse()?;
        self.inject_fault(mode);
        Ok(mode)
    }

    pub fn clear_named(&mut self, mode: &str) -> Result<FaultMode, FaultInjectionError> {
        let mode: FaultMode = mode.parse()?;
        self.clear_fault(mode);
        Ok(mode)
    }

    /// Writes every active override into `frame`.
    pub fn apply<F: SignalFrame<Signal = S>>(&self, frame: &mut F) {
        for slot in &self.overrides {
            if let Some(value) = slot.value {
                frame.set(slot.signal, value);
            }
        }
    }

    pub fn override_value(&self, signal: S) -> Option<f64> {
        self.overrides
            .iter()
            .find(|o| o.signal == signal)
            .and_then(|o| o.value)
    }

    pub fn overrides(&self) -> &[SignalOverride<S>] {
        &self.overrides
    }

    pub fn is_faulted(&self) -> bool {
        self.overrides.iter().any(|o| o.value.is_some()) || !self.active_dtcs.is_empty()
    }

    pub fn active_dtcs(&self) -> &[DtcCode] {
        &self.active_dtcs
    }

    pub fn mode_dtcs(&self, mode: FaultMode) -> &[DtcCode] {
        &self.mode_dtcs[mode.index()]
    }

    pub fn tag(&self) -> EcuTag {
        self.tag
    }

    pub fn stats(&self) -> &FaultInjectionStats {
        &self.stats
    }
}

/// Configuration for fault injection behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultInjectionConfig {
    pub enabled: bool,
    /// Chance per tick and ECU that its fault mode is injected rather than
    /// cleared.
    pub activation_probability: f64,
    pub seed: u64,
    pub battery_mode: FaultMode,
    pub inverter_mode: FaultMode,
    pub motor_mode: FaultMode,
    pub cooling_mode: FaultMode,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            activation_probability: DEFAULT_ACTIVATION_PROBABILITY,
            seed: DEFAULT_SEED,
            battery_mode: FaultMode::Short,
            inverter_mode: FaultMode::Short,
            motor_mode: FaultMode::Short,
            cooling_mode: FaultMode::CommsMissing,
        }
    }
}

impl FaultInjectionConfig {
    pub fn mode_for(&self, stage: StageKind) -> FaultMode {
        match stage {
            StageKind::Battery => self.battery_mode,
            StageKind::Inverter => self.inverter_mode,
            StageKind::Motor => self.motor_mode,
            StageKind::Cooling => self.cooling_mode,
        }
    }

    pub fn validate(&self) -> Result<(), FaultInjectionError> {
        if (0.0..=1.0).contains(&self.activation_probability) {
            Ok(())
        } else {
            Err(FaultInjectionError::InvalidProbability(self.activation_probability))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    Inject(FaultMode),
    Clear(FaultMode),
}

/// Per-ECU coin flip deciding each tick whether its fault is active.
#[derive(Debug, Clone)]
pub struct FaultScheduler {
    mode: FaultMode,
    probability: f64,
    rng: StdRng,
}

impl FaultScheduler {
    pub fn new(stage: StageKind, config: &FaultInjectionConfig) -> Self {
        let stream = (stage.index() as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let probability = if (0.0..=1.0).contains(&config.activation_probability) {
            config.activation_probability
        } else {
            0.0
        };

        Self {
            mode: config.mode_for(stage),
            probability,
            rng: StdRng::seed_from_u64(config.seed ^ stream),
        }
    }

    pub fn next_action(&mut self) -> FaultAction {
        if self.rng.gen_bool(self.probability) {
            FaultAction::Inject(self.mode)
        } else {
            FaultAction::Clear(self.mode)
        }
    }
}
