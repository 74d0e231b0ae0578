//! # Powertrain Twin
//!
//! A fault-aware digital twin of an electric-vehicle powertrain. Four plant
//! stages (battery, inverter, motor, cooling loop) are wrapped by control
//! units that exchange their frames over an in-process bus, raise diagnostic
//! trouble codes under injected faults, and feed a fault tree that ranks the
//! probable root causes.
//!
//! ## Features
//!
//! - **Plant models**: coulomb-counting battery, Park-transform inverter,
//!   power-balance motor, steady-state cooling loop
//! - **ECU bus**: typed topics, synchronous delivery in registration order
//! - **Fault injection**: short, open and comms-missing modes with fixed DTC
//!   sets, scheduled per tick from a seeded RNG
//! - **Diagnosis**: symptom matching and cause-score aggregation over a YAML
//!   fault tree
//! - **Fleet runs**: many vehicles in isolated workers with a hard deadline
//!
//! ## Quick Start
//!
//! ```rust
//! use powertrain_twin::{Catalog, Vehicle, VehicleConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let catalog = Arc::new(Catalog::builtin()?);
//! let mut vehicle = Vehicle::new(1, catalog, VehicleConfig::default())?;
//!
//! // The first tick only captures timestamps.
//! vehicle.tick_at(Duration::ZERO)?;
//! vehicle.tick_at(Duration::from_millis(10))?;
//!
//! let snapshot = vehicle.snapshot();
//! assert!(snapshot.batt_soc < 100.0);
//! assert!(vehicle.active_dtcs().is_empty());
//! # Ok::<(), powertrain_twin::SimError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`plant`] - Physical stage models
//! - [`signals`] - Fixed-shape signal frames
//! - [`ecu`] - Control units wrapping the stages
//! - [`bus`] - Per-vehicle publish/subscribe router
//! - [`fault_injection`] - Fault modes, overrides and scheduling
//! - [`catalog`] - DTC and fault-tree catalogs
//! - [`fault_tree`] - Symptom matching and cause scoring
//! - [`vehicle`] - Tick state machine and snapshot
//! - [`runner`] - Multi-vehicle execution

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![allow(clippy::doc_markdown)]
#![cfg_attr(test, allow(clippy::float_cmp))]

pub mod signals;
pub mod plant;
pub mod catalog;
pub mod fault_injection;
pub mod fault_tree;
pub mod bus;
pub mod ecu;
pub mod config;
pub mod telemetry;
pub mod vehicle;
pub mod runner;

// Re-export main public types for convenience
pub use catalog::{Catalog, CatalogError, DtcCode, EcuTag};
pub use config::{ConfigError, VehicleConfig};
pub use fault_injection::{FaultInjectionConfig, FaultMode};
pub use fault_tree::Diagnosis;
pub use plant::StageKind;
pub use runner::{run_fleet, FleetConfig, VehicleOutcome};
pub use telemetry::SimSnapshot;
pub use vehicle::{SimError, TickPhase, Vehicle};
