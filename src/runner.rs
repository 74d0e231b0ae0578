//! Runs a fleet of independent vehicles, one blocking worker each.
//!
//! Vehicles are built inside their worker and never leave it. Only the
//! catalog is shared. A vehicle still running at its deadline is told to stop
//! and reported as timed out; the batch does not wait for it.

use crate::catalog::Catalog;
use crate::config::{duration_ms, ConfigError, VehicleConfig};
use crate::fault_tree::Diagnosis;
use crate::telemetry::SimSnapshot;
use crate::vehicle::{SimError, Vehicle};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

const DEFAULT_RUN_DURATION_MS: u64 = 2_000;
const DEFAULT_DEADLINE_GRACE_MS: u64 = 2_000;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("fleet has no vehicles")]
    NoVehicles,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub num_vehicles: u32,
    /// Wall-clock time each vehicle simulates.
    #[serde(with = "duration_ms")]
    pub run_duration: Duration,
    /// Extra time past `run_duration` before a vehicle counts as timed out.
    #[serde(with = "duration_ms")]
    pub deadline_grace: Duration,
    pub vehicle: VehicleConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            num_vehicles: 1,
            run_duration: Duration::from_millis(DEFAULT_RUN_DURATION_MS),
            deadline_grace: Duration::from_millis(DEFAULT_DEADLINE_GRACE_MS),
            vehicle: VehicleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleReport {
    pub vehicle_id: u32,
    pub ticks: u64,
    /// Ticks that ended with at least one matched symptom.
    pub diagnosed_ticks: u64,
    pub last_snapshot: SimSnapshot,
    pub final_diagnosis: Diagnosis,
    pub wall_time: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VehicleOutcome {
    Completed(VehicleReport),
    Failed { vehicle_id: u32, error: String },
    TimedOut { vehicle_id: u32 },
}

impl VehicleOutcome {
    pub fn vehicle_id(&self) -> u32 {
        match self {
            VehicleOutcome::Completed(report) => report.vehicle_id,
            VehicleOutcome::Failed { vehicle_id, .. } | VehicleOutcome::TimedOut { vehicle_id } => {
                *vehicle_id
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, VehicleOutcome::Completed(_))
    }
}

/// Ticks and samples `vehicle` until `duration` passed or `stop` is raised.
pub fn run_vehicle(
    vehicle: &mut Vehicle,
    duration: Duration,
    stop: &AtomicBool,
) -> Result<VehicleReport, SimError> {
    let started = Instant::now();
    let mut last_snapshot = *vehicle.snapshot();

    tracing::info!(vehicle = vehicle.id(), ?duration, "vehicle run started");

    while started.elapsed() < duration && !stop.load(Ordering::Relaxed) {
        vehicle.tick()?;
        last_snapshot = vehicle.get_sim_outputs();
    }

    let stats = vehicle.stats();
    tracing::info!(
        vehicle = vehicle.id(),
        ticks = stats.ticks,
        diagnosed_ticks = stats.diagnosed_ticks,
        "vehicle run finished"
    );

    Ok(VehicleReport {
        vehicle_id: vehicle.id(),
        ticks: stats.ticks,
        diagnosed_ticks: stats.diagnosed_ticks,
        last_snapshot,
        final_diagnosis: vehicle.diagnosis().clone(),
        wall_time: started.elapsed(),
    })
}

/// Runs vehicles `1..=num_vehicles` concurrently and returns one outcome
/// per vehicle, in id order.
pub async fn run_fleet(
    catalog: Arc<Catalog>,
    config: FleetConfig,
) -> Result<Vec<VehicleOutcome>, RunnerError> {
    if config.num_vehicles == 0 {
        return Err(RunnerError::NoVehicles);
    }
    config.vehicle.validate()?;

    let deadline = tokio::time::Instant::now() + config.run_duration + config.deadline_grace;
    let mut workers = Vec::with_capacity(config.num_vehicles as usize);

    for vehicle_id in 1..=config.num_vehicles {
        let catalog = Arc::clone(&catalog);
        let mut vehicle_config = config.vehicle.clone();
        vehicle_config.fault_injection.seed = vehicle_config
            .fault_injection
            .seed
            .wrapping_add(u64::from(vehicle_id));
        let duration = config.run_duration;

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let handle = tokio::task::spawn_blocking(move || {
            let mut vehicle = Vehicle::new(vehicle_id, catalog, vehicle_config)?;
            run_vehicle(&mut vehicle, duration, &worker_stop)
        });

        workers.push((vehicle_id, stop, handle));
    }

    let mut outcomes = Vec::with_capacity(workers.len());
    for (vehicle_id, stop, handle) in workers {
        let outcome = match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(Ok(report))) => {
                tracing::info!(vehicle = vehicle_id, ticks = report.ticks, "vehicle completed");
                VehicleOutcome::Completed(report)
            }
            Ok(Ok(Err(err))) => {
                tracing::error!(vehicle = vehicle_id, error = %err, "vehicle failed");
                VehicleOutcome::Failed {
                    vehicle_id,
                    error: err.to_string(),
                }
            }
            Ok(Err(join_err)) => {
                tracing::error!(vehicle = vehicle_id, error = %join_err, "vehicle worker aborted");
                VehicleOutcome::Failed {
                    vehicle_id,
                    error: format!("worker aborted: {join_err}"),
                }
            }
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                tracing::warn!(vehicle = vehicle_id, "vehicle missed its deadline");
                VehicleOutcome::TimedOut { vehicle_id }
            }
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}
