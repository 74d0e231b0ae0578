use powertrain_twin::catalog::Catalog;
use powertrain_twin::runner::RunnerError;
use powertrain_twin::{run_fleet, FleetConfig, VehicleOutcome};
use std::sync::Arc;
use std::time::Duration;

fn catalog() -> Arc<Catalog> {
    Arc::new(Catalog::builtin().unwrap())
}

fn short_run(num_vehicles: u32) -> FleetConfig {
    FleetConfig {
        num_vehicles,
        run_duration: Duration::from_millis(200),
        ..FleetConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fleet_completes_in_id_order() {
    let outcomes = run_fleet(catalog(), short_run(2)).await.unwrap();

    let ids: Vec<u32> = outcomes.iter().map(VehicleOutcome::vehicle_id).collect();
    assert_eq!(ids, vec![1, 2]);

    for outcome in &outcomes {
        match outcome {
            VehicleOutcome::Completed(report) => {
                assert!(report.ticks > 0);
                assert_eq!(report.last_snapshot.vehicle_id, report.vehicle_id);
                assert!(report.wall_time >= Duration::from_millis(200));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_fleet_is_rejected() {
    let err = run_fleet(catalog(), short_run(0)).await.unwrap_err();
    assert!(matches!(err, RunnerError::NoVehicles));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_vehicle_config_is_rejected() {
    let mut config = short_run(1);
    config.vehicle.fault_injection.activation_probability = 2.0;

    let err = run_fleet(catalog(), config).await.unwrap_err();
    assert!(matches!(err, RunnerError::Config(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_vehicle_is_reported() {
    let mut config = short_run(2);
    config.vehicle.operating_point.omega_mech = 0.0;

    let outcomes = run_fleet(catalog(), config).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    for outcome in outcomes {
        match outcome {
            VehicleOutcome::Failed { error, .. } => assert!(error.contains("omega_mech"), "{error}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_vehicle_times_out() {
    let mut config = FleetConfig {
        num_vehicles: 1,
        run_duration: Duration::from_millis(50),
        deadline_grace: Duration::from_millis(50),
        ..FleetConfig::default()
    };
    config.vehicle.pacing_interval = Duration::from_secs(1);

    let outcomes = run_fleet(catalog(), config).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0],
        VehicleOutcome::TimedOut { vehicle_id: 1 }
    ));
    assert!(!outcomes[0].is_completed());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_faulted_fleet_reports_diagnoses() {
    let mut config = short_run(3);
    config.vehicle.fault_injection.enabled = true;
    config.vehicle.fault_injection.activation_probability = 1.0;

    let outcomes = run_fleet(catalog(), config).await.unwrap();

    for outcome in outcomes {
        let VehicleOutcome::Completed(report) = outcome else {
            panic!("expected completion");
        };
        assert!(report.diagnosed_ticks > 0);
        assert!(report.final_diagnosis.has_symptoms());
    }
}
