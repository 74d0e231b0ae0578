use powertrain_twin::catalog::Catalog;
use powertrain_twin::plant::{PlantError, StageKind};
use powertrain_twin::{FaultMode, SimError, SimSnapshot, TickPhase, Vehicle, VehicleConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(10);

fn vehicle_with(config: VehicleConfig) -> Vehicle {
    let catalog = Arc::new(Catalog::builtin().unwrap());
    Vehicle::new(7, catalog, config).unwrap()
}

fn run_ticks(vehicle: &mut Vehicle, ticks: u32) -> Vec<SimSnapshot> {
    (0..=ticks)
        .map(|i| {
            vehicle.tick_at(TICK * i).unwrap();
            *vehicle.snapshot()
        })
        .collect()
}

#[test]
fn test_fault_free_second_of_driving() {
    let mut vehicle = vehicle_with(VehicleConfig::default());
    let snapshots = run_ticks(&mut vehicle, 100);

    assert_eq!(vehicle.phase(), TickPhase::Running);
    assert_eq!(vehicle.stats().running_ticks, 100);
    assert!((snapshots[100].elapsed_time - 1.0).abs() < 1e-9);

    for pair in snapshots[1..].windows(2) {
        assert!(pair[1].batt_soc <= pair[0].batt_soc);
    }
    for snapshot in &snapshots[1..] {
        for key in SimSnapshot::KEYS {
            let value = snapshot.get(key);
            assert!(value.is_some_and(f64::is_finite), "{key} missing or not finite");
        }
        assert_eq!(snapshot.vehicle_id, 7);
    }

    assert!(vehicle.active_dtcs().is_empty());
    assert_eq!(vehicle.stats().diagnosed_ticks, 0);
}

#[test]
fn test_snapshot_json_has_every_key() {
    let mut vehicle = vehicle_with(VehicleConfig::default());
    run_ticks(&mut vehicle, 3);

    let json: serde_json::Value = serde_json::from_str(&vehicle.snapshot().to_json().unwrap()).unwrap();
    for key in SimSnapshot::KEYS {
        assert!(json.get(key).is_some(), "{key}");
    }
}

#[test]
fn test_noise_stays_within_fractions() {
    let mut vehicle = vehicle_with(VehicleConfig::default());
    let snapshots = run_ticks(&mut vehicle, 20);

    for snapshot in &snapshots[1..] {
        assert!((snapshot.torque_mech - 776.0).abs() <= 0.02 * 776.0 + 1e-9);
        assert!(snapshot.v_d.abs() < 1e-6);
        assert!((snapshot.omega_mech - 100.0).abs() <= 0.02 * 100.0 + 1e-9);
    }
}

#[test]
fn test_noise_free_snapshot_matches_ecu_outputs() {
    let mut config = VehicleConfig::default();
    config.noise.enabled = false;
    let mut vehicle = vehicle_with(config);
    run_ticks(&mut vehicle, 2);

    let snapshot = vehicle.snapshot();
    let motor = vehicle.ecu(StageKind::Motor);
    assert_eq!(snapshot.torque_mech, motor.get_output("torque_mech").unwrap());
    assert_eq!(
        snapshot.iq_cmd,
        vehicle.ecu(StageKind::Inverter).get_output("i_q").unwrap()
    );
}

#[test]
fn test_always_faulted_vehicle_is_diagnosed() {
    let mut config = VehicleConfig::default();
    config.fault_injection.enabled = true;
    config.fault_injection.activation_probability = 1.0;
    let mut vehicle = vehicle_with(config);

    run_ticks(&mut vehicle, 2);

    let active: Vec<&str> = vehicle.diagnosis().active_dtcs.iter().map(|c| c.as_str()).collect();
    assert_eq!(
        active,
        vec![
            "A001", "A002", "A004", "A005", "A006", "A007", "B011", "B013", "D001", "D002", "D003",
            "D004", "D005", "D006"
        ]
    );

    let diagnosis = vehicle.diagnosis();
    let symptoms: Vec<&str> = diagnosis.symptoms.keys().map(String::as_str).collect();
    assert_eq!(
        symptoms,
        vec!["hv_bus_short_circuit", "inverter_phase_short", "tmm_comms_lost"]
    );
    assert!((diagnosis.cause_scores["hv_insulation_breakdown"] - 0.24).abs() < 1e-12);
    assert_eq!(diagnosis.most_probable_cause(), Some(("tmm_supply_fault", 0.6)));
    assert_eq!(vehicle.stats().diagnosed_ticks, 2);

    let snapshot = vehicle.snapshot();
    assert_eq!(snapshot.v_bus, 0.0);
    assert!(snapshot.t_fluid.is_nan());
}

#[test]
fn test_scheduled_faults_count_as_dtc_changes() {
    let mut config = VehicleConfig::default();
    config.fault_injection.enabled = true;
    config.fault_injection.activation_probability = 1.0;
    let mut vehicle = vehicle_with(config);

    vehicle.tick_at(Duration::ZERO).unwrap();
    vehicle.tick_at(TICK).unwrap();

    // Battery, inverter and cooling each gain a DTC set; the motor has none.
    assert_eq!(vehicle.stats().dtc_changes, 3);

    vehicle.tick_at(TICK * 2).unwrap();
    assert_eq!(vehicle.stats().dtc_changes, 3);
}

#[test]
fn test_per_ecu_fault_stats_and_outputs() {
    let mut config = VehicleConfig::default();
    config.fault_injection.enabled = true;
    config.fault_injection.activation_probability = 1.0;
    let mut vehicle = vehicle_with(config);
    run_ticks(&mut vehicle, 2);

    let battery = vehicle.ecu(StageKind::Battery);
    assert_eq!(battery.fault_stats().total_injections, 2);
    assert_eq!(battery.fault_stats().short_injections, 2);
    let cooling = vehicle.ecu(StageKind::Cooling);
    assert_eq!(cooling.fault_stats().comms_missing_injections, 2);

    let entries = battery.output_entries().unwrap();
    assert!(entries.contains(&("v_bus", 0.0)));
    assert!(entries.contains(&("i_bus", 0.0)));
    let (_, soc) = entries.iter().find(|(name, _)| *name == "batt_soc").unwrap();
    assert!(*soc < 100.0);
}

#[test]
fn test_never_faulted_with_zero_probability() {
    let mut config = VehicleConfig::default();
    config.fault_injection.enabled = true;
    config.fault_injection.activation_probability = 0.0;
    let mut vehicle = vehicle_with(config);

    run_ticks(&mut vehicle, 10);

    assert!(vehicle.fault_injection_enabled());
    assert!(vehicle.active_dtcs().is_empty());
}

#[test]
fn test_manual_open_fault_and_recovery() {
    let mut vehicle = vehicle_with(VehicleConfig::default());
    run_ticks(&mut vehicle, 1);

    vehicle.inject_fault(StageKind::Battery, FaultMode::Open);
    vehicle.tick_at(TICK * 2).unwrap();

    let diagnosis = vehicle.diagnosis();
    assert!(diagnosis.symptoms.contains_key("hv_bus_open_circuit"));
    assert_eq!(diagnosis.most_probable_cause(), Some(("hv_connector_loose", 0.5)));
    assert_eq!(vehicle.snapshot().v_bus, f64::INFINITY);

    vehicle.clear_fault(StageKind::Battery, FaultMode::Open);
    vehicle.tick_at(TICK * 3).unwrap();

    assert!(vehicle.active_dtcs().is_empty());
    assert!(!vehicle.diagnosis().has_symptoms());
    assert_eq!(vehicle.stats().dtc_changes, 2);
}

#[test]
fn test_zero_speed_fails_the_tick() {
    let mut config = VehicleConfig::default();
    config.operating_point.omega_mech = 0.0;
    let mut vehicle = vehicle_with(config);

    vehicle.tick_at(Duration::ZERO).unwrap();
    let err = vehicle.tick_at(TICK).unwrap_err();

    assert!(matches!(
        err,
        SimError::Plant(PlantError::DivisionByZero {
            stage: StageKind::Motor,
            quantity: "omega_mech"
        })
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = VehicleConfig::default();
    config.noise.battery_fraction = f64::NAN;
    let catalog = Arc::new(Catalog::builtin().unwrap());

    assert!(matches!(
        Vehicle::new(1, catalog, config),
        Err(SimError::Config(_))
    ));
}

#[test]
fn test_retrieval_is_paced() {
    let mut config = VehicleConfig::default();
    config.pacing_interval = Duration::from_millis(30);
    let mut vehicle = vehicle_with(config);
    vehicle.tick().unwrap();

    let started = Instant::now();
    vehicle.get_sim_outputs();
    vehicle.get_sim_outputs();
    vehicle.get_sim_outputs();

    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[test]
fn test_wall_clock_ticks() {
    let mut vehicle = vehicle_with(VehicleConfig::default());

    assert_eq!(vehicle.tick().unwrap(), TickPhase::Warming);
    std::thread::sleep(Duration::from_millis(2));
    assert_eq!(vehicle.tick().unwrap(), TickPhase::Running);

    let timing = vehicle.timing();
    assert!(timing.delta >= Duration::from_millis(2));
    assert!(timing.end >= timing.start);
}
