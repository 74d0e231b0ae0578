use powertrain_twin::catalog::{Catalog, DtcCode, EcuTag};
use powertrain_twin::ecu::{Ecu, EcuControl};
use powertrain_twin::fault_injection::{FaultInjectionError, FaultInjector, FaultMode};
use powertrain_twin::plant::battery::BatterySignal;
use powertrain_twin::plant::cooling::CoolingSignal;
use powertrain_twin::plant::inverter::InverterSignal;
use powertrain_twin::plant::{
    Battery, BatteryInputs, BatteryParams, CoolingInputs, CoolingParams, CoolingSystem, Inverter,
    InverterInputs, InverterParams, Motor, MotorParams,
};

fn names(codes: &[DtcCode]) -> Vec<&str> {
    codes.iter().map(DtcCode::as_str).collect()
}

#[test]
fn test_mode_names() {
    assert_eq!("short".parse::<FaultMode>(), Ok(FaultMode::Short));
    assert_eq!("open".parse::<FaultMode>(), Ok(FaultMode::Open));
    assert_eq!("comms_missing".parse::<FaultMode>(), Ok(FaultMode::CommsMissing));
    assert_eq!(
        "Short".parse::<FaultMode>(),
        Err(FaultInjectionError::InvalidFaultMode("Short".into()))
    );
}

#[test]
fn test_fault_values() {
    assert_eq!(FaultMode::Short.fault_value(), 0.0);
    assert_eq!(FaultMode::Open.fault_value(), f64::INFINITY);
    assert!(FaultMode::CommsMissing.fault_value().is_nan());
}

#[test]
fn test_mode_codes_per_ecu() {
    let catalog = Catalog::builtin().unwrap();

    let bmm = FaultInjector::<BatterySignal>::new(EcuTag::Bmm, catalog.dtcs());
    assert_eq!(names(bmm.mode_dtcs(FaultMode::Open)), vec!["A001", "A002", "C001", "C002"]);
    assert_eq!(names(bmm.mode_dtcs(FaultMode::CommsMissing)), vec!["B001", "B002"]);

    let pmm = FaultInjector::<InverterSignal>::new(EcuTag::Pmm, catalog.dtcs());
    assert_eq!(
        names(pmm.mode_dtcs(FaultMode::Short)),
        vec!["A004", "A005", "A006", "A007", "D003", "D004", "D005", "D006"]
    );

    let tmm = FaultInjector::<CoolingSignal>::new(EcuTag::Tmm, catalog.dtcs());
    assert_eq!(names(tmm.mode_dtcs(FaultMode::CommsMissing)), vec!["B011", "B013"]);
    assert!(tmm.mode_dtcs(FaultMode::Short).is_empty());
}

#[test]
fn test_comms_missing_targets_thermal_signals() {
    let catalog = Catalog::builtin().unwrap();
    let mut ecu = Ecu::new(CoolingSystem::new(CoolingParams::default()), catalog.dtcs());
    ecu.populate_inputs(CoolingInputs {
        batt_losses: 400.0,
        inverter_losses: 480.0,
        motor_losses: 2400.0,
        fluid_velocity: 1.0,
    });
    ecu.run_plant(0.01).unwrap();

    ecu.inject_fault(FaultMode::CommsMissing);

    assert!(ecu.get_output("T_junc_inverter").unwrap().is_nan());
    assert!(ecu.get_output("T_fluid").unwrap().is_nan());
    assert!(ecu.get_output("T_junc_batt").unwrap().is_finite());
    assert_eq!(names(ecu.active_dtcs()), vec!["B011", "B013"]);
}

#[test]
fn test_inject_short_then_clear_restores_inverter() {
    let catalog = Catalog::builtin().unwrap();
    let mut ecu = Ecu::new(Inverter::new(InverterParams::default()), catalog.dtcs());
    ecu.populate_inputs(InverterInputs {
        v_bus: 400.0,
        i_bus: 200.0,
        theta_elec: 0.4,
    });
    let clean = ecu.run_plant(0.01).unwrap();

    ecu.inject_fault(FaultMode::Short);
    for key in ["v_d", "v_q", "i_d", "i_q"] {
        assert_eq!(ecu.get_output(key).unwrap(), 0.0, "{key}");
    }
    assert_eq!(ecu.get_output("inverter_losses").unwrap(), clean.inverter_losses);
    assert_eq!(ecu.intermediate().unwrap(), clean);

    ecu.clear_fault(FaultMode::Short);
    assert_eq!(ecu.outputs().unwrap(), clean);
    assert!(ecu.active_dtcs().is_empty());
    assert!(ecu.injector().overrides().iter().all(|o| o.value.is_none()));
}

#[test]
fn test_fault_survives_next_plant_update() {
    let catalog = Catalog::builtin().unwrap();
    let mut ecu = Ecu::new(Battery::new(BatteryParams::default()), catalog.dtcs());
    ecu.populate_inputs(BatteryInputs { i_bus_cmd: 200.0 });
    ecu.run_plant(0.01).unwrap();

    ecu.inject_fault(FaultMode::Open);
    ecu.run_plant(0.01).unwrap();

    assert_eq!(ecu.get_output("v_bus").unwrap(), f64::INFINITY);
    assert!(ecu.intermediate().unwrap().v_bus.is_finite());
}

#[test]
fn test_invalid_mode_changes_nothing() {
    let catalog = Catalog::builtin().unwrap();
    let mut ecu = Ecu::new(Battery::new(BatteryParams::default()), catalog.dtcs());
    ecu.populate_inputs(BatteryInputs { i_bus_cmd: 200.0 });
    let clean = ecu.run_plant(0.01).unwrap();

    assert!(ecu.inject_named("ground_fault").is_err());
    assert_eq!(ecu.outputs().unwrap(), clean);
    assert!(ecu.active_dtcs().is_empty());
}

#[test]
fn test_active_dtcs_stay_within_own_catalog() {
    let catalog = Catalog::builtin().unwrap();
    let dtcs = catalog.dtcs();

    let mut ecus: Vec<Box<dyn EcuControl>> = vec![
        Box::new(Ecu::new(Battery::new(BatteryParams::default()), dtcs)),
        Box::new(Ecu::new(Inverter::new(InverterParams::default()), dtcs)),
        Box::new(Ecu::new(Motor::new(MotorParams::default()), dtcs)),
        Box::new(Ecu::new(CoolingSystem::new(CoolingParams::default()), dtcs)),
    ];

    for ecu in ecus.iter_mut() {
        for mode in FaultMode::ALL {
            ecu.inject_fault(mode);
            for code in ecu.active_dtcs() {
                assert!(
                    dtcs.contains(ecu.tag(), code),
                    "{code} raised by {} is not a {} code",
                    ecu.stage(),
                    ecu.tag()
                );
            }
            ecu.clear_fault(mode);
            assert!(ecu.active_dtcs().is_empty());
        }
    }
}
