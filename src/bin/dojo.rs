use clap::{App, Arg};
use colored::*;
use powertrain_twin::{run_fleet, Catalog, FleetConfig, VehicleConfig, VehicleOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_TIMEOUT_MS: u64 = 500;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("dojo")
        .version("0.1.0")
        .author("Powertrain Diagnostics Team")
        .about("🚗 Runs a fleet of powertrain twins in parallel")
        .arg(
            Arg::with_name("num-vehicles")
                .short("n")
                .long("num-vehicles")
                .value_name("COUNT")
                .help("Number of vehicle instances to spawn")
                .takes_value(true)
                .required(true)
                .validator(|v| match v.parse::<u32>() {
                    Ok(n) if n > 0 => Ok(()),
                    _ => Err("Vehicle count must be a positive integer".into()),
                }),
        )
        .arg(
            Arg::with_name("sim-run-time")
                .short("t")
                .long("sim-run-time")
                .value_name("SECONDS")
                .help("Seconds each vehicle simulates")
                .takes_value(true)
                .required(true)
                .validator(|v| match v.parse::<f64>() {
                    Ok(s) if s.is_finite() && s > 0.0 => Ok(()),
                    _ => Err("Run time must be a positive number of seconds".into()),
                }),
        )
        .arg(
            Arg::with_name("no-fault-injection")
                .long("no-fault-injection")
                .help("Run every vehicle fault-free"),
        )
        .arg(
            Arg::with_name("catalog-dir")
                .long("catalog-dir")
                .value_name("DIR")
                .help("Directory holding dtcs.yaml and fault_tree.yaml (built-in catalog if omitted)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Vehicle config JSON")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed for fault scheduling and measurement noise")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Seed must be an unsigned integer".into()),
                }),
        )
        .get_matches();

    let num_vehicles: u32 = matches.value_of("num-vehicles").unwrap_or("1").parse()?;
    let run_secs: f64 = matches.value_of("sim-run-time").unwrap_or("2").parse()?;

    let catalog = match matches.value_of("catalog-dir") {
        Some(dir) => Catalog::load_dir(dir)?,
        None => Catalog::builtin()?,
    };

    let mut vehicle = match matches.value_of("config") {
        Some(path) => VehicleConfig::from_json_file(path)?,
        None => VehicleConfig::default(),
    };
    vehicle.fault_injection.enabled = !matches.is_present("no-fault-injection");
    if let Some(seed) = matches.value_of("seed") {
        let seed: u64 = seed.parse()?;
        vehicle.fault_injection.seed = seed;
        vehicle.noise.seed = seed;
    }

    let config = FleetConfig {
        num_vehicles,
        run_duration: Duration::from_secs_f64(run_secs),
        vehicle,
        ..FleetConfig::default()
    };

    println!("{}", "🚗 Powertrain Twin Dojo".bright_blue().bold());
    println!(
        "   Vehicles: {}   Run time: {}s   Fault injection: {}",
        num_vehicles.to_string().bright_white(),
        run_secs.to_string().bright_white(),
        if config.vehicle.fault_injection.enabled {
            "on".yellow()
        } else {
            "off".green()
        }
    );
    for id in 1..=num_vehicles {
        println!("{} Created vehicle: {}", "✓".green(), id);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run_fleet(Arc::new(catalog), config));
    // Timed-out workers are detached; do not wait for them.
    runtime.shutdown_timeout(Duration::from_millis(SHUTDOWN_TIMEOUT_MS));
    let outcomes = result?;

    let mut all_completed = true;
    for outcome in &outcomes {
        all_completed &= outcome.is_completed();
        print_outcome(outcome);
    }

    if all_completed {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn print_outcome(outcome: &VehicleOutcome) {
    match outcome {
        VehicleOutcome::Completed(report) => {
            println!(
                "{} End of simulation for Vehicle ID: {} ({} ticks, {} diagnosed)",
                "✅".green(),
                report.vehicle_id.to_string().bright_white(),
                report.ticks,
                report.diagnosed_ticks
            );
            if let Some((cause, score)) = report.final_diagnosis.most_probable_cause() {
                println!("   Most probable cause: {} ({:.3})", cause.bright_yellow(), score);
            }
        }
        VehicleOutcome::Failed { vehicle_id, error } => {
            println!(
                "{} Vehicle {} failed: {}",
                "❌".red(),
                vehicle_id.to_string().bright_white(),
                error.bright_red()
            );
        }
        VehicleOutcome::TimedOut { vehicle_id } => {
            println!(
                "{} Vehicle {} missed its deadline",
                "⏱️".yellow(),
                vehicle_id.to_string().bright_white()
            );
        }
    }
}
