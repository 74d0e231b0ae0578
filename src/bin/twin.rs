use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use powertrain_twin::catalog::DtcKind;
use powertrain_twin::fault_tree;
use powertrain_twin::{Catalog, DtcCode, EcuTag, SimSnapshot, Vehicle, VehicleConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const DEFAULT_DURATION_S: &str = "1";
const DEFAULT_VEHICLE_ID: &str = "1";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = App::new("twin")
        .version("0.1.0")
        .author("Powertrain Diagnostics Team")
        .about("🔋 Powertrain digital twin - single vehicle tools")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("catalog-dir")
                .long("catalog-dir")
                .value_name("DIR")
                .help("Directory holding dtcs.yaml and fault_tree.yaml (built-in catalog if omitted)")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "csv", "compact"])
                .default_value("compact")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("🚗 Run one vehicle and stream its snapshots")
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Wall-clock seconds to simulate")
                        .takes_value(true)
                        .default_value(DEFAULT_DURATION_S)
                        .validator(|v| match v.parse::<f64>() {
                            Ok(s) if s.is_finite() && s > 0.0 => Ok(()),
                            _ => Err("Duration must be a positive number of seconds".into()),
                        }),
                )
                .arg(
                    Arg::with_name("vehicle-id")
                        .long("vehicle-id")
                        .value_name("ID")
                        .takes_value(true)
                        .default_value(DEFAULT_VEHICLE_ID)
                        .validator(|v| match v.parse::<u32>() {
                            Ok(_) => Ok(()),
                            Err(_) => Err("Vehicle id must be an unsigned integer".into()),
                        }),
                )
                .arg(
                    Arg::with_name("fault-injection")
                        .long("fault-injection")
                        .help("Enable random fault injection"),
                )
                .arg(
                    Arg::with_name("config")
                        .short("c")
                        .long("config")
                        .value_name("FILE")
                        .help("Vehicle config JSON")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("dtc")
                .about("🔎 Look up one diagnostic trouble code")
                .arg(
                    Arg::with_name("ecu")
                        .help("ECU tag")
                        .required(true)
                        .possible_values(&["bmm", "pmm", "tmm"]),
                )
                .arg(Arg::with_name("code").help("DTC, e.g. A001").required(true)),
        )
        .subcommand(
            SubCommand::with_name("diagnose")
                .about("🩺 Rank probable causes for a set of active DTCs")
                .arg(
                    Arg::with_name("codes")
                        .help("Active DTCs")
                        .required(true)
                        .multiple(true),
                ),
        )
        .subcommand(SubCommand::with_name("catalog").about("📚 Summarise the loaded catalog"))
        .get_matches();

    let catalog = match matches.value_of("catalog-dir") {
        Some(dir) => Catalog::load_dir(dir)?,
        None => Catalog::builtin()?,
    };
    let format = matches.value_of("format").unwrap_or("compact");

    match matches.subcommand() {
        ("run", Some(sub)) => handle_run(sub, Arc::new(catalog), format),
        ("dtc", Some(sub)) => handle_dtc(sub, &catalog, format),
        ("diagnose", Some(sub)) => handle_diagnose(sub, &catalog, format),
        ("catalog", Some(_)) => {
            print_catalog(&catalog);
            Ok(())
        }
        _ => Ok(()),
    }
}

fn handle_run(matches: &ArgMatches<'_>, catalog: Arc<Catalog>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let duration: f64 = matches.value_of("duration").unwrap_or(DEFAULT_DURATION_S).parse()?;
    let vehicle_id: u32 = matches.value_of("vehicle-id").unwrap_or(DEFAULT_VEHICLE_ID).parse()?;

    let mut config = match matches.value_of("config") {
        Some(path) => VehicleConfig::from_json_file(path)?,
        None => VehicleConfig::default(),
    };
    if matches.is_present("fault-injection") {
        config.fault_injection.enabled = true;
    }

    let mut vehicle = Vehicle::new(vehicle_id, catalog, config)?;
    let run_time = Duration::from_secs_f64(duration);
    let started = Instant::now();

    if format == "csv" {
        println!("{}", SimSnapshot::csv_header());
    }
    while started.elapsed() < run_time {
        vehicle.tick()?;
        let snapshot = vehicle.get_sim_outputs();
        match format {
            "json" => println!("{}", snapshot.to_json()?),
            "csv" => println!("{}", snapshot.to_csv_row()),
            _ => print_compact(&snapshot, &vehicle),
        }
    }

    eprintln!(
        "{} End of simulation for Vehicle ID: {}",
        "✅".green(),
        vehicle.id().to_string().bright_white()
    );
    print_ecu_summary(&vehicle);
    Ok(())
}

fn print_ecu_summary(vehicle: &Vehicle) {
    for ecu in vehicle.ecus() {
        let stats = ecu.fault_stats();
        // A run that never left warm-up has no outputs to show.
        let outputs = match ecu.output_entries() {
            Ok(entries) => entries
                .into_iter()
                .map(|(name, value)| format!("{name}={value:.2}"))
                .collect::<Vec<_>>()
                .join(" "),
            Err(_) => "-".to_string(),
        };
        eprintln!(
            "   {:<8} {} injections, {} clears | {}",
            ecu.stage().to_string().bright_white(),
            stats.total_injections,
            stats.total_clears,
            outputs
        );
    }
}

fn print_compact(snapshot: &SimSnapshot, vehicle: &Vehicle) {
    let dtcs = vehicle.active_dtcs();
    let status = if dtcs.is_empty() {
        "OK".green()
    } else if vehicle.diagnosis().has_symptoms() {
        "DIAG".red()
    } else {
        "DTC".yellow()
    };
    println!(
        "[{:>7.3}s] {} SOC {:>6.2}% Vbus {:>7.1}V Ibus {:>6.1}A Tq {:>7.1}Nm Tfluid {:>5.1}C {}",
        snapshot.elapsed_time,
        status,
        snapshot.batt_soc,
        snapshot.v_bus,
        snapshot.i_bus,
        snapshot.torque_mech,
        snapshot.t_fluid,
        dtcs.iter().map(DtcCode::as_str).collect::<Vec<_>>().join(" ")
    );
}

fn handle_dtc(matches: &ArgMatches<'_>, catalog: &Catalog, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let ecu = matches.value_of("ecu").unwrap_or_default();
    let code = matches.value_of("code").unwrap_or_default();
    let metadata = catalog.get_dtc_metadata(ecu, code)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
        return Ok(());
    }

    println!(
        "{} {} {}",
        metadata.code.to_string().bright_white().bold(),
        metadata.ecu.as_str().to_uppercase().bright_blue(),
        metadata.kind.to_string().yellow()
    );
    println!("   {}", metadata.description);
    if let Some(bounds) = metadata.bounds {
        println!("   Range: [{}, {}]", bounds.lower, bounds.upper);
    }
    Ok(())
}

fn handle_diagnose(matches: &ArgMatches<'_>, catalog: &Catalog, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let codes = matches
        .values_of("codes")
        .into_iter()
        .flatten()
        .map(str::parse::<DtcCode>)
        .collect::<Result<Vec<_>, _>>()?;

    let diagnosis = fault_tree::diagnose(catalog.fault_tree(), &codes);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&diagnosis)?);
        return Ok(());
    }

    if !diagnosis.has_symptoms() {
        println!("{} {}", "✅".green(), "No symptom matches these DTCs".bright_green());
        return Ok(());
    }

    println!("\n{}", "🩺 Matched Symptoms".bright_blue().bold());
    for symptom in diagnosis.symptoms.keys() {
        println!("   • {}", symptom.bright_white());
    }
    println!("\n{}", "📊 Probable Causes".bright_white().bold());
    for (rank, (cause, score)) in diagnosis.ranked_causes().into_iter().enumerate() {
        let line = format!("   {}. {:<28} {:.3}", rank + 1, cause, score);
        if rank == 0 {
            println!("{}", line.bright_yellow());
        } else {
            println!("{}", line);
        }
    }
    Ok(())
}

fn print_catalog(catalog: &Catalog) {
    println!("{}", "📚 DTC Catalog".bright_blue().bold());
    for ecu in EcuTag::ALL {
        let codes: Vec<_> = catalog.dtcs().codes_for(ecu).collect();
        let rationality = codes
            .iter()
            .filter(|(_, definition)| definition.kind == DtcKind::Rationality)
            .count();
        println!(
            "   {} {:>3} codes ({} rationality)",
            ecu.as_str().to_uppercase().bright_white(),
            codes.len(),
            rationality
        );
    }

    println!("\n{}", "🌳 Fault Tree".bright_blue().bold());
    for (name, symptom) in &catalog.fault_tree().symptoms {
        let conditions: Vec<&str> = symptom.conditions.iter().map(DtcCode::as_str).collect();
        println!("   {:<26} {}", name.bright_white(), conditions.join(" "));
    }
}
