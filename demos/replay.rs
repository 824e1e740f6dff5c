// Telemetry replay example
//
// Streams a recorded sample file (or a live charger on a serial port) through
// the acquisition pipeline and prints what arrives on the data bus.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wtc3_logger::parameters::{lookup, STATUS_WORD, STRATEGY};
use wtc3_logger::{AcquisitionConfig, AcquisitionController, AcquisitionEvent, DataBus};

#[derive(Parser)]
#[command(name = "replay")]
#[command(version = "1.0")]
#[command(about = "Replay WTC3 charger telemetry")]
#[command(long_about = "Read a WTC3 charger stream from a sample file or serial port, decode every record and optionally keep a raw log of the session.")]
struct Args {
    /// Sample file to replay
    #[arg(short, long, default_value = "demos/sample.txt")]
    sample: PathBuf,

    /// Serial port; takes over from the sample file when given
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long, default_value_t = 115_200)]
    baudrate: u32,

    /// TOML config file; command line flags are ignored when given
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the raw session log
    #[arg(short, long, help = "Write every received line to a log in this directory")]
    raw_log: Option<PathBuf>,

    /// Run time in seconds
    #[arg(short = 't', long, default_value_t = 5)]
    seconds: u64,

    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,

    /// Write all records to this CSV file on exit
    #[arg(long)]
    csv: Option<PathBuf>,
}

fn build_config(args: &Args) -> Result<AcquisitionConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &args.config {
        return Ok(AcquisitionConfig::from_toml_file(path)?);
    }
    let mut config = AcquisitionConfig {
        line_delay_ms: 200,
        ..AcquisitionConfig::default()
    };
    match &args.port {
        Some(port) => {
            config.serial.port.clone_from(port);
            config.serial.baudrate = args.baudrate;
            config.serial.enabled = true;
        }
        None => config.sample_file = Some(args.sample.clone()),
    }
    if let Some(dir) = &args.raw_log {
        config.persist_raw = true;
        config.persist_path.clone_from(dir);
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let config = build_config(&args)?;
    println!("WTC3 Telemetry Replay");
    println!("=====================");

    let bus = Arc::new(DataBus::new(config.max_points));
    let mut controller = AcquisitionController::new(config, Arc::clone(&bus));
    let events = controller.events();

    let printer = bus.subscribe(|meta, record| {
        let strategy = meta.get(STRATEGY).map_or("-", String::as_str);
        let values: Vec<String> = record
            .iter()
            .map(|(key, value)| match lookup(key).and_then(|info| info.unit) {
                Some(unit) => format!("{key}={value} {unit}"),
                None => format!("{key}={value}"),
            })
            .collect();
        println!("[{strategy}] {}", values.join("  "));
    });

    controller.start();
    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    while Instant::now() < deadline {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(AcquisitionEvent::Status { message, .. }) => println!("Status: {message}"),
            Ok(AcquisitionEvent::Error(message)) => eprintln!("Error: {message}"),
            Ok(AcquisitionEvent::ConfigChanged(config)) => {
                println!("Raw log: {}", config.persist_path.display());
            }
            Err(_) => {}
        }
    }
    controller.stop();
    bus.unsubscribe(printer);

    println!("\nReceived {} record(s), generation {}", bus.len(), bus.generation());
    if let Some(status) = bus.latest().and_then(|record| record.get(STATUS_WORD).cloned()) {
        let detail = controller.decode_status(&status);
        println!("Status word {status}: {}", detail.badges.join(" | "));
        for line in &detail.details {
            println!("  {line}");
        }
    }
    println!("Export stem: {}", controller.export_stem(None));
    if let Some(path) = &args.csv {
        bus.export_csv(path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}
