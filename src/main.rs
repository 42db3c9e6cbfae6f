use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tmeter::config::{self, Config};
use tmeter::link::{self, ControllerLink, LinkOpener, SerialOpener};
use tmeter::{HostDriver, Measurement};

/// Transistor meter host
#[derive(Parser, Debug)]
#[command(
    name = "tmeter-host",
    version,
    about = "Sweep the gate of an N-channel JFET and record its transfer characteristic."
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port of the controller board
    #[arg(long, global = true)]
    port: Option<String>,

    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Output directory for JSON/PNG/CSV
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Output file prefix (files are named <prefix>-<n>.*)
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// First gate voltage, V
    #[arg(long, global = true, allow_negative_numbers = true)]
    start: Option<f32>,

    /// Last gate voltage, V
    #[arg(long, global = true, allow_negative_numbers = true)]
    stop: Option<f32>,

    #[arg(long, global = true)]
    steps: Option<u16>,

    /// Longest wait for any single record, ms
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Also write a CSV file
    #[arg(long, global = true)]
    csv: bool,

    /// Talk to the built-in simulated rig instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// More logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
enum Commands {
    /// Run one sweep and write its artifacts (default)
    Measure,
    /// Print the controller's firmware and protocol version
    Version,
    /// List serial ports
    Ports,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    run(&cli).await
}

async fn run(cli: &Cli) -> Result<(), BoxError> {
    let command = cli.command.unwrap_or(Commands::Measure);
    if command == Commands::Ports {
        let ports = link::available_ports();
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{port}");
        }
        return Ok(());
    }

    let config = resolve_config(cli)?;
    let opener = opener(cli, &config)?;

    match command {
        Commands::Version => {
            let stream = opener.open().await?;
            let link = ControllerLink::new(stream, Duration::from_millis(config.link.timeout_ms));
            let info = HostDriver::new(link).query_version().await?;
            println!("firmware {} protocol {}", info.firmware, info.protocol);
        }
        Commands::Measure => match tmeter::measure(opener.as_ref(), &config).await {
            Ok(measurement) => print_report(&measurement),
            Err(e) => {
                tracing::error!("Measurement failed ({:?}): {}", e.kind(), e);
                return Err(e.into());
            }
        },
        Commands::Ports => {}
    }
    Ok(())
}

/// Config file (if any), then command-line overrides, then validation.
fn resolve_config(cli: &Cli) -> Result<Config, BoxError> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            config::load_config(path)?
        }
        None => Config::default(),
    };
    if let Some(port) = &cli.port {
        config.link.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.link.baud = baud;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.link.timeout_ms = timeout_ms;
    }
    if let Some(dir) = &cli.output {
        config.output.dir = dir.clone();
    }
    if let Some(prefix) = &cli.prefix {
        config.output.prefix = prefix.clone();
    }
    if cli.csv {
        config.output.csv = true;
    }
    if let Some(start) = cli.start {
        config.sweep.start = start;
    }
    if let Some(stop) = cli.stop {
        config.sweep.stop = stop;
    }
    if let Some(steps) = cli.steps {
        config.sweep.steps = steps;
    }
    config.validate()?;
    Ok(config)
}

fn opener(cli: &Cli, config: &Config) -> Result<Box<dyn LinkOpener>, BoxError> {
    if cli.simulate {
        #[cfg(feature = "sim-in-host")]
        return Ok(Box::new(tmeter::SimulatorOpener {
            config: config.simulator.clone(),
        }));
        #[cfg(not(feature = "sim-in-host"))]
        return Err("built without the simulator (feature sim-in-host)".into());
    }
    Ok(Box::new(SerialOpener {
        port: config.link.port.clone(),
        baud: config.link.baud,
        open_settle: Duration::from_millis(config.link.open_settle_ms),
    }))
}

fn print_report(m: &Measurement) {
    println!("  Vg, V  Id, mA");
    for s in m.results.samples() {
        println!("{:7.3} {:7.3}", s.stimulus, s.response);
    }
    match &m.parameters {
        Some(p) => {
            println!("Idss = {:.2} mA", p.idss);
            println!("Voff = {:.2} V", p.voff);
            println!("Yfs  = {:.2} mA/V", p.yfs);
            println!("Vsat = {:.2} V", p.vsat);
        }
        None => println!("Bad transistor: not enough conducting samples to fit"),
    }
    for path in m.artifacts.all() {
        println!("Wrote {}", path.display());
    }
}
