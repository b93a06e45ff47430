//! CLI Entry Point for keithley_daq
//!
//! Headless front end over the acquisition core:
//! - List serial ports
//! - Initialize the instrument / change its integration rate
//! - Acquire continuously, printing the last reading, then export a `.dat` file
//!
//! # Usage
//!
//! ```bash
//! keithley_daq ports
//! keithley_daq acquire --port /dev/ttyUSB0 --rate 1 --duration 60 \
//!     --export-name run01 --sample-name "Graphene FET" --sample-info "dark, Vg = 0 V"
//! keithley_daq --mock acquire --port MOCK0 --duration 5
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keithley_daq::acquisition::{AcquisitionScheduler, InstrumentLink};
use keithley_daq::config::AppConfig;
use keithley_daq::data::{export_samples, ExportRequest};
use keithley_daq::hardware::ports::{PortInfo, PortRegistry, StaticPorts};
use keithley_daq::hardware::{IntegrationRate, MockTransport, SerialTransportBuilder};
use keithley_daq::logging;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Port name offered in `--mock` mode.
const MOCK_PORT: &str = "MOCK0";

#[derive(Parser)]
#[command(name = "keithley_daq")]
#[command(about = "Continuous current acquisition from a Keithley picoammeter", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/keithley_daq.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use a simulated instrument instead of a serial port
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Send the device setup sequence
    Init {
        /// Port identifier or display name
        #[arg(long)]
        port: String,

        /// Integration rate in NPLC (defaults to the configured rate)
        #[arg(long)]
        rate: Option<String>,
    },

    /// Change the integration rate
    SetRate {
        /// Port identifier or display name
        #[arg(long)]
        port: String,

        /// Integration rate in NPLC; non-positive or non-numeric input is clamped
        rate: String,
    },

    /// Initialize, then sample until the duration elapses or Ctrl+C
    Acquire {
        /// Port identifier or display name
        #[arg(long)]
        port: String,

        /// Integration rate in NPLC (defaults to the configured rate)
        #[arg(long)]
        rate: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Write the series to <directory>/<export-name>.dat when done
        #[arg(long)]
        export_name: Option<String>,

        /// Sample name for the export header
        #[arg(long, default_value = "")]
        sample_name: String,

        /// Sample information for the export header
        #[arg(long, default_value = "")]
        sample_info: String,

        /// Export directory (defaults to the configured directory)
        #[arg(long)]
        directory: Option<PathBuf>,
    },
}

/// Port registry and scheduler wired to either the serial line or the mock.
struct Station {
    registry: PortRegistry,
    scheduler: AcquisitionScheduler,
}

impl Station {
    fn new(config: &AppConfig, mock: bool) -> Self {
        let (registry, link) = if mock {
            (
                PortRegistry::new(StaticPorts(vec![PortInfo::new(
                    MOCK_PORT,
                    "Simulated Keithley 6485",
                )])),
                InstrumentLink::new(
                    MockTransport::new()
                        .with_devices([MOCK_PORT])
                        .with_latency(Duration::from_millis(5)),
                ),
            )
        } else {
            (
                PortRegistry::system(),
                InstrumentLink::new(SerialTransportBuilder::from_config(&config.serial).build()),
            )
        };

        Self {
            registry,
            scheduler: AcquisitionScheduler::from_config(Arc::new(link), &config.acquisition),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;
    config.validate()?;
    logging::init_from_config(&config)?;

    let mut station = Station::new(&config, cli.mock);
    let default_rate = IntegrationRate::new(config.acquisition.integration_rate);

    match cli.command {
        Commands::Ports => list_ports(&station),
        Commands::Init { port, rate } => {
            let handle = station.registry.select(&port)?;
            let rate = rate.as_deref().map_or(default_rate, IntegrationRate::from);
            station.scheduler.initialize(&handle.port, rate).await?;
            println!("{} initialized at {}", handle.port, rate);
            Ok(())
        }
        Commands::SetRate { port, rate } => {
            let handle = station.registry.select(&port)?;
            let rate = station
                .scheduler
                .submit_integration_rate(&handle.port, rate.as_str())
                .await?;
            println!("{} set to {}", handle.port, rate);
            Ok(())
        }
        Commands::Acquire {
            port,
            rate,
            duration,
            export_name,
            sample_name,
            sample_info,
            directory,
        } => {
            let handle = station.registry.select(&port)?;
            let rate = rate.as_deref().map_or(default_rate, IntegrationRate::from);
            station
                .scheduler
                .initialize(&handle.port, rate)
                .await
                .context("Failed to initialize device")?;

            acquire(&station.scheduler, &handle.port, duration).await?;

            if let Some(export_name) = export_name {
                let request = ExportRequest {
                    sample_name,
                    sample_info,
                    export_name,
                    directory: directory.unwrap_or_else(|| config.export.directory.clone()),
                    device_info: station.registry.description(&handle.port),
                };
                let samples = station.scheduler.buffer().snapshot().await;
                let path = export_samples(&request, &samples)?;
                println!("Exported {} samples to {}", samples.len(), path.display());
            }

            station.registry.deselect();
            station.scheduler.link().unbind().await;
            Ok(())
        }
    }
}

fn list_ports(station: &Station) -> Result<()> {
    let ports = station.registry.ports();
    if ports.is_empty() {
        println!("No ports available");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

async fn acquire(
    scheduler: &AcquisitionScheduler,
    port: &str,
    duration: Option<f64>,
) -> Result<()> {
    scheduler.start(port)?;

    let deadline = async {
        match duration {
            Some(secs) if secs > 0.0 => tokio::time::sleep(Duration::from_secs_f64(secs)).await,
            _ => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut readout = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                break;
            }
            _ = readout.tick() => {
                match scheduler.last_sample().await {
                    Some(last) => println!("Last data point: {}", last.status_line()),
                    None => println!("Last data point: N/A"),
                }
            }
        }
    }

    // The port must be free before anything else touches it.
    scheduler.stop_and_wait().await;

    let stats = scheduler.stats();
    info!(
        samples = stats.samples,
        skipped = stats.skipped,
        failures = stats.failures,
        "Acquisition finished"
    );
    Ok(())
}
