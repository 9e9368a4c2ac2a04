//! Line detector supervisor CLI.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use line_detector::config::{ConfigError, ConfigLoader, DetectorConfig};
use line_detector::supervisor::LineDetectorSupervisor;

#[derive(Parser)]
#[command(
    name = "line-detector",
    about = "Supervisor for an external camera line-detection process",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor and poll for line positions.
    Run {
        /// Config file path (defaults to the standard search locations).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Detector binary (overrides the config file).
        #[arg(long)]
        binary: Option<PathBuf>,
        /// Pipe the detector writes records to.
        #[arg(long)]
        inbound: Option<PathBuf>,
        /// Pipe the detector reads commands from.
        #[arg(long)]
        outbound: Option<PathBuf>,
        /// Calibration tolerance scale factor.
        #[arg(long)]
        tolerance_factor: Option<f64>,
        /// Whitespace-separated arguments passed to the detector.
        #[arg(long)]
        params: Option<String>,
        /// Milliseconds between detection requests.
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Resolve the effective configuration: a fully specified flag set needs no
/// file at all, otherwise the file is loaded and flags override its values.
fn build_config(
    file: Option<PathBuf>,
    binary: Option<PathBuf>,
    inbound: Option<PathBuf>,
    outbound: Option<PathBuf>,
    tolerance_factor: Option<f64>,
    params: Option<String>,
) -> Result<DetectorConfig, ConfigError> {
    let mut config = if let (Some(binary), Some(inbound), Some(outbound)) =
        (binary.as_ref(), inbound.as_ref(), outbound.as_ref())
    {
        DetectorConfig {
            binary: binary.clone(),
            inbound_pipe: inbound.clone(),
            outbound_pipe: outbound.clone(),
            tolerance_factor: 1.0,
            params: String::new(),
        }
    } else {
        let loader = match file {
            Some(path) => ConfigLoader::with_path(path),
            None => ConfigLoader::new(),
        };
        loader.load()?
    };

    if let Some(binary) = binary {
        config.binary = binary;
    }
    if let Some(inbound) = inbound {
        config.inbound_pipe = inbound;
    }
    if let Some(outbound) = outbound {
        config.outbound_pipe = outbound;
    }
    if let Some(tolerance_factor) = tolerance_factor {
        config.tolerance_factor = tolerance_factor;
    }
    if let Some(params) = params {
        config.params = params;
    }

    Ok(config)
}

async fn run(config: DetectorConfig, interval: Duration) {
    tracing::info!(
        binary = %config.binary.display(),
        inbound = %config.inbound_pipe.display(),
        outbound = %config.outbound_pipe.display(),
        "Starting line detector supervisor"
    );

    let supervisor = LineDetectorSupervisor::spawn(config);
    supervisor.ensure_initialized();

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                supervisor.request_detection();
                tracing::info!(
                    reading = supervisor.current_reading(),
                    state = ?supervisor.state(),
                    "line position"
                );
            }
        }
    }

    tracing::info!("Shutting down");
    supervisor.shutdown().await;
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            binary,
            inbound,
            outbound,
            tolerance_factor,
            params,
            interval_ms,
        } => {
            match build_config(config, binary, inbound, outbound, tolerance_factor, params) {
                Ok(config) => run(config, Duration::from_millis(interval_ms)).await,
                Err(e) => {
                    tracing::error!(error = %e, "Configuration error");
                    std::process::exit(1);
                }
            }
        }
    }
}
