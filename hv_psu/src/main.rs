//! # HV PSU Controller Binary
//!
//! Runs the background poller against a high-voltage power supply and keeps
//! it sampling until Ctrl+C or until the poll loop hits a bus fault.
//!
//! # Usage
//!
//! ```bash
//! # From a config file
//! hv_psu --config /etc/hv_psu/psu.toml
//!
//! # Config entirely from the command line
//! hv_psu --bus-idx 1 --dev-addr 0x40 --voltage-factor 3000
//!
//! # Simulated supply, ramp to 500 V, verbose logging
//! hv_psu --simulate --voltage-factor 3000 --set-voltage 500 -v
//! ```

use clap::Parser;
use hv_common::config::{ConfigError, ConfigLoader, LogLevel};
use hv_common::psu::config::{PsuConfig, TransportKind};
use hv_common::psu::consts::DEFAULT_CONFIG_PATH;
use hv_psu::{
    ChannelMonitor, Poller, PollerState, SequencerConfig, TransportRegistry, VoltageSequencer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// HV PSU Controller - asynchronous poller and voltage sequencer
#[derive(Parser, Debug)]
#[command(name = "hv_psu")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Poll and control a high-voltage power supply over I2C")]
#[command(long_about = None)]
struct Args {
    /// Path to the configuration file (psu.toml).
    /// Defaults to /etc/hv_psu/psu.toml if it exists.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Index of the I2C bus to use (cf. /dev/i2c-<n>)
    #[arg(long)]
    bus_idx: Option<u32>,

    /// 7-bit address of the power supply on the I2C bus (cf. i2cdetect)
    #[arg(long, value_parser = parse_address)]
    dev_addr: Option<u16>,

    /// Output voltage at full scale, in volts
    #[arg(long)]
    voltage_factor: Option<f64>,

    /// Use the simulated power supply instead of the I2C bus
    #[arg(short = 's', long)]
    simulate: bool,

    /// Program this output voltage (volts) after startup
    #[arg(long, value_name = "VOLTS")]
    set_voltage: Option<f64>,

    /// Disable the output and clear a latched fault after startup
    #[arg(long)]
    reset_fault: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("HV PSU controller failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args);
    let log_level = config
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, log_level);
    let config = config?;

    info!(
        "HV PSU controller v{} starting ({}, transport={}, voltage_factor={} V)",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name,
        config.transport,
        config.voltage_factor
    );

    // Opening probes the bus, which blocks.
    let transport = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            TransportRegistry::with_builtin().create(config.transport.as_str(), &config)
        })
        .await??
    };

    let monitor = ChannelMonitor::new();
    let poller = Arc::new(Poller::start(
        transport,
        monitor.callbacks(),
        config.polling_interval(),
    ));
    let sequencer = VoltageSequencer::new(Arc::clone(&poller), SequencerConfig::from(&config));

    let outcome = match apply_startup_commands(&args, &sequencer).await {
        Ok(()) => {
            wait_for_shutdown(&poller).await;
            Ok(())
        }
        Err(e) => Err(e),
    };

    let stopped = poller.stop().await;

    if let Some(status) = monitor.status() {
        info!(
            "Last status word 0x{:08x}, programmed voltage {:?}",
            status.bits(),
            sequencer.get_voltage()
        );
    }

    outcome?;
    stopped?;
    info!("HV PSU controller shutdown complete");
    Ok(())
}

/// Run the one-shot control actions requested on the command line.
async fn apply_startup_commands(
    args: &Args,
    sequencer: &VoltageSequencer,
) -> Result<(), Box<dyn std::error::Error>> {
    if args.reset_fault {
        sequencer.reset_fault().await?;
        info!("Fault reset complete");
    }
    if let Some(volts) = args.set_voltage {
        let changed = sequencer.set_voltage(volts).await?;
        if changed {
            info!("Output voltage programmed to {} V", volts);
        } else {
            info!("Output voltage already at {} V", volts);
        }
    }
    Ok(())
}

/// Block until Ctrl+C or until the poll loop terminates on its own.
async fn wait_for_shutdown(poller: &Poller) {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
                Err(e) => error!("Unable to listen for shutdown signal: {}", e),
            }
        }
        state = poller.wait_terminated() => {
            match state {
                PollerState::Faulted(e) => error!(
                    "Poller on '{}' faulted, shutting down: {}",
                    poller.transport_name(),
                    e
                ),
                other => warn!(
                    "Poller on '{}' ended unexpectedly: {:?}",
                    poller.transport_name(),
                    other
                ),
            }
        }
    }
}

/// Load the config file (if any), apply command line overrides and validate.
fn load_config(args: &Args) -> Result<PsuConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => PsuConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            PsuConfig::load(Path::new(DEFAULT_CONFIG_PATH))?
        }
        None => PsuConfig::default(),
    };

    apply_overrides(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut PsuConfig, args: &Args) {
    if args.simulate {
        config.transport = TransportKind::Simulation;
    }
    if let Some(bus_idx) = args.bus_idx {
        config.bus_idx = Some(bus_idx);
    }
    if let Some(dev_addr) = args.dev_addr {
        config.dev_addr = Some(dev_addr);
    }
    if let Some(voltage_factor) = args.voltage_factor {
        config.voltage_factor = voltage_factor;
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal bus address.
fn parse_address(value: &str) -> Result<u16, String> {
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"));
    let parsed = match hex {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{value}': {e}"))
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level.as_directive()))
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
