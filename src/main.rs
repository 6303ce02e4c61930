//! CLI Entry Point for counter-bridge
//!
//! Opens the sensor's serial port and forwards every detection to the data store
//! until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Auto-detect the USB serial adapter
//! SUPABASE_URL=https://xyz.supabase.co SUPABASE_API_KEY=... counter-bridge
//!
//! # Credentials from ./.env, explicit port
//! counter-bridge /dev/cu.usbserial-10
//!
//! # Show candidate ports
//! counter-bridge --list-ports
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use counter_bridge::config::BridgeConfig;
use counter_bridge::serial::{self, LineReader};
use counter_bridge::{tracing_init, BridgeError, Monitor, RestStore};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "counter-bridge")]
#[command(about = "Forward TCRT5000 counter detections to the plan data store", long_about = None)]
struct Cli {
    /// Serial device path; auto-detected when omitted
    port: Option<String>,

    /// Configuration file
    #[arg(long, default_value = counter_bridge::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Baud rate override
    #[arg(long)]
    baud: Option<u32>,

    /// Log output format (pretty, compact, json)
    #[arg(long)]
    log_format: Option<String>,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_ports {
        return list_ports();
    }

    let mut config = BridgeConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        config.serial.port = Some(port);
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(format) = cli.log_format {
        config.application.log_format = format;
    }

    config.validate()?;
    tracing_init::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let port_name = resolve_port(&config)?;
    info!(
        app = %config.application.name,
        port = %port_name,
        baud_rate = config.serial.baud_rate,
        store = %config.store.url,
        "Starting counter bridge"
    );

    let port = serial::open(
        &port_name,
        config.serial.baud_rate,
        config.serial.read_timeout(),
    )
    .with_context(|| format!("Failed to open serial port '{}'", port_name))?;
    info!(port = %port_name, "Serial port connected");

    let store = RestStore::new(&config.store);
    let mut monitor = Monitor::new(store).with_all_plans_logged(config.store.log_all_plans);
    let stop = monitor.stop_handle();

    let mut task = tokio::task::spawn_blocking(move || {
        let mut reader = LineReader::new(port);
        let result = monitor.run(&mut reader);
        drop(reader);
        info!("Serial port closed");
        result
    });

    let joined = tokio::select! {
        joined = &mut task => joined,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Interrupt handler failed; stopping anyway");
            }
            info!("Interrupt received, stopping monitor");
            stop.store(true, std::sync::atomic::Ordering::SeqCst);
            task.await
        }
    };

    match joined.context("Monitor task panicked")? {
        Ok(stats) => {
            info!(
                detections = stats.detections,
                recorded = stats.recorded,
                "Monitor finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Monitor terminated");
            Err(e.into())
        }
    }
}

fn resolve_port(config: &BridgeConfig) -> Result<String> {
    if let Some(port) = &config.serial.port {
        return Ok(port.clone());
    }

    if let Some(port) = serial::detect_sensor_port()? {
        info!(port = %port, "Auto-detected sensor port");
        return Ok(port);
    }

    error!("No sensor serial device detected; check the USB cable and driver");
    match serial::available_ports() {
        Ok(ports) if ports.is_empty() => warn!("No serial ports found"),
        Ok(ports) => {
            for port in &ports {
                warn!("Available: {}", serial::describe_port(port));
            }
        }
        Err(e) => warn!(error = %e, "Could not enumerate serial ports"),
    }
    warn!("Pass the device explicitly, e.g. counter-bridge /dev/cu.usbserial-10");
    Err(BridgeError::NoSerialDevice.into())
}

fn list_ports() -> Result<()> {
    println!("Available serial ports:");
    let ports = serial::available_ports()?;
    if ports.is_empty() {
        println!("  (none)");
    }
    let detected = serial::pick_sensor_port(&ports);
    for port in &ports {
        let marker = if Some(&port.port_name) == detected.as_ref() {
            " (sensor candidate)"
        } else {
            ""
        };
        println!("  {}{}", serial::describe_port(port), marker);
    }
    Ok(())
}
