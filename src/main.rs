//! Sensor Simulator - Main Entry Point
//!
//! Publishes simulated telemetry over MQTT and answers remote actions until
//! SIGINT or SIGTERM.

use clap::{Parser, Subcommand};
use sensor_sim::actions::{register_builtin_actions, ActionRegistry};
use sensor_sim::config::{ConfigError, SimulatorConfig};
use sensor_sim::device::{Publisher, PublisherSettings, ShutdownHandle};
use sensor_sim::encoding::WireFormat;
use sensor_sim::observability::init_with_verbosity;
use sensor_sim::telemetry::{SensorSimulator, SimulationParams};
use sensor_sim::transport::mqtt::{MqttSession, SessionConfig};
use sensor_sim::SimulatorResult;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// MQTT telemetry device simulator
#[derive(Parser)]
#[command(name = "sensor-sim")]
#[command(about = "Simulated telemetry device publishing over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to sensor-sim.toml when present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MQTT broker as HOST[:PORT] or a mqtt:// / mqtts:// URL
    #[arg(short = 'b', long, value_name = "HOST[:PORT]")]
    broker: Option<String>,

    /// Publish interval in milliseconds
    #[arg(short = 'i', long, value_name = "MS")]
    interval: Option<u64>,

    /// Minimum simulated CPU temperature
    #[arg(short = 't', long)]
    temp_min: Option<f64>,

    /// Maximum simulated CPU temperature
    #[arg(short = 'T', long)]
    temp_max: Option<f64>,

    /// Maximum compass change per sample, in degrees
    #[arg(short = 'c', long)]
    compass_var: Option<f64>,

    /// GPS drift in metres per second
    #[arg(short = 'g', long)]
    gps_drift: Option<f64>,

    /// MQTT username
    #[arg(short = 'u', long, env = "SENSOR_SIM_USERNAME")]
    username: Option<String>,

    /// MQTT password
    #[arg(short = 'p', long, env = "SENSOR_SIM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Device ID, also used as the MQTT client ID
    #[arg(short = 'd', long = "client-id", value_name = "ID")]
    client_id: Option<String>,

    /// Wire format for telemetry, status and actions (protobuf or json)
    #[arg(short = 'f', long)]
    format: Option<WireFormat>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulated device (default)
    Run,
    /// Validate the effective configuration
    Config {
        /// Print the effective configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_with_verbosity(cli.verbose);

    info!("Starting sensor simulator v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        None | Some(Commands::Run) => run_device(config, &cli).await,
        Some(Commands::Config { show }) => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// Defaults, then the TOML file, then command-line overrides
fn load_configuration(cli: &Cli) -> Result<SimulatorConfig, ConfigError> {
    if let Some(path) = &cli.config {
        info!("Loading configuration from: {}", path.display());
    }
    let mut config = SimulatorConfig::load(cli.config.as_deref())?;

    if let Some(broker) = &cli.broker {
        config.set_broker(broker)?;
    }
    if let Some(interval) = cli.interval {
        config.telemetry.interval_ms = interval;
    }
    if let Some(temp_min) = cli.temp_min {
        config.telemetry.temp_min = temp_min;
    }
    if let Some(temp_max) = cli.temp_max {
        config.telemetry.temp_max = temp_max;
    }
    if let Some(variation) = cli.compass_var {
        config.telemetry.compass_variation = variation;
    }
    if let Some(drift) = cli.gps_drift {
        config.telemetry.gps_drift = drift;
    }
    if let Some(client_id) = &cli.client_id {
        config.device.id = client_id.clone();
    }
    if let Some(format) = cli.format {
        config.telemetry.format = format;
    }

    config.validate()?;
    Ok(config)
}

async fn run_device(config: SimulatorConfig, cli: &Cli) -> SimulatorResult<()> {
    info!(
        device_id = %config.device.id,
        broker = %config.mqtt.broker_url,
        format = %config.telemetry.format,
        "Device configuration loaded"
    );

    let mut session_config = SessionConfig::from_simulator_config(&config)?;
    if cli.username.is_some() {
        session_config = session_config.with_credentials(cli.username.clone(), cli.password.clone());
    }
    let transport = Arc::new(MqttSession::new(session_config));

    let mut registry = ActionRegistry::new();
    register_builtin_actions(&mut registry);

    let shutdown = ShutdownHandle::new();
    spawn_signal_listener(shutdown.clone())?;

    let mut publisher = Publisher::new(
        PublisherSettings::from_config(&config),
        transport,
        registry,
        SensorSimulator::new(SimulationParams::from(&config.telemetry)),
        shutdown,
    );

    publisher.run().await?;
    Ok(())
}

/// Route SIGINT/SIGTERM to the shutdown handle
fn spawn_signal_listener(shutdown: ShutdownHandle) -> SimulatorResult<()> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|e| sensor_sim::SimulatorError::internal(format!("SIGINT handler: {e}")))?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|e| sensor_sim::SimulatorError::internal(format!("SIGTERM handler: {e}")))?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
        shutdown.trigger();
    });
    Ok(())
}

fn handle_config_command(config: &SimulatorConfig, show: bool) -> SimulatorResult<()> {
    if show {
        println!("{}", config.to_toml()?);
    }

    info!("Configuration validation complete");
    Ok(())
}
