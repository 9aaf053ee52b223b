//! Sensor Monitor
//!
//! Subscribes to everything the simulated device publishes and prints one
//! line per message. Protobuf payloads are decoded into a summary; JSON
//! payloads are printed as received.

use clap::Parser;
use prost::Message;
use sensor_sim::config::SimulatorConfig;
use sensor_sim::encoding::{self, protobuf, WireFormat};
use sensor_sim::observability::init_with_verbosity;
use sensor_sim::protocol::{
    is_ack_topic, StatusKind, SENSOR_ALL_TOPIC, SENSOR_COMPASS_TOPIC, SENSOR_GPS_TOPIC,
    SENSOR_STATUS_TOPIC, SENSOR_TEMPERATURE_TOPIC,
};
use sensor_sim::transport::mqtt::{MqttSession, SessionConfig};
use sensor_sim::transport::{QoS, SessionEvent, Transport};
use std::process;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

const SENSOR_WILDCARD: &str = "sensor/#";
const ACK_WILDCARD: &str = "action/ack/#";

/// Monitor the sensor simulator's MQTT traffic
#[derive(Parser)]
#[command(name = "sensor-monitor")]
#[command(about = "Print telemetry, status and acknowledgments from a simulated device")]
#[command(version)]
struct Args {
    /// MQTT broker as HOST[:PORT] or a mqtt:// / mqtts:// URL
    #[arg(short = 'b', long, default_value = "localhost:1883")]
    broker: String,

    /// Wire format the device publishes with
    #[arg(short = 'f', long, default_value = "protobuf")]
    format: WireFormat,

    /// MQTT username
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// MQTT password
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Seconds to wait for the broker to accept the session
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_with_verbosity(args.verbose);

    if let Err(e) = run(args).await {
        error!("Monitor failed: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = SimulatorConfig::default();
    config.set_broker(&args.broker)?;
    config.device.id = format!("sensor-monitor-{}", process::id());

    let mut session_config = SessionConfig::from_simulator_config(&config)?
        .with_credentials(args.username.clone(), args.password.clone());
    session_config.connect_timeout = Duration::from_secs(args.connect_timeout);

    let session = MqttSession::new(session_config);
    let mut events = session
        .take_events()
        .await
        .ok_or("session event receiver unavailable")?;

    session.connect().await?;
    session.loop_start().await?;
    if !session
        .wait_connected(Duration::from_secs(args.connect_timeout))
        .await
    {
        return Err("broker did not confirm the session".into());
    }

    session.subscribe(SENSOR_WILDCARD, QoS::AtMostOnce).await?;
    session.subscribe(ACK_WILDCARD, QoS::AtLeastOnce).await?;
    info!(broker = %args.broker, format = %args.format, "Monitoring {} and {}", SENSOR_WILDCARD, ACK_WILDCARD);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted, stopping monitor");
                break;
            }
            event = events.recv() => {
                match event {
                    Some(SessionEvent::Message { topic, payload, retain }) => {
                        let marker = if retain { " (retained)" } else { "" };
                        match describe(args.format, &topic, &payload) {
                            Ok(line) => println!("[{topic}]{marker} {line}"),
                            Err(e) => println!("[{topic}]{marker} <undecodable: {e}>"),
                        }
                    }
                    Some(SessionEvent::Disconnected { reason }) => warn!("Connection lost: {}", reason),
                    Some(SessionEvent::Connected { .. }) => info!("Connected to broker"),
                    Some(SessionEvent::Published { .. }) => {}
                    None => {
                        warn!("Session closed");
                        break;
                    }
                }
            }
        }
    }

    session.disconnect().await?;
    session.loop_stop().await?;
    Ok(())
}

/// One-line rendering of a payload, selected by topic
fn describe(format: WireFormat, topic: &str, payload: &[u8]) -> Result<String, String> {
    if format == WireFormat::Json {
        return std::str::from_utf8(payload)
            .map(str::to_string)
            .map_err(|e| e.to_string());
    }

    if is_ack_topic(topic) {
        let ack = encoding::decode_ack(format, payload).map_err(|e| e.to_string())?;
        return Ok(format!(
            "ack={} success={} error={:?} result={:?}",
            ack.action, ack.success, ack.error, ack.result
        ));
    }

    let line = match topic {
        SENSOR_ALL_TOPIC => {
            let data = protobuf::SensorData::decode(payload).map_err(|e| e.to_string())?;
            let gps = data.gps.unwrap_or_default();
            format!(
                "device={} temp={:.2}C heading={:.2} gps=({:.6}, {:.6}, {:.2}m) ts={} v{}",
                data.device_id,
                data.cpu_temperature,
                data.compass_heading,
                gps.latitude,
                gps.longitude,
                gps.altitude,
                data.timestamp,
                data.version
            )
        }
        SENSOR_TEMPERATURE_TOPIC => {
            let data = protobuf::TemperatureData::decode(payload).map_err(|e| e.to_string())?;
            format!("temperature={:.2} {} ts={}", data.temperature, data.unit, data.timestamp)
        }
        SENSOR_COMPASS_TOPIC => {
            let data = protobuf::CompassData::decode(payload).map_err(|e| e.to_string())?;
            format!("heading={:.2} {} ts={}", data.heading, data.unit, data.timestamp)
        }
        SENSOR_GPS_TOPIC => {
            let data = protobuf::GpsPositionData::decode(payload).map_err(|e| e.to_string())?;
            let position = data.position.unwrap_or_default();
            format!(
                "lat={:.6} lon={:.6} alt={:.2}m accuracy={:.1}m ts={}",
                position.latitude,
                position.longitude,
                position.altitude,
                position.accuracy,
                data.timestamp
            )
        }
        SENSOR_STATUS_TOPIC => {
            let status = protobuf::decode_status(payload).map_err(|e| e.to_string())?;
            format!(
                "status={:?} device={} message={:?} ts={}",
                StatusKind::from(status.status()),
                status.device_id,
                status.message,
                status.timestamp
            )
        }
        _ => format!("{} bytes", payload.len()),
    };
    Ok(line)
}
