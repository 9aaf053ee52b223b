//! Invoke Action
//!
//! Publishes one action request to a simulated device and, when an ack topic
//! is given, waits for the acknowledgment.
//!
//! Exit codes: 0 on success (or no ack requested), 2 when the device reports
//! failure, 1 on timeout or transport errors.

use clap::Parser;
use sensor_sim::config::SimulatorConfig;
use sensor_sim::encoding::{self, WireFormat};
use sensor_sim::observability::init_with_verbosity;
use sensor_sim::protocol::{ack_topic, action_topic, ActionAck, ActionRequest};
use sensor_sim::transport::mqtt::{MqttSession, SessionConfig};
use sensor_sim::transport::{QoS, SessionEvent, Transport};
use std::process;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Send an action request to the sensor simulator
#[derive(Parser)]
#[command(name = "invoke-action")]
#[command(about = "Invoke a remote action on a simulated device")]
#[command(version)]
struct Args {
    /// Action path below `action/`, e.g. `device/reboot`
    action: String,

    /// Payload handed to the action handler
    #[arg(long, default_value = "")]
    payload: String,

    /// Correlation topic; the ack arrives on `action/ack/<ACK_TOPIC>`
    #[arg(long)]
    ack_topic: Option<String>,

    /// How long to wait for the acknowledgment
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// MQTT broker as HOST[:PORT] or a mqtt:// / mqtts:// URL
    #[arg(short = 'b', long, default_value = "localhost:1883")]
    broker: String,

    /// Wire format the device uses
    #[arg(short = 'f', long, default_value = "protobuf")]
    format: WireFormat,

    /// MQTT username
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// MQTT password
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Why no acknowledgment was printed
#[derive(Debug)]
enum WaitOutcome {
    Acknowledged(ActionAck),
    TimedOut,
    Closed,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_with_verbosity(args.verbose);

    match run(args).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("Invocation failed: {}", e);
            process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<i32, Box<dyn std::error::Error>> {
    let request = ActionRequest {
        target_topic: action_topic(&args.action),
        ack_topic: args.ack_topic.clone().filter(|topic| !topic.is_empty()),
        payload: args.payload.clone().into_bytes(),
    };
    let payload = encoding::encode_action_request(args.format, &request)?;

    let mut config = SimulatorConfig::default();
    config.set_broker(&args.broker)?;
    config.device.id = format!("invoke-action-{}", process::id());
    let session = MqttSession::new(
        SessionConfig::from_simulator_config(&config)?
            .with_credentials(args.username.clone(), args.password.clone()),
    );

    let mut events = session
        .take_events()
        .await
        .ok_or("session event receiver unavailable")?;
    session.connect().await?;
    session.loop_start().await?;
    if !session.wait_connected(session.config().connect_timeout).await {
        return Err("broker did not confirm the session".into());
    }

    if let Some(destination) = request.ack_destination() {
        session.subscribe(&destination, QoS::AtLeastOnce).await?;
        debug!("Waiting for acknowledgment on {}", destination);
    }

    session
        .publish(&request.target_topic, payload, QoS::AtLeastOnce, false)
        .await?;
    info!(topic = %request.target_topic, action = %request.action_name(), "Action request published");

    let code = match request.ack_topic.as_deref() {
        None => 0,
        Some(ack) => {
            let timeout = Duration::from_millis(args.timeout_ms);
            match wait_for_ack(&mut events, &ack_topic(ack), args.format, timeout).await {
                WaitOutcome::Acknowledged(ack) => {
                    println!("{}", serde_json::to_string(&ack)?);
                    if ack.success {
                        0
                    } else {
                        2
                    }
                }
                WaitOutcome::TimedOut => {
                    error!("No acknowledgment within {}ms", args.timeout_ms);
                    1
                }
                WaitOutcome::Closed => {
                    error!("Session closed before the acknowledgment arrived");
                    1
                }
            }
        }
    };

    session.disconnect().await?;
    session.loop_stop().await?;
    Ok(code)
}

/// First decodable acknowledgment on `topic`, within `timeout`
async fn wait_for_ack(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    topic: &str,
    format: WireFormat,
    timeout: Duration,
) -> WaitOutcome {
    let wait = async {
        while let Some(event) = events.recv().await {
            if let SessionEvent::Message {
                topic: received,
                payload,
                ..
            } = event
            {
                if received != topic {
                    continue;
                }
                match encoding::decode_ack(format, &payload) {
                    Ok(ack) => return WaitOutcome::Acknowledged(ack),
                    Err(e) => debug!("Ignoring undecodable acknowledgment: {}", e),
                }
            }
        }
        WaitOutcome::Closed
    };

    tokio::time::timeout(timeout, wait)
        .await
        .unwrap_or(WaitOutcome::TimedOut)
}
