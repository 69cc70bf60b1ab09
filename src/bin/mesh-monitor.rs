//! Mesh Monitor
//!
//! Subscribes to the root bridge's topic tree and prints every sensor report
//! it sees, decoded, one entry per message.

use clap::Parser;
use meshnode::mesh::MeshAddr;
use meshnode::sensor::{ReportPayload, SensorRecord};
use meshnode::transport::mqtt::TopicBuilder;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Watch sensor reports republished by the mesh root
#[derive(Parser)]
#[command(name = "mesh-monitor")]
#[command(about = "Monitor sensor reports bridged from the mesh")]
#[command(version)]
struct Args {
    /// Output format (pretty, compact, or json)
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Base topic the root publishes under
    #[arg(long, default_value = "mesh")]
    base_topic: String,

    /// Only show reports from this node address
    #[arg(long)]
    node: Option<MeshAddr>,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    broker_port: u16,

    /// MQTT username (optional)
    #[arg(long)]
    username: Option<String>,

    /// MQTT password (optional)
    #[arg(long, env = "MQTT_PASSWORD")]
    password: Option<String>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Color-coded, one block per report
    Pretty,
    /// Single line per report
    Compact,
    /// One JSON object per line
    Json,
}

const RESET: &str = "\x1b[0m";
const RECORD_COLOR: &str = "\x1b[1;32m";
const MARKER_COLOR: &str = "\x1b[1;33m";
const INVALID_COLOR: &str = "\x1b[1;31m";

/// What arrived on a sensor topic
#[derive(Debug)]
enum Observed {
    Record(SensorRecord),
    ErrorMarker(String),
    Invalid(String),
}

impl Observed {
    fn decode(payload: &[u8]) -> Self {
        match ReportPayload::decode(payload) {
            Ok(ReportPayload::Record(record)) => Self::Record(record),
            Ok(ReportPayload::ErrorMarker { err }) => Self::ErrorMarker(err),
            Err(_) => Self::Invalid(String::from_utf8_lossy(payload).into_owned()),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Record(_) => "REPORT",
            Self::ErrorMarker(_) => "ENCODE_ERROR",
            Self::Invalid(_) => "INVALID",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Self::Record(_) => RECORD_COLOR,
            Self::ErrorMarker(_) => MARKER_COLOR,
            Self::Invalid(_) => INVALID_COLOR,
        }
    }
}

fn format_message(key: &str, observed: &Observed, format: &OutputFormat) -> String {
    let timestamp = chrono::Utc::now().format("%H:%M:%S");

    match format {
        OutputFormat::Json => {
            let payload = match observed {
                Observed::Record(record) => {
                    serde_json::to_value(record).unwrap_or(serde_json::Value::Null)
                }
                Observed::ErrorMarker(err) => serde_json::json!({ "err": err }),
                Observed::Invalid(text) => serde_json::Value::String(text.clone()),
            };
            let line = serde_json::json!({
                "timestamp": timestamp.to_string(),
                "kind": observed.label(),
                "node": key,
                "payload": payload,
            });
            serde_json::to_string(&line).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Compact => match observed {
            Observed::Record(r) => format!(
                "{timestamp} [{}] {key} {} temp={}C humi={}% light={:.2}V raw={} motion={}",
                observed.label(),
                r.node_id,
                r.temp,
                r.humi,
                r.light_v,
                r.light_raw,
                r.motion
            ),
            Observed::ErrorMarker(err) => {
                format!("{timestamp} [{}] {key} err={err}", observed.label())
            }
            Observed::Invalid(text) => {
                format!("{timestamp} [{}] {key} {}", observed.label(), text.trim())
            }
        },
        OutputFormat::Pretty => {
            let color = observed.color_code();
            let label = observed.label();
            let body = match observed {
                Observed::Record(r) => format!(
                    "  node     {} ({})\n  temp     {} C\n  humidity {} %\n  light    {:.2} V (raw {})\n  motion   {}",
                    r.node_id,
                    r.role,
                    r.temp,
                    r.humi,
                    r.light_v,
                    r.light_raw,
                    if r.motion != 0 { "yes" } else { "no" }
                ),
                Observed::ErrorMarker(err) => format!("  node could not encode its record ({err})"),
                Observed::Invalid(text) => format!("  {text}"),
            };
            format!("{color}[{label}]{RESET} {timestamp} {key}\n{body}\n")
        }
    }
}

fn setup_mqtt_client(args: &Args) -> (AsyncClient, EventLoop) {
    let client_id = format!("mesh-monitor-{}", std::process::id());
    let mut mqtt_options = MqttOptions::new(client_id, &args.broker_host, args.broker_port);

    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        mqtt_options.set_credentials(username, password);
    }
    mqtt_options.set_keep_alive(Duration::from_secs(60));
    mqtt_options.set_clean_session(true);

    AsyncClient::new(mqtt_options, 100)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("mesh_monitor=info,rumqttc=warn")
        .init();

    let args = Args::parse();
    let filter = TopicBuilder::subscription_filter(&args.base_topic);

    println!("Mesh Monitor");
    println!("============");
    println!("Format: {:?}", args.format);
    println!("MQTT Broker: {}:{}", args.broker_host, args.broker_port);
    println!("Subscription: {filter}");
    if let Some(node) = &args.node {
        println!("Node filter: {node}");
    }
    println!("Press Ctrl+C to stop monitoring");
    println!();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received...");
        shutdown_flag.store(true, Ordering::Relaxed);

        tokio::time::sleep(Duration::from_secs(2)).await;
        warn!("Graceful shutdown timed out, forcing exit");
        std::process::exit(0);
    });

    let node_key = args.node.map(|addr| addr.routing_key());
    let mut reconnect_delay = 1;
    const MAX_RECONNECT_DELAY: u64 = 30;

    while !shutdown.load(Ordering::Relaxed) {
        info!("Connecting to MQTT broker...");
        let (client, mut eventloop) = setup_mqtt_client(&args);

        if let Err(e) = client.subscribe(filter.as_str(), QoS::AtMostOnce).await {
            error!("Failed to subscribe: {}", e);
            tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
            reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
            continue;
        }

        let mut connection_stable = false;
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Disconnecting from MQTT broker...");
                if tokio::time::timeout(Duration::from_millis(500), client.disconnect())
                    .await
                    .is_err()
                {
                    warn!("Disconnect timed out");
                }
                return Ok(());
            }

            match tokio::time::timeout(Duration::from_millis(100), eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    let Some(key) =
                        TopicBuilder::routing_key_from_topic(&args.base_topic, &publish.topic)
                    else {
                        continue;
                    };
                    if node_key.as_deref().is_some_and(|wanted| wanted != key) {
                        continue;
                    }

                    let observed = Observed::decode(&publish.payload);
                    let formatted = format_message(key, &observed, &args.format);
                    match args.format {
                        OutputFormat::Pretty => print!("{formatted}"),
                        _ => println!("{formatted}"),
                    }
                }
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    info!("Connected to MQTT broker");
                    connection_stable = true;
                    reconnect_delay = 1;
                }
                Ok(Ok(Event::Incoming(Packet::SubAck(_)))) => {
                    info!("Subscribed to {}", filter);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    if connection_stable {
                        warn!("MQTT connection lost: {}", e);
                    } else {
                        error!("MQTT connection error during setup: {}", e);
                    }
                    break;
                }
                Err(_) => continue,
            }
        }

        if !shutdown.load(Ordering::Relaxed) {
            warn!("Reconnecting in {} seconds...", reconnect_delay);
            tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
            reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
        }
    }

    Ok(())
}
