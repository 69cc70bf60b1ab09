//! meshnode - Main Entry Point
//!
//! Runs a configured deployment against the simulated mesh, with the root
//! bridging to a real MQTT broker, or validates a configuration file.

use meshnode::config::MeshConfig;
use meshnode::mesh::NodeType;
use meshnode::node::{NodeLifecycle, Peripherals};
use meshnode::observability::{init_default_logging, init_logging, metrics, parse_level, LogFormat};
use meshnode::sensor::LogDisplay;
use meshnode::sim::{SimInstruments, SimMesh, SimTransport};
use meshnode::transport::mqtt::MqttSink;
use meshnode::transport::PublishSink;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::{
    signal,
    time::{sleep, Duration},
};
use tracing::{error, info, warn};

/// Leaf/relay/root mesh node coordinator
#[derive(Parser)]
#[command(name = "meshnode")]
#[command(about = "Parent selection, connectivity tracking and sensor relay for a wireless mesh")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured node on the simulated mesh
    Simulate {
        /// Stop after this many seconds instead of waiting for a signal
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Interval between telemetry log lines
        #[arg(long, default_value_t = 30)]
        telemetry_secs: u64,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        level => {
            let format = LogFormat::parse(
                &std::env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
            );
            let level = if level == 1 { "DEBUG" } else { "TRACE" };
            init_logging(parse_level(level), format, false);
        }
    }

    info!("Starting meshnode v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Simulate {
            duration_secs,
            telemetry_secs,
        } => run_simulation(config, duration_secs, telemetry_secs).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<MeshConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(MeshConfig::load_from_file(path)?);
    }

    for path_str in ["mesh.toml", "config/mesh.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(MeshConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create mesh.toml".into())
}

fn handle_config_command(config: &MeshConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(
        nodes = config.nodes.len(),
        links = config.links.len(),
        "Configuration validation complete"
    );
    Ok(())
}

/// Boot order mirrors a field deployment: root first, then relays, then leaves
fn boot_rank(role: NodeType) -> u8 {
    match role {
        NodeType::Root => 0,
        NodeType::Relay => 1,
        NodeType::Leaf => 2,
    }
}

async fn run_simulation(
    config: MeshConfig,
    duration_secs: Option<u64>,
    telemetry_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mesh, transports) = SimMesh::from_config(&config);

    let mut sink: Option<Arc<MqttSink>> = None;
    if let (Some(root), Some(mqtt)) = (config.root(), config.mqtt.clone()) {
        let mut mqtt_sink = MqttSink::new(&root.id, mqtt)?;
        mqtt_sink.connect()?;
        sink = Some(Arc::new(mqtt_sink));
    }

    let mut order: Vec<_> = config.nodes.iter().collect();
    order.sort_by_key(|n| boot_rank(n.role));

    let mut nodes: Vec<NodeLifecycle<SimTransport>> = Vec::new();
    for (seed, node) in order.into_iter().enumerate() {
        let transport = transports
            .get(&node.id)
            .cloned()
            .ok_or_else(|| format!("no simulated transport for '{}'", node.id))?;
        let mut lifecycle = NodeLifecycle::new(&config, &node.id, transport)?;

        let peripherals = match node.role {
            NodeType::Leaf => Peripherals::leaf(
                Box::new(SimInstruments::new(u32::try_from(seed).unwrap_or(0))),
                Box::new(LogDisplay::new(node.id.clone())),
            ),
            NodeType::Relay => Peripherals::default(),
            NodeType::Root => match &sink {
                Some(sink) => Peripherals::root(sink.clone() as Arc<dyn PublishSink>),
                None => return Err("root node configured without [mqtt]".into()),
            },
        };

        if let Err(e) = lifecycle.start(peripherals).await {
            error!(node_id = %node.id, error = %e, fatal = e.is_fatal(), "Node failed to boot");
            return Err(e.into());
        }
        nodes.push(lifecycle);
    }

    let telemetry = spawn_telemetry_task(mesh.clone(), telemetry_secs);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(nodes = nodes.len(), "Simulation running");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = run_for(duration_secs) => {
            info!("Simulation duration elapsed, shutting down...");
        }
    }

    telemetry.abort();
    // Leaves first so nothing is left sending into a stopped root
    for lifecycle in nodes.iter_mut().rev() {
        lifecycle.shutdown().await;
    }

    if let Some(sink) = sink {
        match Arc::try_unwrap(sink) {
            Ok(mut sink) => {
                if let Err(e) = sink.disconnect().await {
                    warn!("MQTT disconnect failed: {}", e);
                }
            }
            Err(_) => warn!("Sink still shared at shutdown, dropping without disconnect"),
        }
    }

    log_telemetry(&mesh);
    Ok(())
}

async fn run_for(duration_secs: Option<u64>) {
    match duration_secs {
        Some(secs) => sleep(Duration::from_secs(secs)).await,
        None => std::future::pending::<()>().await,
    }
}

fn spawn_telemetry_task(mesh: SimMesh, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.tick().await; // First tick completes immediately, skip it

        loop {
            interval.tick().await;
            log_telemetry(&mesh);
        }
    })
}

fn log_telemetry(mesh: &SimMesh) {
    let snapshot = metrics().get_metrics();
    match serde_json::to_string(&snapshot) {
        Ok(json) => info!(telemetry = %json, "Telemetry"),
        Err(e) => warn!("Failed to serialize telemetry: {}", e),
    }

    for entry in mesh.topology() {
        let parent = entry
            .parent
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        info!(
            node = %entry.name,
            address = %entry.addr,
            parent = %parent,
            layer = entry.layer,
            started = entry.started,
            powered = entry.powered,
            "Topology"
        );
    }
}
