//! Node boot sequence
//!
//! Applies role-specific link settings, starts the dispatcher, then the
//! role's own tasks: initial selection and reporter for a leaf, the
//! diagnostic tap for a relay, the bridge for a root. Configuration failures
//! abort boot; after that every task absorbs its own failures.

use crate::bridge::{BridgeConfig, RootBridge};
use crate::config::{BridgeSection, MeshConfig, MeshSection, NodeSection};
use crate::connectivity::{ConnectivitySnapshot, Dispatcher, ReselectionKind, ReselectionReport};
use crate::error::{NodeError, NodeResult};
use crate::mesh::{LinkAuth, LinkSettings, MeshAddr, MeshEvent, MeshTransport, NodeType};
use crate::relay::RelayTap;
use crate::selector::{ParentSelector, SelectorConfig};
use crate::sensor::{DisplaySink, Instruments, LogDisplay, ReporterConfig, SensorReporter};
use crate::transport::PublishSink;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Depth of the transport-to-dispatcher event queue
const EVENT_QUEUE_DEPTH: usize = 64;

/// Soft-AP connection limits per role
const LEAF_MAX_CONNECTIONS: u8 = 1;
const RELAY_MAX_CONNECTIONS: u8 = 6;
const ROOT_MAX_CONNECTIONS: u8 = 2;

/// Link settings for a node's role (pure function)
pub fn link_settings(
    node: &NodeSection,
    mesh: &MeshSection,
    router_password: Option<String>,
) -> LinkSettings {
    let (node_type, self_organized, max_connections) = match node.role {
        NodeType::Leaf => (NodeType::Leaf, false, LEAF_MAX_CONNECTIONS),
        NodeType::Relay => (NodeType::Relay, true, RELAY_MAX_CONNECTIONS),
        NodeType::Root => (NodeType::Root, false, ROOT_MAX_CONNECTIONS),
    };
    LinkSettings {
        mesh_id: mesh.mesh_id,
        node_type,
        self_organized,
        max_layer: mesh.max_layer,
        router_ssid: mesh.router_ssid.clone(),
        router_password,
        channel: mesh.channel,
        max_connections,
        ap_auth: LinkAuth::Open,
    }
}

/// Hardware a role may need beyond the mesh link
#[derive(Default)]
pub struct Peripherals {
    /// Required for leaves
    pub instruments: Option<Box<dyn Instruments>>,
    /// Leaves fall back to a [`LogDisplay`]
    pub display: Option<Box<dyn DisplaySink>>,
    /// Required for roots
    pub sink: Option<Arc<dyn PublishSink>>,
}

impl Peripherals {
    pub fn leaf(instruments: Box<dyn Instruments>, display: Box<dyn DisplaySink>) -> Self {
        Self {
            instruments: Some(instruments),
            display: Some(display),
            sink: None,
        }
    }

    pub fn root(sink: Arc<dyn PublishSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Default::default()
        }
    }
}

/// Owns one node's tasks from boot to teardown
pub struct NodeLifecycle<T: MeshTransport + ?Sized + 'static> {
    node: NodeSection,
    mesh: MeshSection,
    bridge: BridgeSection,
    router_password: Option<String>,
    transport: Arc<T>,
    snapshots: Option<watch::Receiver<ConnectivitySnapshot>>,
    initial_selection: Option<JoinHandle<ReselectionReport>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl<T: MeshTransport + ?Sized + 'static> NodeLifecycle<T> {
    pub fn new(config: &MeshConfig, node_id: &str, transport: Arc<T>) -> NodeResult<Self> {
        let node = config.node(node_id).cloned().ok_or_else(|| {
            NodeError::Config(crate::config::ConfigError::InvalidConfig(format!(
                "unknown node '{node_id}'"
            )))
        })?;
        let router_password = config.get_router_password()?;

        Ok(Self {
            node,
            mesh: config.mesh.clone(),
            bridge: config.bridge.clone(),
            router_password,
            transport,
            snapshots: None,
            initial_selection: None,
            tasks: Vec::new(),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    pub fn role(&self) -> NodeType {
        self.node.role
    }

    pub fn address(&self) -> MeshAddr {
        self.transport.address()
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Connectivity snapshots; `None` before `start`
    pub fn snapshots(&self) -> Option<watch::Receiver<ConnectivitySnapshot>> {
        self.snapshots.clone()
    }

    pub fn is_started(&self) -> bool {
        self.snapshots.is_some()
    }

    /// Boot the node; only configuration problems are returned
    pub async fn start(&mut self, peripherals: Peripherals) -> NodeResult<()> {
        if self.is_started() {
            return Err(NodeError::internal_error("node already started"));
        }
        let span = crate::node_span!(node_id = %self.node.id, role = %self.node.role);
        info!(parent: &span, address = %self.transport.address(), "Starting node");

        let settings = link_settings(&self.node, &self.mesh, self.router_password.clone());
        let (event_tx, event_rx) = mpsc::channel::<MeshEvent>(EVENT_QUEUE_DEPTH);
        self.transport.set_event_sender(event_tx);
        self.transport
            .configure(&settings)
            .await
            .map_err(NodeError::TransportConfig)?;

        let dispatcher = match self.node.role {
            NodeType::Leaf => {
                let selector = ParentSelector::new(SelectorConfig::from_section(
                    self.mesh.mesh_id,
                    &self.node.parent,
                ));
                Dispatcher::with_reselection(event_rx, self.transport.clone(), selector)
            }
            NodeType::Relay | NodeType::Root => Dispatcher::new(event_rx),
        };
        let snapshots = dispatcher.subscribe();
        let reselector = dispatcher.reselector();
        self.tasks.push((
            "dispatcher",
            tokio::spawn(dispatcher.run().instrument(span.clone())),
        ));

        match self.node.role {
            NodeType::Leaf => {
                let instruments = peripherals.instruments.ok_or_else(|| {
                    NodeError::internal_error("leaf node started without instruments")
                })?;
                let display = peripherals
                    .display
                    .unwrap_or_else(|| Box::new(LogDisplay::new(self.node.id.clone())));

                self.initial_selection =
                    reselector.and_then(|r| r.spawn(ReselectionKind::Initial));

                let reporter = SensorReporter::new(
                    ReporterConfig::from_section(&self.node.id, self.node.role, &self.node.sensor),
                    self.transport.clone(),
                    snapshots.clone(),
                    instruments,
                    display,
                );
                self.tasks
                    .push(("reporter", tokio::spawn(reporter.run().instrument(span.clone()))));
            }
            NodeType::Relay => {
                warn!(parent: &span, "Mesh soft-AP runs with open authentication");
                self.transport
                    .start()
                    .await
                    .map_err(NodeError::TransportConfig)?;
                let tap = RelayTap::new(self.transport.clone());
                self.tasks
                    .push(("relay_tap", tokio::spawn(tap.run().instrument(span.clone()))));
            }
            NodeType::Root => {
                let sink = peripherals.sink.ok_or_else(|| {
                    NodeError::internal_error("root node started without a publish sink")
                })?;
                warn!(parent: &span, "Mesh soft-AP runs with open authentication");
                self.transport
                    .start()
                    .await
                    .map_err(NodeError::TransportConfig)?;
                let bridge = RootBridge::new(
                    self.transport.clone(),
                    sink,
                    BridgeConfig::from(&self.bridge),
                );
                self.tasks
                    .push(("bridge", tokio::spawn(bridge.run().instrument(span.clone()))));
            }
        }

        self.snapshots = Some(snapshots);
        info!(parent: &span, tasks = self.tasks.len(), "Node started");
        Ok(())
    }

    /// Process teardown: abort every task and stop the link
    pub async fn shutdown(&mut self) {
        info!(node_id = %self.node.id, "Shutting down node");

        if let Some(handle) = self.initial_selection.take() {
            handle.abort();
        }
        for (name, handle) in self.tasks.drain(..) {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(task = name, error = %e, "Task ended abnormally");
                }
            }
        }

        if let Err(e) = self.transport.stop().await {
            warn!(node_id = %self.node.id, error = %e, "Failed to stop link");
        }
        self.snapshots = None;
    }
}
