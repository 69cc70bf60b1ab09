//! Mesh transport abstraction
//!
//! The transport owns radio access, multi-hop forwarding and the link state
//! machine of the underlying mesh stack. This crate only drives it through
//! the [`MeshTransport`] trait so the coordination logic can run against real
//! firmware bindings, the in-process simulator, or test mocks.

use super::addr::{Candidate, MeshAddr, RelayedMessage};
use super::events::MeshEvent;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors reported by a mesh transport
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Invalid link configuration: {0}")]
    InvalidConfig(String),
    #[error("Scan failed: {0}")]
    ScanFailed(String),
    #[error("Link not started")]
    NotStarted,
    #[error("Not attached to a parent")]
    NotConnected,
    #[error("No route to {0}")]
    NoRoute(MeshAddr),
    #[error("Payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("Receive queue of {0} is full")]
    QueueFull(MeshAddr),
    #[error("Transport closed")]
    Closed,
}

/// Role of this device in the tree as seen by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Leaf,
    Relay,
    Root,
}

impl NodeType {
    /// Role tag carried in sensor records and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Leaf => "leaf",
            NodeType::Relay => "relay",
            NodeType::Root => "root",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link-layer authentication for the enforced upstream and the soft-AP
///
/// Deployments run open; there is no credentialed variant yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAuth {
    Open,
}

/// Link configuration applied once at boot
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    pub mesh_id: MeshAddr,
    pub node_type: NodeType,
    pub self_organized: bool,
    pub max_layer: u8,
    pub router_ssid: String,
    pub router_password: Option<String>,
    /// 0 = follow the router's channel
    pub channel: u8,
    pub max_connections: u8,
    pub ap_auth: LinkAuth,
}

/// Parent assignment handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct ParentAssignment {
    pub candidate: Candidate,
    pub mesh_id: MeshAddr,
    pub node_type: NodeType,
    pub auth: LinkAuth,
    pub layer_hint: u8,
}

/// Operations this crate needs from the mesh stack
#[async_trait::async_trait]
pub trait MeshTransport: Send + Sync {
    /// This device's own address
    fn address(&self) -> MeshAddr;

    /// Apply link settings; errors here are fatal at boot
    async fn configure(&self, settings: &LinkSettings) -> Result<(), TransportError>;

    /// Blocking scan for visible upstream access points, in transport order
    async fn scan(&self) -> Result<Vec<Candidate>, TransportError>;

    /// Enforce a specific upstream
    async fn set_parent(&self, assignment: &ParentAssignment) -> Result<(), TransportError>;

    /// Toggle unrestricted automatic upstream selection
    async fn set_self_organized(&self, enabled: bool) -> Result<(), TransportError>;

    async fn start(&self) -> Result<(), TransportError>;

    async fn stop(&self) -> Result<(), TransportError>;

    fn is_started(&self) -> bool;

    /// Unicast toward `dest`; the transport forwards across hops
    async fn send(&self, dest: MeshAddr, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for a unicast addressed to this node
    async fn recv(&self, timeout: Duration) -> Result<Option<RelayedMessage>, TransportError>;

    /// Route link notifications into the node's dispatcher
    fn set_event_sender(&self, sender: mpsc::Sender<MeshEvent>);
}
