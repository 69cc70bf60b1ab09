//! Link notifications raised by the mesh transport

use super::addr::MeshAddr;
use std::fmt;

/// Why the upstream link went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The parent stopped answering or left the tree
    ParentLost,
    /// This node's own link was stopped
    LinkStopped,
    /// Transport-specific reason code
    Other(u16),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ParentLost => write!(f, "parent lost"),
            DisconnectReason::LinkStopped => write!(f, "link stopped"),
            DisconnectReason::Other(code) => write!(f, "reason {code}"),
        }
    }
}

/// Asynchronous events delivered by the transport, in delivery order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// The link layer is up (does not imply an attached parent)
    Started,
    ParentConnected { parent: MeshAddr, layer: u8 },
    ParentDisconnected { reason: DisconnectReason },
    NoParentFound { scan_times: u32 },
    LayerChanged { layer: u8 },
    /// The tree's root announced its address
    RootAddress(MeshAddr),
    ChildConnected(MeshAddr),
    ChildDisconnected(MeshAddr),
    /// `added` is negative when entries were removed
    RoutingTableChanged { added: i32, total: u32 },
}

impl MeshEvent {
    /// Short name for structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            MeshEvent::Started => "started",
            MeshEvent::ParentConnected { .. } => "parent_connected",
            MeshEvent::ParentDisconnected { .. } => "parent_disconnected",
            MeshEvent::NoParentFound { .. } => "no_parent_found",
            MeshEvent::LayerChanged { .. } => "layer_changed",
            MeshEvent::RootAddress(_) => "root_address",
            MeshEvent::ChildConnected(_) => "child_connected",
            MeshEvent::ChildDisconnected(_) => "child_disconnected",
            MeshEvent::RoutingTableChanged { .. } => "routing_table_changed",
        }
    }
}
