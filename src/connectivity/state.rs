//! Pure connectivity state machine
//!
//! Owned by the dispatcher and mutated only there. `apply` never blocks and
//! never touches the transport; it returns a [`Directive`] telling the
//! dispatcher what, if anything, to launch.

use crate::mesh::{DisconnectReason, MeshAddr, MeshEvent};
use serde::Serialize;
use std::fmt;

/// Connectivity as seen by the rest of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected and the root address is latched
    RootKnown,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
            ConnectivityState::RootKnown => "root_known",
        };
        f.write_str(name)
    }
}

/// Read-only view published after every transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivitySnapshot {
    pub state: ConnectivityState,
    pub parent: Option<MeshAddr>,
    /// Latched; survives disconnects until superseded
    pub root: Option<MeshAddr>,
    pub layer: u8,
    /// Set when a reselection was requested, cleared on the next connect
    pub reselection_requested: bool,
}

impl ConnectivitySnapshot {
    pub fn is_connected(&self) -> bool {
        self.state >= ConnectivityState::Connected
    }

    /// Root address to send to, once attached and the root is known
    pub fn route_to_root(&self) -> Option<MeshAddr> {
        (self.state == ConnectivityState::RootKnown)
            .then_some(self.root)
            .flatten()
    }
}

impl Default for ConnectivitySnapshot {
    fn default() -> Self {
        Connectivity::default().snapshot()
    }
}

/// Events the node itself feeds into the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    /// A forced parent was handed to the transport
    ParentInstalled(MeshAddr),
    /// Unrestricted selection was switched on after exhausting the budget
    SelfOrganizedEnabled,
}

/// What the dispatcher should do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    None,
    ScheduleReselection,
}

/// Link part of the state; `RootKnown` is derived from it plus the root latch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Down,
    Attaching,
    Up,
}

/// Connectivity state machine for one node
#[derive(Debug, Clone)]
pub struct Connectivity {
    link: Link,
    parent: Option<MeshAddr>,
    root: Option<MeshAddr>,
    layer: u8,
    reselect_on_loss: bool,
    reselection_requested: bool,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Connectivity {
    /// `reselect_on_loss` is on for forced-topology roles only
    pub fn new(reselect_on_loss: bool) -> Self {
        Self {
            link: Link::Down,
            parent: None,
            root: None,
            layer: 0,
            reselect_on_loss,
            reselection_requested: false,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        match (self.link, self.root) {
            (Link::Up, Some(_)) => ConnectivityState::RootKnown,
            (Link::Up, None) => ConnectivityState::Connected,
            (Link::Attaching, _) => ConnectivityState::Connecting,
            (Link::Down, _) => ConnectivityState::Disconnected,
        }
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        ConnectivitySnapshot {
            state: self.state(),
            parent: self.parent,
            root: self.root,
            layer: self.layer,
            reselection_requested: self.reselection_requested,
        }
    }

    /// Apply one transport event
    pub fn apply(&mut self, event: &MeshEvent) -> Directive {
        match event {
            MeshEvent::Started => {
                if self.link == Link::Down {
                    self.link = Link::Attaching;
                }
                Directive::None
            }
            MeshEvent::ParentConnected { parent, layer } => {
                self.link = Link::Up;
                self.parent = Some(*parent);
                self.layer = *layer;
                self.reselection_requested = false;
                Directive::None
            }
            MeshEvent::ParentDisconnected { reason } => {
                self.lose_parent();
                // Our own stop is part of a restart already in progress
                if *reason == DisconnectReason::LinkStopped {
                    Directive::None
                } else {
                    self.request_reselection()
                }
            }
            MeshEvent::NoParentFound { .. } => {
                self.lose_parent();
                self.request_reselection()
            }
            MeshEvent::LayerChanged { layer } => {
                self.layer = *layer;
                Directive::None
            }
            MeshEvent::RootAddress(root) => {
                self.root = Some(*root);
                Directive::None
            }
            MeshEvent::ChildConnected(_)
            | MeshEvent::ChildDisconnected(_)
            | MeshEvent::RoutingTableChanged { .. } => Directive::None,
        }
    }

    /// Apply one event raised by the node's own tasks
    pub fn apply_local(&mut self, event: &LocalEvent) -> Directive {
        match event {
            LocalEvent::ParentInstalled(_) | LocalEvent::SelfOrganizedEnabled => {
                if self.link == Link::Down {
                    self.link = Link::Attaching;
                }
            }
        }
        Directive::None
    }

    fn lose_parent(&mut self) {
        self.link = Link::Down;
        self.parent = None;
        self.layer = 0;
    }

    fn request_reselection(&mut self) -> Directive {
        if self.reselect_on_loss {
            self.reselection_requested = true;
            Directive::ScheduleReselection
        } else {
            Directive::None
        }
    }
}
