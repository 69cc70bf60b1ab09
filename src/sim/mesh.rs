//! In-process mesh simulation
//!
//! A [`SimMesh`] is the shared "air": it knows which node hears which, who is
//! attached to whom, and delivers unicasts within a tree. Each registered
//! node gets a [`SimTransport`] implementing [`MeshTransport`].
//!
//! Attach rules:
//! - a root attaches to the upstream router as soon as it starts (layer 1)
//! - a forced node attaches only to the parent installed when its link last
//!   started, if that parent is audible, attached and has room; while it
//!   stays detached its link layer retries once per scan round and reports
//!   `NoParentFound` each time
//! - a self-organized node attaches to the strongest audible attached node
//!   and re-homes on its own after losing its parent
//! - leaves never accept children

use crate::config::MeshConfig;
use crate::mesh::{
    Candidate, DisconnectReason, LinkSettings, MeshAddr, MeshEvent, MeshTransport, NodeType,
    ParentAssignment, RelayedMessage, TransportError, MAX_PAYLOAD_LEN,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Address reported as the root's parent (the upstream router)
pub const ROUTER_ADDR: MeshAddr = MeshAddr::new([0x02, 0x52, 0x54, 0x00, 0x00, 0x01]);

const INBOX_DEPTH: usize = 32;
/// Link-layer scan round of a detached forced node
pub const SCAN_ROUND: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct SimNode {
    addr: MeshAddr,
    name: String,
    channel: u8,
    settings: Option<LinkSettings>,
    /// Last installed parent
    forced_parent: Option<MeshAddr>,
    /// Parent in force since the link last started
    active_parent: Option<MeshAddr>,
    /// Overrides `max_connections` from the link settings
    capacity: Option<usize>,
    self_organized: bool,
    powered: bool,
    started: bool,
    parent: Option<MeshAddr>,
    /// 0 while detached
    layer: u8,
    /// A scan-round task is running for this node
    scanning: bool,
    events: Option<mpsc::Sender<MeshEvent>>,
    inbox: mpsc::Sender<RelayedMessage>,
}

impl SimNode {
    fn node_type(&self) -> NodeType {
        self.settings
            .as_ref()
            .map(|s| s.node_type)
            .unwrap_or(NodeType::Relay)
    }

    fn max_connections(&self) -> usize {
        self.capacity.unwrap_or_else(|| {
            self.settings
                .as_ref()
                .map(|s| usize::from(s.max_connections))
                .unwrap_or(0)
        })
    }

    fn attached(&self) -> bool {
        self.layer > 0
    }

    /// Started forced non-root node without a parent
    fn needs_scan_rounds(&self) -> bool {
        self.powered
            && self.started
            && !self.attached()
            && !self.self_organized
            && self.node_type() != NodeType::Root
    }

    fn emit(&self, event: MeshEvent) {
        let Some(events) = &self.events else {
            return;
        };
        let kind = event.kind();
        if events.try_send(event).is_err() {
            warn!(node = %self.name, event = kind, "Event queue full or closed, event dropped");
        }
    }
}

/// Where a node currently sits in the simulated mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyEntry {
    pub addr: MeshAddr,
    pub name: String,
    pub parent: Option<MeshAddr>,
    pub layer: u8,
    pub started: bool,
    pub powered: bool,
}

#[derive(Debug)]
struct MeshState {
    nodes: Vec<SimNode>,
    /// (observer, target) -> rssi the observer sees
    links: HashMap<(MeshAddr, MeshAddr), i8>,
    max_layer: u8,
}

impl MeshState {
    fn index(&self, addr: MeshAddr) -> Option<usize> {
        self.nodes.iter().position(|n| n.addr == addr)
    }

    fn node(&self, addr: MeshAddr) -> Option<&SimNode> {
        self.nodes.iter().find(|n| n.addr == addr)
    }

    fn root_of(&self, addr: MeshAddr) -> Option<MeshAddr> {
        let mut current = addr;
        for _ in 0..=self.max_layer {
            let node = self.node(current)?;
            if !node.attached() {
                return None;
            }
            match node.parent {
                None => return Some(current),
                Some(parent) => current = parent,
            }
        }
        None
    }

    fn children(&self, addr: MeshAddr) -> Vec<MeshAddr> {
        self.nodes
            .iter()
            .filter(|n| n.attached() && n.parent == Some(addr))
            .map(|n| n.addr)
            .collect()
    }

    fn tree_size(&self, root: MeshAddr) -> u32 {
        let size = self
            .nodes
            .iter()
            .filter(|n| n.addr != root && self.root_of(n.addr) == Some(root))
            .count();
        u32::try_from(size).unwrap_or(u32::MAX)
    }

    /// Signal strength at which `observer` hears `target` as a possible parent
    fn visible(&self, observer: MeshAddr, target: &SimNode) -> Option<i8> {
        if target.addr == observer
            || !target.powered
            || !target.started
            || !target.attached()
            || target.node_type() == NodeType::Leaf
        {
            return None;
        }
        self.links.get(&(observer, target.addr)).copied()
    }

    fn can_host(&self, observer: MeshAddr, target: &SimNode) -> Option<i8> {
        let rssi = self.visible(observer, target)?;
        let has_room = self.children(target.addr).len() < target.max_connections();
        (target.layer < self.max_layer && has_room).then_some(rssi)
    }

    fn scan(&self, observer: MeshAddr) -> Vec<Candidate> {
        self.nodes
            .iter()
            .filter_map(|target| {
                self.visible(observer, target)
                    .map(|rssi| Candidate::new(target.addr, target.name.clone(), target.channel, rssi))
            })
            .collect()
    }

    fn pick_parent(&self, idx: usize) -> Option<MeshAddr> {
        let node = &self.nodes[idx];
        if node.self_organized {
            let mut best: Option<(MeshAddr, i8)> = None;
            for target in &self.nodes {
                if let Some(rssi) = self.can_host(node.addr, target) {
                    if best.map_or(true, |(_, current)| rssi > current) {
                        best = Some((target.addr, rssi));
                    }
                }
            }
            best.map(|(addr, _)| addr)
        } else {
            let forced = node.active_parent?;
            let target = self.node(forced)?;
            self.can_host(node.addr, target).map(|_| forced)
        }
    }

    /// Attach a started, detached node if its rules allow; true on success
    fn try_attach(&mut self, idx: usize) -> bool {
        let node = &self.nodes[idx];
        if !node.powered || !node.started || node.attached() {
            return false;
        }

        if node.node_type() == NodeType::Root {
            let node = &mut self.nodes[idx];
            node.parent = None;
            node.layer = 1;
            node.emit(MeshEvent::ParentConnected {
                parent: ROUTER_ADDR,
                layer: 1,
            });
            node.emit(MeshEvent::RootAddress(node.addr));
            return true;
        }

        let Some(parent) = self.pick_parent(idx) else {
            return false;
        };
        self.attach(idx, parent);
        true
    }

    fn attach(&mut self, idx: usize, parent: MeshAddr) {
        let Some(parent_layer) = self.node(parent).map(|p| p.layer) else {
            return;
        };
        let child = {
            let node = &mut self.nodes[idx];
            node.parent = Some(parent);
            node.layer = parent_layer.saturating_add(1);
            node.addr
        };
        let root = self.root_of(child);

        let node = &self.nodes[idx];
        debug!(node = %node.name, parent = %parent, layer = node.layer, "Sim attach");
        node.emit(MeshEvent::ParentConnected {
            parent,
            layer: node.layer,
        });
        if let Some(root) = root {
            node.emit(MeshEvent::RootAddress(root));
        }
        if let Some(parent_node) = self.node(parent) {
            parent_node.emit(MeshEvent::ChildConnected(child));
        }
        if let Some(root_node) = root.and_then(|r| self.node(r)) {
            root_node.emit(MeshEvent::RoutingTableChanged {
                added: 1,
                total: self.tree_size(root_node.addr),
            });
        }
    }

    /// Detach `addr` and everything below it
    ///
    /// `own_reason` is reported to the node itself; `None` keeps it silent
    /// (powered off).
    fn detach(&mut self, addr: MeshAddr, own_reason: Option<DisconnectReason>) {
        let Some(idx) = self.index(addr) else {
            return;
        };
        if !self.nodes[idx].attached() {
            return;
        }
        let old_root = self.root_of(addr);
        let old_parent = self.nodes[idx].parent;

        let mut subtree = vec![addr];
        let mut cursor = 0;
        while cursor < subtree.len() {
            let below = self.children(subtree[cursor]);
            subtree.extend(below);
            cursor += 1;
        }

        for (position, member) in subtree.iter().enumerate() {
            let Some(i) = self.index(*member) else {
                continue;
            };
            let node = &mut self.nodes[i];
            node.parent = None;
            node.layer = 0;
            let reason = if position == 0 {
                own_reason
            } else {
                Some(DisconnectReason::ParentLost)
            };
            if let Some(reason) = reason {
                node.emit(MeshEvent::ParentDisconnected { reason });
            }
        }

        if let Some(parent) = old_parent.and_then(|p| self.node(p)) {
            parent.emit(MeshEvent::ChildDisconnected(addr));
        }
        if let Some(root) = old_root.filter(|r| *r != addr).and_then(|r| self.node(r)) {
            let removed = i32::try_from(subtree.len()).unwrap_or(i32::MAX);
            root.emit(MeshEvent::RoutingTableChanged {
                added: -removed,
                total: self.tree_size(root.addr),
            });
        }
    }

    /// Re-home detached self-organized nodes until nothing changes
    fn settle(&mut self) {
        loop {
            let mut changed = false;
            for idx in 0..self.nodes.len() {
                let node = &self.nodes[idx];
                if node.self_organized && node.node_type() != NodeType::Root && self.try_attach(idx) {
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }
}

/// Shared simulated radio medium
#[derive(Debug, Clone)]
pub struct SimMesh {
    state: Arc<Mutex<MeshState>>,
}

impl SimMesh {
    pub fn new(max_layer: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(MeshState {
                nodes: Vec::new(),
                links: HashMap::new(),
                max_layer: max_layer.max(1),
            })),
        }
    }

    /// Build the mesh described by a config file: one transport per node
    pub fn from_config(config: &MeshConfig) -> (Self, BTreeMap<String, Arc<SimTransport>>) {
        let mesh = Self::new(config.mesh.max_layer);
        let mut transports = BTreeMap::new();
        for node in &config.nodes {
            let transport = mesh.register(node.address, &node.id, node.channel);
            transports.insert(node.id.clone(), Arc::new(transport));
        }

        let addresses: HashMap<&str, MeshAddr> = config
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.address))
            .collect();
        for link in &config.links {
            if let (Some(observer), Some(target)) = (
                addresses.get(link.observer.as_str()),
                addresses.get(link.target.as_str()),
            ) {
                mesh.set_link(*observer, *target, link.rssi);
            }
        }
        (mesh, transports)
    }

    fn lock(&self) -> MutexGuard<'_, MeshState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a powered-on, unconfigured node
    pub fn register(&self, addr: MeshAddr, name: &str, channel: u8) -> SimTransport {
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_DEPTH);
        self.lock().nodes.push(SimNode {
            addr,
            name: name.to_string(),
            channel,
            settings: None,
            forced_parent: None,
            active_parent: None,
            capacity: None,
            self_organized: false,
            powered: true,
            started: false,
            parent: None,
            layer: 0,
            scanning: false,
            events: None,
            inbox: inbox_tx,
        });
        SimTransport {
            addr,
            mesh: self.clone(),
            inbox: tokio::sync::Mutex::new(inbox_rx),
        }
    }

    /// `observer` hears `target` at `rssi` dBm
    pub fn set_link(&self, observer: MeshAddr, target: MeshAddr, rssi: i8) {
        self.lock().links.insert((observer, target), rssi);
    }

    pub fn remove_link(&self, observer: MeshAddr, target: MeshAddr) {
        self.lock().links.remove(&(observer, target));
    }

    /// Cut power: the node drops out silently and its subtree loses its parent
    pub fn power_off(&self, addr: MeshAddr) {
        let mut state = self.lock();
        state.detach(addr, None);
        if let Some(idx) = state.index(addr) {
            state.nodes[idx].powered = false;
            state.nodes[idx].started = false;
        }
        state.settle();
        drop(state);
        self.start_scan_rounds();
    }

    /// Restore power; the node stays stopped until started again
    pub fn power_on(&self, addr: MeshAddr) {
        let mut state = self.lock();
        if let Some(idx) = state.index(addr) {
            state.nodes[idx].powered = true;
        }
    }

    /// Limit how many children `addr` accepts; `None` restores its link settings
    pub fn set_capacity(&self, addr: MeshAddr, capacity: Option<usize>) {
        let mut state = self.lock();
        if let Some(idx) = state.index(addr) {
            state.nodes[idx].capacity = capacity;
        }
        state.settle();
    }

    /// One scan-round task per started forced node left without a parent
    fn start_scan_rounds(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let mut state = self.lock();
        for node in state.nodes.iter_mut() {
            if node.needs_scan_rounds() && !node.scanning {
                node.scanning = true;
                runtime.spawn(self.clone().scan_rounds(node.addr));
            }
        }
    }

    /// Retry the active parent each round until attached, stopped or re-homed
    async fn scan_rounds(self, addr: MeshAddr) {
        let mut rounds = 1u32;
        loop {
            tokio::time::sleep(SCAN_ROUND).await;
            let mut state = self.lock();
            let Some(idx) = state.index(addr) else {
                return;
            };
            if !state.nodes[idx].needs_scan_rounds() || state.try_attach(idx) {
                state.nodes[idx].scanning = false;
                state.settle();
                return;
            }
            rounds = rounds.saturating_add(1);
            state.nodes[idx].emit(MeshEvent::NoParentFound { scan_times: rounds });
        }
    }

    pub fn topology(&self) -> Vec<TopologyEntry> {
        self.lock()
            .nodes
            .iter()
            .map(|n| TopologyEntry {
                addr: n.addr,
                name: n.name.clone(),
                parent: n.parent,
                layer: n.layer,
                started: n.started,
                powered: n.powered,
            })
            .collect()
    }

    pub fn parent_of(&self, addr: MeshAddr) -> Option<MeshAddr> {
        self.lock().node(addr).and_then(|n| n.parent)
    }

    /// Run `op` on the node's state; unknown addresses are a closed transport
    fn with_node<R>(
        &self,
        addr: MeshAddr,
        op: impl FnOnce(&mut MeshState, usize) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let mut state = self.lock();
        let idx = state.index(addr).ok_or(TransportError::Closed)?;
        op(&mut state, idx)
    }
}

fn validate_settings(settings: &LinkSettings) -> Result<(), TransportError> {
    if settings.mesh_id.is_unset() {
        return Err(TransportError::InvalidConfig("mesh id is unset".to_string()));
    }
    if !(1..=25).contains(&settings.max_layer) {
        return Err(TransportError::InvalidConfig(format!(
            "max layer {} outside 1..=25",
            settings.max_layer
        )));
    }
    if settings.node_type == NodeType::Root && settings.router_ssid.is_empty() {
        return Err(TransportError::InvalidConfig(
            "root needs an upstream router ssid".to_string(),
        ));
    }
    Ok(())
}

/// One node's view of a [`SimMesh`]
#[derive(Debug)]
pub struct SimTransport {
    addr: MeshAddr,
    mesh: SimMesh,
    inbox: tokio::sync::Mutex<mpsc::Receiver<RelayedMessage>>,
}

impl SimTransport {
    pub fn mesh(&self) -> &SimMesh {
        &self.mesh
    }
}

#[async_trait]
impl MeshTransport for SimTransport {
    fn address(&self) -> MeshAddr {
        self.addr
    }

    async fn configure(&self, settings: &LinkSettings) -> Result<(), TransportError> {
        validate_settings(settings)?;
        self.mesh.with_node(self.addr, |state, idx| {
            let node = &mut state.nodes[idx];
            if node.started {
                return Err(TransportError::InvalidConfig(
                    "link already started".to_string(),
                ));
            }
            node.self_organized = settings.self_organized;
            node.settings = Some(settings.clone());
            Ok(())
        })
    }

    async fn scan(&self) -> Result<Vec<Candidate>, TransportError> {
        self.mesh.with_node(self.addr, |state, idx| {
            if !state.nodes[idx].powered {
                return Err(TransportError::ScanFailed("radio off".to_string()));
            }
            Ok(state.scan(self.addr))
        })
    }

    async fn set_parent(&self, assignment: &ParentAssignment) -> Result<(), TransportError> {
        self.mesh.with_node(self.addr, |state, idx| {
            let node = &mut state.nodes[idx];
            if node.settings.is_none() {
                return Err(TransportError::InvalidConfig(
                    "link not configured".to_string(),
                ));
            }
            // Applied on the next start
            node.forced_parent = Some(assignment.candidate.addr);
            node.self_organized = false;
            Ok(())
        })
    }

    async fn set_self_organized(&self, enabled: bool) -> Result<(), TransportError> {
        self.mesh.with_node(self.addr, |state, idx| {
            state.nodes[idx].self_organized = enabled;
            if enabled {
                state.settle();
            }
            Ok(())
        })
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.mesh.with_node(self.addr, |state, idx| {
            let node = &mut state.nodes[idx];
            if !node.powered {
                return Err(TransportError::Closed);
            }
            if node.settings.is_none() {
                return Err(TransportError::InvalidConfig(
                    "link not configured".to_string(),
                ));
            }
            if node.started {
                return Ok(());
            }
            node.started = true;
            node.active_parent = node.forced_parent;
            node.emit(MeshEvent::Started);

            if !state.try_attach(idx) {
                state.nodes[idx].emit(MeshEvent::NoParentFound { scan_times: 1 });
            }
            state.settle();
            Ok(())
        })?;
        self.mesh.start_scan_rounds();
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.mesh.with_node(self.addr, |state, idx| {
            if !state.nodes[idx].started {
                return Ok(());
            }
            state.detach(self.addr, Some(DisconnectReason::LinkStopped));
            state.nodes[idx].started = false;
            state.settle();
            Ok(())
        })?;
        self.mesh.start_scan_rounds();
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.mesh
            .with_node(self.addr, |state, idx| Ok(state.nodes[idx].started))
            .unwrap_or(false)
    }

    async fn send(&self, dest: MeshAddr, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        self.mesh.with_node(self.addr, |state, idx| {
            let sender = &state.nodes[idx];
            if !sender.started {
                return Err(TransportError::NotStarted);
            }
            if !sender.attached() {
                return Err(TransportError::NotConnected);
            }

            let same_tree = state.root_of(self.addr).is_some()
                && state.root_of(self.addr) == state.root_of(dest);
            let target = state
                .node(dest)
                .filter(|n| n.powered && same_tree)
                .ok_or(TransportError::NoRoute(dest))?;

            let message = RelayedMessage::new(self.addr, Bytes::copy_from_slice(payload));
            target
                .inbox
                .try_send(message)
                .map_err(|_| TransportError::QueueFull(dest))
        })
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<RelayedMessage>, TransportError> {
        let mut inbox = self.inbox.lock().await;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Ok(None),
        }
    }

    fn set_event_sender(&self, sender: mpsc::Sender<MeshEvent>) {
        let _ = self.mesh.with_node(self.addr, |state, idx| {
            state.nodes[idx].events = Some(sender);
            Ok(())
        });
    }
}
