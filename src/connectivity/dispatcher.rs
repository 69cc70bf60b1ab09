//! Single consumer of link events
//!
//! Transport callbacks only enqueue; this task owns the [`Connectivity`]
//! machine, publishes a snapshot after every event, and launches
//! reselection when the machine asks for it.

use super::reselect::{ReselectionKind, ReselectionReport, Reselector};
use super::state::{Connectivity, ConnectivitySnapshot, Directive, LocalEvent};
use crate::mesh::{MeshEvent, MeshTransport};
use crate::observability::metrics::metrics;
use crate::selector::ParentSelector;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queue depth for events the node raises itself
const LOCAL_QUEUE_DEPTH: usize = 16;

pub struct Dispatcher<T: MeshTransport + ?Sized> {
    machine: Connectivity,
    snapshot_tx: watch::Sender<ConnectivitySnapshot>,
    mesh_rx: mpsc::Receiver<MeshEvent>,
    local_tx: mpsc::Sender<LocalEvent>,
    local_rx: mpsc::Receiver<LocalEvent>,
    reselector: Option<Reselector<T>>,
}

impl<T: MeshTransport + ?Sized + 'static> Dispatcher<T> {
    /// Dispatcher for a self-organized role; losses are only recorded
    pub fn new(mesh_rx: mpsc::Receiver<MeshEvent>) -> Self {
        let machine = Connectivity::new(false);
        let (snapshot_tx, _) = watch::channel(machine.snapshot());
        let (local_tx, local_rx) = mpsc::channel(LOCAL_QUEUE_DEPTH);
        Self {
            machine,
            snapshot_tx,
            mesh_rx,
            local_tx,
            local_rx,
            reselector: None,
        }
    }

    /// Dispatcher for a forced-topology role that reselects on loss
    pub fn with_reselection(
        mesh_rx: mpsc::Receiver<MeshEvent>,
        transport: Arc<T>,
        selector: ParentSelector,
    ) -> Self {
        let mut dispatcher = Self::new(mesh_rx);
        dispatcher.machine = Connectivity::new(true);
        dispatcher.reselector = Some(Reselector::new(
            transport,
            selector,
            dispatcher.local_tx.clone(),
            dispatcher.snapshot_tx.subscribe(),
        ));
        dispatcher
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivitySnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn local_sender(&self) -> mpsc::Sender<LocalEvent> {
        self.local_tx.clone()
    }

    /// Shares the dispatcher's guard, so the boot selection and recovery
    /// runs never overlap
    pub fn reselector(&self) -> Option<Reselector<T>> {
        self.reselector.clone()
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        self.machine.snapshot()
    }

    /// Process events until the transport side closes its queue
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                event = self.mesh_rx.recv() => match event {
                    Some(event) => {
                        self.handle_mesh_event(&event);
                    }
                    None => break,
                },
                Some(event) = self.local_rx.recv() => {
                    self.handle_local_event(&event);
                }
            }
        }
        debug!("Mesh event queue closed, dispatcher stopping");
    }

    /// Apply one transport event; returns the reselection task if one started
    pub fn handle_mesh_event(
        &mut self,
        event: &MeshEvent,
    ) -> Option<JoinHandle<ReselectionReport>> {
        let before = self.machine.state();
        let directive = self.machine.apply(event);
        let after = self.machine.state();

        match event {
            MeshEvent::ParentConnected { parent, layer } => {
                info!(parent = %parent, layer, "Attached to parent");
            }
            MeshEvent::ParentDisconnected { reason } => {
                metrics().parent_disconnected();
                warn!(reason = %reason, "Parent link lost");
            }
            MeshEvent::NoParentFound { scan_times } => {
                warn!(scan_times, "Link layer found no parent");
            }
            MeshEvent::RootAddress(root) => {
                info!(root = %root, "Root address announced");
            }
            other => debug!(event = other.kind(), "Mesh event"),
        }
        if before != after {
            debug!(from = %before, to = %after, "Connectivity changed");
        }

        self.publish();
        self.follow(directive)
    }

    pub fn handle_local_event(&mut self, event: &LocalEvent) {
        let directive = self.machine.apply_local(event);
        debug!(event = ?event, state = %self.machine.state(), "Local event");
        self.publish();
        // Local events never ask for more work
        let _ = self.follow(directive);
    }

    fn follow(&self, directive: Directive) -> Option<JoinHandle<ReselectionReport>> {
        match directive {
            Directive::None => None,
            Directive::ScheduleReselection => self
                .reselector
                .as_ref()
                .and_then(|r| r.spawn(ReselectionKind::Recovery)),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.machine.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::state::ConnectivityState;
    use crate::mesh::{DisconnectReason, MeshAddr};
    use crate::testing::mocks::MockMeshTransport;

    const RELAY: MeshAddr = MeshAddr::new([0x88, 0x57, 0x21, 0xb3, 0x56, 0xf5]);
    const ROOT: MeshAddr = MeshAddr::new([0x24, 0x6f, 0x28, 0, 0, 0x10]);

    #[tokio::test]
    async fn test_snapshot_follows_events() {
        let (tx, rx) = mpsc::channel(8);
        let dispatcher: Dispatcher<MockMeshTransport> = Dispatcher::new(rx);
        let mut snapshots = dispatcher.subscribe();
        let handle = tokio::spawn(dispatcher.run());

        tx.send(MeshEvent::ParentConnected {
            parent: RELAY,
            layer: 2,
        })
        .await
        .unwrap();
        tx.send(MeshEvent::RootAddress(ROOT)).await.unwrap();

        let snapshot = snapshots
            .wait_for(|s| s.state == ConnectivityState::RootKnown)
            .await
            .unwrap()
            .clone();
        assert_eq!(snapshot.parent, Some(RELAY));
        assert_eq!(snapshot.route_to_root(), Some(ROOT));

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_self_organized_role_never_reselects() {
        let (_tx, rx) = mpsc::channel(8);
        let mut dispatcher: Dispatcher<MockMeshTransport> = Dispatcher::new(rx);
        let spawned = dispatcher.handle_mesh_event(&MeshEvent::ParentDisconnected {
            reason: DisconnectReason::ParentLost,
        });
        assert!(spawned.is_none());
        assert_eq!(dispatcher.snapshot().state, ConnectivityState::Disconnected);
    }
}
