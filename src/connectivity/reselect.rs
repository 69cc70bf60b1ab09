//! Parent (re)selection task
//!
//! One body serves both the boot-time selection and recovery after a lost
//! parent. Whoever launches it must hold the node's [`ReselectPermit`]; the
//! slot frees up when the task returns, whatever the outcome.

use super::guard::{ReselectGuard, ReselectPermit};
use super::state::{ConnectivitySnapshot, LocalEvent};
use crate::error::NodeError;
use crate::mesh::{MeshAddr, MeshTransport, TransportError};
use crate::observability::metrics::metrics;
use crate::selector::{ParentSelector, SelectionOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Pause between stopping and restarting the link
pub const LINK_RESTART_DELAY: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReselectionKind {
    /// First selection at boot
    Initial,
    /// Triggered by a lost parent or a failed attach
    Recovery,
}

impl ReselectionKind {
    fn as_str(&self) -> &'static str {
        match self {
            ReselectionKind::Initial => "initial",
            ReselectionKind::Recovery => "recovery",
        }
    }
}

/// How a reselection run ended
#[derive(Debug, Clone, PartialEq)]
pub enum ReselectionReport {
    Attached {
        parent: MeshAddr,
        attempts: u32,
        restarted: bool,
    },
    FellBack {
        attempts: u32,
    },
    GaveUp {
        attempts: u32,
    },
    Failed(TransportError),
}

impl ReselectionReport {
    /// The steady-state error a run that gave up is logged as
    pub fn error(&self) -> Option<NodeError> {
        match self {
            ReselectionReport::GaveUp { attempts } => Some(NodeError::TransientScanEmpty {
                attempts: *attempts,
            }),
            _ => None,
        }
    }
}

/// Launches guarded reselection tasks for one node
pub struct Reselector<T: MeshTransport + ?Sized> {
    transport: Arc<T>,
    selector: ParentSelector,
    guard: ReselectGuard,
    local_tx: mpsc::Sender<LocalEvent>,
    snapshot_rx: watch::Receiver<ConnectivitySnapshot>,
}

impl<T: MeshTransport + ?Sized> Clone for Reselector<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            selector: self.selector.clone(),
            guard: self.guard.clone(),
            local_tx: self.local_tx.clone(),
            snapshot_rx: self.snapshot_rx.clone(),
        }
    }
}

impl<T: MeshTransport + ?Sized + 'static> Reselector<T> {
    pub fn new(
        transport: Arc<T>,
        selector: ParentSelector,
        local_tx: mpsc::Sender<LocalEvent>,
        snapshot_rx: watch::Receiver<ConnectivitySnapshot>,
    ) -> Self {
        Self {
            transport,
            selector,
            guard: ReselectGuard::new(),
            local_tx,
            snapshot_rx,
        }
    }

    pub fn guard(&self) -> &ReselectGuard {
        &self.guard
    }

    /// Spawn a reselection unless one is already running
    pub fn spawn(&self, kind: ReselectionKind) -> Option<JoinHandle<ReselectionReport>> {
        let Some(permit) = self.guard.try_acquire() else {
            metrics().reselection_suppressed();
            debug!(kind = kind.as_str(), "Reselection already running, not starting another");
            return None;
        };

        let this = self.clone();
        let span = crate::mesh_span!(op = "reselect", kind = kind.as_str());
        Some(tokio::spawn(
            async move { this.run(kind, permit).await }.instrument(span),
        ))
    }

    /// Task body; runs to success or budget exhaustion, never cancelled
    pub async fn run(&self, kind: ReselectionKind, permit: ReselectPermit) -> ReselectionReport {
        let _permit = permit;
        metrics().reselection_started();
        info!(kind = kind.as_str(), "Parent reselection started");

        let report = match self.selector.acquire(self.transport.as_ref()).await {
            SelectionOutcome::Selected {
                candidate,
                attempts,
            } => match self.attach(candidate.addr, &candidate).await {
                Ok(restarted) => ReselectionReport::Attached {
                    parent: candidate.addr,
                    attempts,
                    restarted,
                },
                Err(e) => ReselectionReport::Failed(e),
            },
            SelectionOutcome::Exhausted { attempts } => {
                metrics().reselection_exhausted();
                self.exhausted(attempts).await
            }
        };

        match &report {
            ReselectionReport::Failed(e) => warn!(error = %e, "Parent reselection failed"),
            other => info!(outcome = ?other, "Parent reselection finished"),
        }
        report
    }

    /// Install and make the link pick it up; true if the link was restarted
    async fn attach(
        &self,
        parent: MeshAddr,
        candidate: &crate::mesh::Candidate,
    ) -> Result<bool, TransportError> {
        self.selector
            .install(self.transport.as_ref(), candidate)
            .await?;
        self.notify(LocalEvent::ParentInstalled(parent)).await;

        if !self.transport.is_started() {
            self.transport.start().await?;
            return Ok(false);
        }

        let connected = self.snapshot_rx.borrow().is_connected();
        if connected {
            return Ok(false);
        }

        warn!(parent = %parent, "Restarting link to apply new parent");
        restart_link(self.transport.as_ref()).await?;
        Ok(true)
    }

    async fn exhausted(&self, attempts: u32) -> ReselectionReport {
        if !self.selector.config().auto_fallback {
            let report = ReselectionReport::GaveUp { attempts };
            if let Some(error) = report.error() {
                warn!(error = %error, "Staying unattached until the next disconnect");
            }
            return report;
        }

        match self.selector.enable_fallback(self.transport.as_ref()).await {
            Ok(()) => {
                self.notify(LocalEvent::SelfOrganizedEnabled).await;
                ReselectionReport::FellBack { attempts }
            }
            Err(e) => ReselectionReport::Failed(e),
        }
    }

    async fn notify(&self, event: LocalEvent) {
        if self.local_tx.send(event).await.is_err() {
            debug!("Dispatcher gone, local event dropped");
        }
    }
}

/// Stop, wait, start
pub async fn restart_link<T: MeshTransport + ?Sized>(transport: &T) -> Result<(), TransportError> {
    transport.stop().await?;
    tokio::time::sleep(LINK_RESTART_DELAY).await;
    transport.start().await?;
    metrics().link_restarted();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_giving_up_maps_to_empty_scan_error() {
        let error = ReselectionReport::GaveUp { attempts: 20 }.error();
        assert!(matches!(error, Some(NodeError::TransientScanEmpty { attempts: 20 })));
        assert!(!error.unwrap().is_fatal());

        assert!(ReselectionReport::FellBack { attempts: 20 }.error().is_none());
        assert!(ReselectionReport::Failed(TransportError::NotStarted)
            .error()
            .is_none());
        assert!(ReselectionReport::Attached {
            parent: MeshAddr::UNSET,
            attempts: 1,
            restarted: false
        }
        .error()
        .is_none());
    }
}
