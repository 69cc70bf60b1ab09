//! Periodic sensor reporting for leaf nodes
//!
//! Waits once for a route to the root, then every interval: sample, draw the
//! display, encode, and unicast to the latched root. Nothing is queued; a
//! cycle that cannot send is dropped.

use super::display::{self, DisplaySink};
use super::instruments::{Instruments, Sampler};
use super::record::SensorRecord;
use crate::config::SensorSection;
use crate::connectivity::ConnectivitySnapshot;
use crate::error::NodeError;
use crate::mesh::{MeshAddr, MeshTransport, NodeType, TransportError};
use crate::observability::metrics::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ReporterConfig {
    pub node_id: String,
    pub role: NodeType,
    pub interval: Duration,
    pub gate_poll: Duration,
}

impl ReporterConfig {
    pub fn from_section(node_id: &str, role: NodeType, section: &SensorSection) -> Self {
        Self {
            node_id: node_id.to_string(),
            role,
            interval: Duration::from_secs(section.interval_secs.max(1)),
            gate_poll: Duration::from_millis(section.gate_poll_ms.max(1)),
        }
    }
}

/// What one report cycle did with its payload
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Sent {
        root: MeshAddr,
        len: usize,
        fallback: bool,
    },
    /// No route at send time; nothing handed to the transport
    Dropped,
    SendFailed(TransportError),
}

pub struct SensorReporter<T: MeshTransport + ?Sized> {
    config: ReporterConfig,
    transport: Arc<T>,
    snapshots: watch::Receiver<ConnectivitySnapshot>,
    instruments: Box<dyn Instruments>,
    display: Box<dyn DisplaySink>,
    sampler: Sampler,
}

impl<T: MeshTransport + ?Sized> SensorReporter<T> {
    pub fn new(
        config: ReporterConfig,
        transport: Arc<T>,
        snapshots: watch::Receiver<ConnectivitySnapshot>,
        instruments: Box<dyn Instruments>,
        display: Box<dyn DisplaySink>,
    ) -> Self {
        Self {
            config,
            transport,
            snapshots,
            instruments,
            display,
            sampler: Sampler::new(),
        }
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    /// Poll until the node is attached and knows its root
    pub async fn wait_for_route(&self) -> MeshAddr {
        loop {
            if let Some(root) = self.snapshots.borrow().route_to_root() {
                return root;
            }
            tokio::time::sleep(self.config.gate_poll).await;
        }
    }

    /// Sample, display, encode and send once
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let (sample, faults) = self.sampler.sample(self.instruments.as_mut());
        for fault in faults {
            metrics().sensor_fault();
            let error = NodeError::sensor_fault(fault.to_string());
            warn!(error = %error, "Using last known value");
        }

        display::render(self.display.as_mut(), &self.config.node_id, &sample);

        let record = SensorRecord::from_sample(&self.config.node_id, self.config.role, &sample);
        let encoded = record.encode_bounded();
        if let Some(error) = &encoded.fallback {
            metrics().payload_fallback();
            warn!(error = %error, "Sending error marker instead of record");
        }

        // Snapshot taken after sampling, right before the send
        let route = self.snapshots.borrow().route_to_root();
        let Some(root) = route else {
            metrics().send_dropped();
            debug!("No route to root, report dropped");
            return CycleOutcome::Dropped;
        };

        match self.transport.send(root, &encoded.bytes).await {
            Ok(()) => {
                metrics().report_sent();
                debug!(root = %root, len = encoded.bytes.len(), "Report sent");
                CycleOutcome::Sent {
                    root,
                    len: encoded.bytes.len(),
                    fallback: encoded.fallback.is_some(),
                }
            }
            Err(e) => {
                metrics().send_failed();
                let error = NodeError::SendFailure(e.clone());
                warn!(error = %error, root = %root, "Report dropped");
                CycleOutcome::SendFailed(e)
            }
        }
    }

    /// Gate once, then report every interval forever
    pub async fn run(mut self) {
        let root = self.wait_for_route().await;
        info!(
            root = %root,
            interval_secs = self.config.interval.as_secs(),
            "Route to root available, reporting started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }
}
