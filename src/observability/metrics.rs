//! Process-wide telemetry counters
//!
//! Atomic counters for parent selection, sensor reporting and the root bridge.
//! Every steady-state failure the node absorbs is counted here so the periodic
//! telemetry line shows what the logs only mention once.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics
pub struct MetricsCollector {
    // Parent selection and link
    scans: AtomicU64,
    empty_scans: AtomicU64,
    parents_installed: AtomicU64,
    reselections_started: AtomicU64,
    reselections_suppressed: AtomicU64,
    reselections_exhausted: AtomicU64,
    fallbacks: AtomicU64,
    link_restarts: AtomicU64,
    parent_disconnects: AtomicU64,

    // Sensor reporting
    sensor_faults: AtomicU64,
    reports_sent: AtomicU64,
    send_failures: AtomicU64,
    sends_dropped: AtomicU64,
    payload_fallbacks: AtomicU64,

    // Root bridge and sink
    messages_received: AtomicU64,
    messages_published: AtomicU64,
    publishes_skipped: AtomicU64,
    publish_failures: AtomicU64,
    sink_connected: AtomicBool,
    sink_connections: AtomicU64,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            scans: AtomicU64::new(0),
            empty_scans: AtomicU64::new(0),
            parents_installed: AtomicU64::new(0),
            reselections_started: AtomicU64::new(0),
            reselections_suppressed: AtomicU64::new(0),
            reselections_exhausted: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            link_restarts: AtomicU64::new(0),
            parent_disconnects: AtomicU64::new(0),
            sensor_faults: AtomicU64::new(0),
            reports_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            sends_dropped: AtomicU64::new(0),
            payload_fallbacks: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publishes_skipped: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            sink_connected: AtomicBool::new(false),
            sink_connections: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Parent selection
    pub fn scan_completed(&self, eligible: bool) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        if !eligible {
            self.empty_scans.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn parent_installed(&self) {
        self.parents_installed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reselection_started(&self) {
        self.reselections_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reselection_suppressed(&self) {
        self.reselections_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reselection_exhausted(&self) {
        self.reselections_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_enabled(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_restarted(&self) {
        self.link_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parent_disconnected(&self) {
        self.parent_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    // Sensor reporting
    pub fn sensor_fault(&self) {
        self.sensor_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_sent(&self) {
        self.reports_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_dropped(&self) {
        self.sends_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn payload_fallback(&self) {
        self.payload_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    // Root bridge
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_skipped(&self) {
        self.publishes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sink_connection_established(&self) {
        self.sink_connections.fetch_add(1, Ordering::Relaxed);
        self.sink_connected.store(true, Ordering::Relaxed);
    }

    pub fn sink_connection_lost(&self) {
        self.sink_connected.store(false, Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.scans,
            &self.empty_scans,
            &self.parents_installed,
            &self.reselections_started,
            &self.reselections_suppressed,
            &self.reselections_exhausted,
            &self.fallbacks,
            &self.link_restarts,
            &self.parent_disconnects,
            &self.sensor_faults,
            &self.reports_sent,
            &self.send_failures,
            &self.sends_dropped,
            &self.payload_fallbacks,
            &self.messages_received,
            &self.messages_published,
            &self.publishes_skipped,
            &self.publish_failures,
            &self.sink_connections,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.sink_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        MetricsSnapshot {
            parent: ParentMetrics {
                scans: load(&self.scans),
                empty_scans: load(&self.empty_scans),
                parents_installed: load(&self.parents_installed),
                reselections_started: load(&self.reselections_started),
                reselections_suppressed: load(&self.reselections_suppressed),
                reselections_exhausted: load(&self.reselections_exhausted),
                fallbacks: load(&self.fallbacks),
                link_restarts: load(&self.link_restarts),
                parent_disconnects: load(&self.parent_disconnects),
            },
            reports: ReportMetrics {
                sensor_faults: load(&self.sensor_faults),
                reports_sent: load(&self.reports_sent),
                send_failures: load(&self.send_failures),
                sends_dropped: load(&self.sends_dropped),
                payload_fallbacks: load(&self.payload_fallbacks),
            },
            bridge: BridgeMetrics {
                sink_connected: self.sink_connected.load(Ordering::Relaxed),
                sink_connections: load(&self.sink_connections),
                messages_received: load(&self.messages_received),
                messages_published: load(&self.messages_published),
                publishes_skipped: load(&self.publishes_skipped),
                publish_failures: load(&self.publish_failures),
            },
            uptime_seconds: now.saturating_sub(load(&self.uptime_start)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub parent: ParentMetrics,
    pub reports: ReportMetrics,
    pub bridge: BridgeMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParentMetrics {
    pub scans: u64,
    pub empty_scans: u64,
    pub parents_installed: u64,
    pub reselections_started: u64,
    pub reselections_suppressed: u64,
    pub reselections_exhausted: u64,
    pub fallbacks: u64,
    pub link_restarts: u64,
    pub parent_disconnects: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetrics {
    pub sensor_faults: u64,
    pub reports_sent: u64,
    pub send_failures: u64,
    pub sends_dropped: u64,
    pub payload_fallbacks: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeMetrics {
    pub sink_connected: bool,
    pub sink_connections: u64,
    pub messages_received: u64,
    pub messages_published: u64,
    pub publishes_skipped: u64,
    pub publish_failures: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
