//! Mock implementations for testing
//!
//! Provides a scriptable mesh transport, a publish sink with a switchable
//! connection flag, scripted instruments and a recording display, so node
//! behaviour can be exercised without radios, sensors or a broker.

use crate::mesh::{
    Candidate, LinkSettings, MeshAddr, MeshEvent, MeshTransport, ParentAssignment,
    RelayedMessage, TransportError, MAX_PAYLOAD_LEN,
};
use crate::sensor::{ClimateReading, DisplaySink, Instruments, SensorFault};
use crate::transport::{PublishSink, SinkError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One call made against [`MockMeshTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Configure(LinkSettings),
    Scan,
    SetParent(ParentAssignment),
    SetSelfOrganized(bool),
    Start,
    Stop,
    Send { dest: MeshAddr, payload: Vec<u8> },
}

/// Mock mesh transport with scripted scans and recorded calls
#[derive(Debug, Default)]
pub struct MockMeshTransport {
    address: MeshAddr,
    scripted_scans: Mutex<VecDeque<Result<Vec<Candidate>, TransportError>>>,
    default_scan: Mutex<Vec<Candidate>>,
    calls: Mutex<Vec<TransportCall>>,
    inbound: Mutex<VecDeque<RelayedMessage>>,
    started: AtomicBool,
    fail_configure: AtomicBool,
    fail_send: AtomicBool,
    event_sender: Mutex<Option<mpsc::Sender<MeshEvent>>>,
}

impl MockMeshTransport {
    pub fn new(address: MeshAddr) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    /// Queue the result of the next scan; later scans fall back to the default
    pub fn push_scan(&self, scan: Result<Vec<Candidate>, TransportError>) {
        lock(&self.scripted_scans).push_back(scan);
    }

    /// Result of every scan once the scripted ones are used up
    pub fn set_default_scan(&self, scan: Vec<Candidate>) {
        *lock(&self.default_scan) = scan;
    }

    pub fn push_inbound(&self, message: RelayedMessage) {
        lock(&self.inbound).push_back(message);
    }

    pub fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::SeqCst);
    }

    pub fn fail_configure(&self, fail: bool) {
        self.fail_configure.store(fail, Ordering::SeqCst);
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    pub fn count(&self, matches: impl Fn(&TransportCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| matches(c)).count()
    }

    pub fn scan_count(&self) -> usize {
        self.count(|c| matches!(c, TransportCall::Scan))
    }

    pub fn sends(&self) -> Vec<(MeshAddr, Vec<u8>)> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                TransportCall::Send { dest, payload } => Some((*dest, payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn installed_parents(&self) -> Vec<MeshAddr> {
        lock(&self.calls)
            .iter()
            .filter_map(|c| match c {
                TransportCall::SetParent(assignment) => Some(assignment.candidate.addr),
                _ => None,
            })
            .collect()
    }

    /// Deliver an event as the link layer would
    pub async fn emit(&self, event: MeshEvent) -> bool {
        let sender = lock(&self.event_sender).clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    fn record(&self, call: TransportCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl MeshTransport for MockMeshTransport {
    fn address(&self) -> MeshAddr {
        self.address
    }

    async fn configure(&self, settings: &LinkSettings) -> Result<(), TransportError> {
        self.record(TransportCall::Configure(settings.clone()));
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidConfig(
                "Mock configure failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<Candidate>, TransportError> {
        self.record(TransportCall::Scan);
        let scripted = lock(&self.scripted_scans).pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(lock(&self.default_scan).clone()),
        }
    }

    async fn set_parent(&self, assignment: &ParentAssignment) -> Result<(), TransportError> {
        self.record(TransportCall::SetParent(assignment.clone()));
        Ok(())
    }

    async fn set_self_organized(&self, enabled: bool) -> Result<(), TransportError> {
        self.record(TransportCall::SetSelfOrganized(enabled));
        Ok(())
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Start);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Stop);
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    async fn send(&self, dest: MeshAddr, payload: &[u8]) -> Result<(), TransportError> {
        self.record(TransportCall::Send {
            dest,
            payload: payload.to_vec(),
        });
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(TransportError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::NoRoute(dest));
        }
        Ok(())
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<RelayedMessage>, TransportError> {
        let next = lock(&self.inbound).pop_front();
        if next.is_none() {
            tokio::time::sleep(timeout).await;
        }
        Ok(next)
    }

    fn set_event_sender(&self, sender: mpsc::Sender<MeshEvent>) {
        *lock(&self.event_sender) = Some(sender);
    }
}

/// Publish sink with a switchable connection flag
#[derive(Debug, Default)]
pub struct MockSink {
    connected: AtomicBool,
    fail: AtomicBool,
    published: Mutex<Vec<(String, Bytes)>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        let sink = Self::default();
        sink.set_connected(true);
        sink
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, Bytes)> {
        lock(&self.published).clone()
    }
}

#[async_trait]
impl PublishSink for MockSink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::NotConnected);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::PublishFailed {
                topic: topic.to_string(),
                message: "Mock publish failure".to_string(),
            });
        }
        lock(&self.published).push((topic.to_string(), payload));
        Ok(())
    }
}

/// Instruments that replay queued readings
///
/// Each instrument pops its next scripted result; once the queue is empty it
/// keeps returning `Ok` with the last value it was given (or 0 / false).
#[derive(Debug, Default)]
pub struct ScriptedInstruments {
    climate: VecDeque<Result<ClimateReading, SensorFault>>,
    motion: VecDeque<Result<bool, SensorFault>>,
    light: VecDeque<Result<u16, SensorFault>>,
    steady_climate: Option<ClimateReading>,
    steady_motion: bool,
    steady_light: u16,
}

impl ScriptedInstruments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instruments that always return the same readings
    pub fn steady(temp_c: i32, humidity: i32, motion: bool, light_raw: u16) -> Self {
        Self {
            steady_climate: Some(ClimateReading { temp_c, humidity }),
            steady_motion: motion,
            steady_light: light_raw,
            ..Default::default()
        }
    }

    pub fn push_climate(&mut self, reading: Result<ClimateReading, SensorFault>) {
        self.climate.push_back(reading);
    }

    pub fn push_motion(&mut self, reading: Result<bool, SensorFault>) {
        self.motion.push_back(reading);
    }

    pub fn push_light(&mut self, reading: Result<u16, SensorFault>) {
        self.light.push_back(reading);
    }
}

impl Instruments for ScriptedInstruments {
    fn read_climate(&mut self) -> Result<ClimateReading, SensorFault> {
        match self.climate.pop_front() {
            Some(Ok(reading)) => {
                self.steady_climate = Some(reading);
                Ok(reading)
            }
            Some(Err(fault)) => Err(fault),
            None => Ok(self.steady_climate.unwrap_or(ClimateReading {
                temp_c: 0,
                humidity: 0,
            })),
        }
    }

    fn read_motion(&mut self) -> Result<bool, SensorFault> {
        match self.motion.pop_front() {
            Some(result) => result,
            None => Ok(self.steady_motion),
        }
    }

    fn read_light(&mut self) -> Result<u16, SensorFault> {
        match self.light.pop_front() {
            Some(Ok(raw)) => {
                self.steady_light = raw;
                Ok(raw)
            }
            Some(Err(fault)) => Err(fault),
            None => Ok(self.steady_light),
        }
    }
}

/// Display that keeps the current rows in memory
///
/// Clones share state, so a test can keep one handle while the reporter owns
/// the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingDisplay {
    inner: Arc<Mutex<DisplayState>>,
}

#[derive(Debug, Default)]
struct DisplayState {
    rows: BTreeMap<u8, String>,
    clears: usize,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(&self, row: u8) -> Option<String> {
        lock(&self.inner).rows.get(&row).cloned()
    }

    pub fn rows(&self) -> Vec<(u8, String)> {
        lock(&self.inner)
            .rows
            .iter()
            .map(|(row, text)| (*row, text.clone()))
            .collect()
    }

    pub fn clears(&self) -> usize {
        lock(&self.inner).clears
    }
}

impl DisplaySink for RecordingDisplay {
    fn clear(&mut self) {
        let mut state = lock(&self.inner);
        state.rows.clear();
        state.clears += 1;
    }

    fn write_row(&mut self, row: u8, text: &str) {
        lock(&self.inner).rows.insert(row, text.to_string());
    }
}
