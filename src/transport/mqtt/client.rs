//! Impure I/O for the MQTT sink
//!
//! A supervisor task owns the rumqttc event loop. It keeps a plain connected
//! flag current from ConnAck/Disconnect notifications, and on failure throws
//! the client away and builds a fresh one after a backoff delay. Requests
//! queued on the dead client go with it, so nothing published while
//! disconnected is replayed later.

use super::connection::{client_options, MqttError, ReconnectPolicy, SinkState};
use super::health_monitor::{BrokerSignal, HealthMonitor, ReconnectStep};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::observability::metrics::metrics;
use crate::transport::{PublishSink, SinkError};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Requests queued per client; a publish that finds the queue full is dropped
const REQUEST_CAPACITY: usize = 10;

/// Broker-backed [`PublishSink`] for the root bridge
pub struct MqttSink {
    client_name: String,
    client: Arc<Mutex<AsyncClient>>,
    event_loop: std::sync::Mutex<Option<EventLoop>>,
    config: MqttSection,
    connected: Arc<AtomicBool>,
    state_tx: watch::Sender<SinkState>,
    state_rx: watch::Receiver<SinkState>,
    shutdown_tx: Option<watch::Sender<bool>>,
    event_loop_handle: Option<JoinHandle<()>>,
    reconnect_policy: ReconnectPolicy,
}

impl MqttSink {
    pub fn new(client_name: &str, config: MqttSection) -> Result<Self, MqttError> {
        let (client, event_loop) = Self::create_connection(client_name, &config)?;
        let (state_tx, state_rx) = watch::channel(SinkState::Connecting);

        Ok(Self {
            client_name: client_name.to_string(),
            client: Arc::new(Mutex::new(client)),
            event_loop: std::sync::Mutex::new(Some(event_loop)),
            config,
            connected: Arc::new(AtomicBool::new(false)),
            state_tx,
            state_rx,
            shutdown_tx: None,
            event_loop_handle: None,
            reconnect_policy: ReconnectPolicy::default(),
        })
    }

    pub fn with_reconnect_policy(mut self, reconnect_policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = reconnect_policy;
        self
    }

    fn create_connection(
        client_name: &str,
        config: &MqttSection,
    ) -> Result<(AsyncClient, EventLoop), MqttError> {
        let options = client_options(client_name, config)?;
        Ok(AsyncClient::new(options, REQUEST_CAPACITY))
    }

    /// Start the supervisor
    ///
    /// Returns immediately. The bridge treats a not-yet-connected sink the
    /// same as a dropped one, so boot never waits on the broker.
    pub fn connect(&mut self) -> Result<(), MqttError> {
        HealthMonitor::validate_policy(&self.reconnect_policy)?;
        let event_loop = self
            .event_loop
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(MqttError::AlreadyRunning)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let supervisor = Supervisor {
            client_name: self.client_name.clone(),
            config: self.config.clone(),
            client: self.client.clone(),
            connected: self.connected.clone(),
            state_tx: self.state_tx.clone(),
            reconnect_policy: self.reconnect_policy.clone(),
            shutdown_rx,
        };
        self.event_loop_handle = Some(tokio::spawn(supervisor.run(event_loop)));
        Ok(())
    }

    /// Wait until the first ConnAck or until `timeout` elapses
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut state_rx = self.state_rx.clone();
        tokio::time::timeout(timeout, async {
            loop {
                if HealthMonitor::is_online(&state_rx.borrow()) {
                    return true;
                }
                if state_rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false)
    }

    pub fn connection_state(&self) -> SinkState {
        self.state_rx.borrow().clone()
    }

    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        {
            let client = self.client.lock().await;
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "Disconnect request not delivered");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        metrics().sink_connection_lost();
        let _ = self
            .state_tx
            .send(SinkState::Offline("client disconnected".to_string()));

        if let Some(handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("MQTT sink supervisor stopped"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "MQTT sink supervisor ended with error")
                }
                Err(_) => warn!("MQTT sink supervisor did not stop in time"),
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PublishSink for MqttSink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::NotConnected);
        }

        // The supervisor swaps the client under this lock on reconnect, so it
        // is never held across the enqueue
        let client = self.client.lock().await.clone();
        let _span = crate::mqtt_span!(topic = %topic).entered();

        // A full request queue means the broker has stalled; drop rather than wait
        client
            .try_publish(topic.to_string(), MessageHandler::publish_qos(), false, payload)
            .map_err(|e| SinkError::PublishFailed {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

/// State owned by the supervisor task
struct Supervisor {
    client_name: String,
    config: MqttSection,
    client: Arc<Mutex<AsyncClient>>,
    connected: Arc<AtomicBool>,
    state_tx: watch::Sender<SinkState>,
    reconnect_policy: ReconnectPolicy,
    shutdown_rx: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(self, mut event_loop: EventLoop) {
        info!(client = %self.client_name, "Starting MQTT sink supervisor");
        let mut attempts = 0u32;

        loop {
            let mut shutdown_rx = self.shutdown_rx.clone();
            let outcome = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                outcome = event_loop.poll() => outcome,
            };

            let event = match outcome {
                Ok(event) => event,
                Err(e) => {
                    self.transition(BrokerSignal::NetworkError(e.to_string()));
                    match self.reconnect(&mut attempts).await {
                        Some(fresh) => {
                            event_loop = fresh;
                            continue;
                        }
                        None => break,
                    }
                }
            };

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => {
                    attempts = 0;
                    self.transition(BrokerSignal::ConnAck);
                }
                EventRoute::Disconnected => {
                    self.transition(BrokerSignal::BrokerDisconnect);
                    match self.reconnect(&mut attempts).await {
                        Some(fresh) => event_loop = fresh,
                        None => break,
                    }
                }
                EventRoute::Chatter(detail) => debug!(packet = %detail, "MQTT sink event"),
                EventRoute::Outgoing => {}
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!(client = %self.client_name, "MQTT sink supervisor stopped");
    }

    fn transition(&self, signal: BrokerSignal) {
        let next = HealthMonitor::state_after(signal);
        let now_connected = HealthMonitor::is_online(&next);
        let was_connected = self.connected.swap(now_connected, Ordering::SeqCst);

        match (was_connected, now_connected) {
            (false, true) => metrics().sink_connection_established(),
            (true, false) => metrics().sink_connection_lost(),
            _ => {}
        }

        let previous = self.state_tx.borrow().clone();
        HealthMonitor::log_transition(&previous, &next);
        let _ = self.state_tx.send(next);
    }

    /// Back off, then replace the client; None means stop supervising
    async fn reconnect(&self, attempts: &mut u32) -> Option<EventLoop> {
        loop {
            let step = HealthMonitor::next_step(
                *attempts,
                &self.reconnect_policy,
                *self.shutdown_rx.borrow(),
            );

            match step {
                ReconnectStep::Retry { attempt, delay } => {
                    *attempts = attempt;
                    self.transition(BrokerSignal::RetryScheduled(attempt));
                    if !self.interruptible_sleep(delay).await {
                        return None;
                    }

                    match MqttSink::create_connection(&self.client_name, &self.config) {
                        Ok((client, event_loop)) => {
                            *self.client.lock().await = client;
                            return Some(event_loop);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to create MQTT connection");
                        }
                    }
                }
                ReconnectStep::Shutdown => return None,
                ReconnectStep::GiveUp => {
                    self.transition(BrokerSignal::BudgetSpent(*attempts));
                    return None;
                }
            }
        }
    }

    async fn interruptible_sleep(&self, delay: Duration) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
