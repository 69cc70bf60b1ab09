//! Diagnostic tap for relay nodes
//!
//! Forwarding itself happens inside the transport. The tap only logs what
//! reaches this node and takes no part in connectivity handling.

use crate::mesh::{MeshTransport, RelayedMessage, TransportError};
use crate::observability::metrics::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const TAP_RECV_TIMEOUT: Duration = Duration::from_millis(1000);

pub struct RelayTap<T: MeshTransport + ?Sized> {
    transport: Arc<T>,
    recv_timeout: Duration,
}

impl<T: MeshTransport + ?Sized> RelayTap<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            recv_timeout: TAP_RECV_TIMEOUT,
        }
    }

    pub fn with_recv_timeout(mut self, recv_timeout: Duration) -> Self {
        self.recv_timeout = recv_timeout;
        self
    }

    /// Log one observed message
    pub fn observe(&self, message: &RelayedMessage) {
        metrics().message_received();
        info!(
            from = %message.from,
            len = message.len(),
            payload = %message.lossy_text(),
            "RX from child"
        );
    }

    /// One receive; returns the message that was logged, if any
    pub async fn poll_once(&self) -> Result<Option<RelayedMessage>, TransportError> {
        let message = self.transport.recv(self.recv_timeout).await?;
        if let Some(message) = &message {
            self.observe(message);
        }
        Ok(message)
    }

    pub async fn run(self) {
        loop {
            match self.poll_once().await {
                Ok(_) => {}
                Err(TransportError::Closed) => break,
                Err(e) => {
                    warn!(error = %e, "Relay tap receive failed");
                    tokio::time::sleep(self.recv_timeout).await;
                }
            }
        }
    }
}
