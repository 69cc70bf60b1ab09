//! Root bridge: mesh receive loop republishing to the broker
//!
//! Each message is published under `<base>/<sender address>` if the sink is
//! connected at arrival, and dropped otherwise. There is no queue and no
//! replay after the sink comes back.

use crate::config::BridgeSection;
use crate::error::NodeError;
use crate::mesh::{MeshTransport, RelayedMessage, TransportError};
use crate::observability::metrics::metrics;
use crate::transport::mqtt::TopicBuilder;
use crate::transport::{PublishSink, SinkError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub base_topic: String,
    pub recv_timeout: Duration,
}

impl From<&BridgeSection> for BridgeConfig {
    fn from(section: &BridgeSection) -> Self {
        Self {
            base_topic: section.base_topic.clone(),
            recv_timeout: Duration::from_millis(section.recv_timeout_ms.max(1)),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        (&BridgeSection::default()).into()
    }
}

/// Fate of one received message
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeOutcome {
    Published { topic: String },
    SkippedDisconnected { topic: String },
    PublishFailed(SinkError),
}

impl BridgeOutcome {
    /// The steady-state error a dropped message is logged as
    pub fn error(&self) -> Option<NodeError> {
        match self {
            BridgeOutcome::Published { .. } => None,
            BridgeOutcome::SkippedDisconnected { .. } => Some(NodeError::SinkDisconnected),
            BridgeOutcome::PublishFailed(e) => Some(NodeError::Sink(e.clone())),
        }
    }
}

pub struct RootBridge<T: MeshTransport + ?Sized, S: PublishSink + ?Sized> {
    transport: Arc<T>,
    sink: Arc<S>,
    config: BridgeConfig,
}

impl<T, S> RootBridge<T, S>
where
    T: MeshTransport + ?Sized,
    S: PublishSink + ?Sized,
{
    pub fn new(transport: Arc<T>, sink: Arc<S>, config: BridgeConfig) -> Self {
        Self {
            transport,
            sink,
            config,
        }
    }

    pub fn topic_for(&self, message: &RelayedMessage) -> String {
        TopicBuilder::sensor_topic(&self.config.base_topic, &message.from.routing_key())
    }

    /// Publish one message if the sink is up right now
    pub async fn forward(&self, message: RelayedMessage) -> BridgeOutcome {
        metrics().message_received();
        let topic = self.topic_for(&message);
        info!(
            from = %message.from,
            len = message.len(),
            topic = %topic,
            "Mesh message received"
        );

        if !self.sink.is_connected() {
            metrics().publish_skipped();
            let outcome = BridgeOutcome::SkippedDisconnected {
                topic: topic.clone(),
            };
            return Self::dropped(outcome, &topic);
        }

        match self.sink.publish(&topic, message.payload).await {
            Ok(()) => {
                metrics().message_published();
                debug!(topic = %topic, "Published");
                BridgeOutcome::Published { topic }
            }
            Err(e) => {
                metrics().publish_failed();
                Self::dropped(BridgeOutcome::PublishFailed(e), &topic)
            }
        }
    }

    fn dropped(outcome: BridgeOutcome, topic: &str) -> BridgeOutcome {
        if let Some(error) = outcome.error() {
            warn!(topic = %topic, error = %error, "Message dropped");
        }
        outcome
    }

    /// One receive with timeout; `Ok(None)` when nothing arrived
    pub async fn poll_once(&self) -> Result<Option<BridgeOutcome>, TransportError> {
        match self.transport.recv(self.config.recv_timeout).await? {
            Some(message) => Ok(Some(self.forward(message).await)),
            None => Ok(None),
        }
    }

    /// Receive loop; ends only when the transport closes
    pub async fn run(self) {
        info!(base_topic = %self.config.base_topic, "Root bridge running");
        loop {
            match self.poll_once().await {
                Ok(_) => {}
                Err(TransportError::Closed) => {
                    info!("Mesh transport closed, bridge stopping");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Mesh receive failed");
                    tokio::time::sleep(self.config.recv_timeout).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshAddr;
    use crate::testing::mocks::{MockMeshTransport, MockSink};
    use bytes::Bytes;

    fn message() -> RelayedMessage {
        RelayedMessage::new(
            MeshAddr::new([0xaa, 0xbb, 0xcc, 0x11, 0x22, 0x33]),
            Bytes::from_static(br#"{"temp":24}"#),
        )
    }

    #[tokio::test]
    async fn test_topic_uses_sender_address() {
        let bridge = RootBridge::new(
            Arc::new(MockMeshTransport::new(MeshAddr::UNSET)),
            Arc::new(MockSink::connected()),
            BridgeConfig::default(),
        );
        assert_eq!(bridge.topic_for(&message()), "mesh/aa:bb:cc:11:22:33");
    }

    #[tokio::test]
    async fn test_forward_publishes_payload_unmodified() {
        let sink = Arc::new(MockSink::connected());
        let bridge = RootBridge::new(
            Arc::new(MockMeshTransport::new(MeshAddr::UNSET)),
            sink.clone(),
            BridgeConfig::default(),
        );

        let outcome = bridge.forward(message()).await;
        assert!(matches!(outcome, BridgeOutcome::Published { .. }));
        let published = sink.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "mesh/aa:bb:cc:11:22:33");
        assert_eq!(&published[0].1[..], br#"{"temp":24}"#);
    }

    #[tokio::test]
    async fn test_publish_error_is_absorbed() {
        let sink = Arc::new(MockSink::connected());
        sink.fail_publishes(true);
        let bridge = RootBridge::new(
            Arc::new(MockMeshTransport::new(MeshAddr::UNSET)),
            sink.clone(),
            BridgeConfig::default(),
        );

        let outcome = bridge.forward(message()).await;
        assert!(matches!(outcome, BridgeOutcome::PublishFailed(_)));
        assert!(matches!(outcome.error(), Some(NodeError::Sink(_))));
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_sink_skip_is_a_sink_disconnected_error() {
        let sink = Arc::new(MockSink::new());
        let bridge = RootBridge::new(
            Arc::new(MockMeshTransport::new(MeshAddr::UNSET)),
            sink.clone(),
            BridgeConfig::default(),
        );

        let outcome = bridge.forward(message()).await;
        assert_eq!(
            outcome,
            BridgeOutcome::SkippedDisconnected {
                topic: "mesh/aa:bb:cc:11:22:33".to_string()
            }
        );
        let error = outcome.error().expect("skip is an error");
        assert!(matches!(error, NodeError::SinkDisconnected));
        assert!(!error.is_fatal());
        assert!(sink.published().is_empty());
        assert!(BridgeOutcome::Published {
            topic: "mesh/x".to_string()
        }
        .error()
        .is_none());
    }
}
