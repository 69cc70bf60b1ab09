//! External pub/sub sink used by the root bridge
//!
//! The root republishes mesh traffic to a broker. The bridge only needs two
//! things from the sink: a cheap connected flag and a fire-and-forget publish.

use bytes::Bytes;
use thiserror::Error;

pub mod mqtt;

/// Errors surfaced by a publish sink
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SinkError {
    #[error("Sink not connected")]
    NotConnected,
    #[error("Publish to {topic} failed: {message}")]
    PublishFailed { topic: String, message: String },
}

/// Broker-facing sink for republished mesh payloads
///
/// Implementations track their own connection through the broker's
/// connect/disconnect notifications; `is_connected` must be a plain read that
/// never blocks.
#[async_trait::async_trait]
pub trait PublishSink: Send + Sync {
    /// Current connection flag as last reported by the broker client
    fn is_connected(&self) -> bool;

    /// Publish at-most-once, not retained
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SinkError>;
}
