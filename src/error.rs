//! Node-level error taxonomy
//!
//! Startup failures abort boot. Everything that can go wrong in steady state
//! (empty scans, sensor faults, failed sends, a disconnected sink, encoding
//! failures) is absorbed by the loop that owns it; those variants exist so the
//! loops can log and count them uniformly.

use crate::config::ConfigError;
use crate::mesh::TransportError;
use crate::transport::SinkError;
use thiserror::Error;

/// Main error type for node operations
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("No eligible parent candidate after {attempts} scan(s)")]
    TransientScanEmpty { attempts: u32 },

    #[error("Transport configuration failed: {0}")]
    TransportConfig(TransportError),

    #[error("Sensor read fault: {message}")]
    SensorReadFault { message: String },

    #[error("Send failed: {0}")]
    SendFailure(TransportError),

    #[error("Sink disconnected, message dropped")]
    SinkDisconnected,

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Record serialization failed: {message}")]
    SerializationFailure { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl NodeError {
    /// Whether this error must abort boot
    pub fn is_fatal(&self) -> bool {
        matches!(self, NodeError::TransportConfig(_) | NodeError::Config(_))
    }

    pub fn sensor_fault<S: Into<String>>(message: S) -> Self {
        Self::SensorReadFault {
            message: message.into(),
        }
    }

    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::SerializationFailure {
            message: message.into(),
        }
    }

    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_startup_errors_are_fatal() {
        assert!(NodeError::TransportConfig(TransportError::InvalidConfig("x".into())).is_fatal());
        assert!(NodeError::Config(ConfigError::InvalidConfig("x".into())).is_fatal());

        assert!(!NodeError::TransientScanEmpty { attempts: 20 }.is_fatal());
        assert!(!NodeError::sensor_fault("dht timeout").is_fatal());
        assert!(!NodeError::SendFailure(TransportError::NotConnected).is_fatal());
        assert!(!NodeError::SinkDisconnected.is_fatal());
        assert!(!NodeError::serialization("too long").is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let error = NodeError::TransientScanEmpty { attempts: 3 };
        assert_eq!(
            error.to_string(),
            "No eligible parent candidate after 3 scan(s)"
        );

        let error = NodeError::SendFailure(TransportError::PayloadTooLarge { len: 300, max: 255 });
        assert!(error.to_string().contains("300"));
        assert!(error.to_string().contains("255"));
    }
}
