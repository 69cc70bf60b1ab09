//! MQTT implementation of the root bridge's publish sink
//!
//! - [`connection`] - broker endpoint, credentials, reconnect policy, topics
//! - [`message_handler`] - classification of event loop notifications
//! - [`health_monitor`] - sink state transitions and reconnect steps
//! - [`client`] - the supervisor task and the [`PublishSink`](crate::transport::PublishSink) impl
//!
//! ```rust,no_run
//! use meshnode::config::MqttSection;
//! use meshnode::transport::mqtt::MqttSink;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     broker_url: "mqtt://localhost:1883".to_string(),
//!     username_env: None,
//!     password_env: None,
//!     keep_alive_secs: 30,
//! };
//!
//! let mut sink = MqttSink::new("root", config)?;
//! sink.connect()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttSink;
pub use connection::{MqttError, ReconnectPolicy, SinkState, TopicBuilder};
pub use health_monitor::{BrokerSignal, HealthMonitor, ReconnectStep};
pub use message_handler::{EventRoute, MessageHandler};
