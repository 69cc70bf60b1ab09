//! meshnode - coordination logic for a leaf/relay/root wireless mesh
//!
//! # Overview
//!
//! The mesh transport does the multi-hop routing. This crate supplies what runs on
//! top of it:
//! - forced-topology parent selection with an optional self-organized fallback
//! - a per-node connectivity state machine fed by link events, with at most one
//!   reselection task at a time
//! - periodic sensor reports from leaves to the root
//! - a root bridge republishing mesh traffic to an MQTT broker
//! - a diagnostic tap for relays
//! - an in-process simulated mesh for running a whole deployment locally
//!
//! # Quick Start
//!
//! ```rust
//! use meshnode::mesh::{Candidate, MeshAddr};
//! use meshnode::selector::select_parent;
//!
//! let relay_a: MeshAddr = "88:57:21:b3:56:f5".parse().unwrap();
//! let relay_b: MeshAddr = "00:70:07:7e:6f:bd".parse().unwrap();
//!
//! let scan = vec![
//!     Candidate::new(relay_a, "MESH", 1, -71),
//!     Candidate::new(relay_b, "MESH", 1, -48),
//! ];
//!
//! let parent = select_parent(&scan, &[relay_a, relay_b], false).unwrap();
//! assert_eq!(parent.addr, relay_b);
//! assert_eq!(parent.addr.routing_key(), "00:70:07:7e:6f:bd");
//! ```

pub mod bridge;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod mesh;
pub mod node;
pub mod observability;
pub mod relay;
pub mod selector;
pub mod sensor;
pub mod sim;
pub mod testing;
pub mod transport;

pub use bridge::{BridgeConfig, BridgeOutcome, RootBridge};
pub use config::{ConfigError, MeshConfig};
pub use connectivity::{ConnectivitySnapshot, ConnectivityState, Dispatcher};
pub use error::{NodeError, NodeResult};
pub use mesh::{MeshAddr, MeshEvent, MeshTransport, NodeType};
pub use node::{NodeLifecycle, Peripherals};
pub use selector::{select_parent, ParentSelector, SelectionOutcome, SelectorConfig};
pub use sensor::{SensorRecord, SensorReporter};
pub use transport::mqtt::MqttSink;
pub use transport::PublishSink;
