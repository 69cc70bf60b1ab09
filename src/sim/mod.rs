//! Simulated mesh and instruments for running whole deployments in one
//! process

pub mod instruments;
pub mod mesh;

pub use instruments::SimInstruments;
pub use mesh::{SimMesh, SimTransport, TopologyEntry, ROUTER_ADDR, SCAN_ROUND};
