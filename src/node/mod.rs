//! Per-node wiring of transport, dispatcher and role tasks

pub mod lifecycle;

pub use lifecycle::{link_settings, NodeLifecycle, Peripherals};
