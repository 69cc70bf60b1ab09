//! Testing utilities and mock implementations
//!
//! Lets node behaviour be tested without radios, sensors or an MQTT broker.

pub mod mocks;

pub use mocks::*;
