//! Per-node connectivity tracking
//!
//! - [`state`] - the pure state machine and its snapshot type
//! - [`guard`] - the at-most-one reselection flag
//! - [`reselect`] - the (re)selection task body
//! - [`dispatcher`] - the single consumer of link events

pub mod dispatcher;
pub mod guard;
pub mod reselect;
pub mod state;

pub use dispatcher::Dispatcher;
pub use guard::{ReselectGuard, ReselectPermit};
pub use reselect::{restart_link, ReselectionKind, ReselectionReport, Reselector, LINK_RESTART_DELAY};
pub use state::{Connectivity, ConnectivitySnapshot, ConnectivityState, Directive, LocalEvent};
