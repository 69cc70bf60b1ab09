//! Mesh link primitives
//!
//! Addresses, scan candidates, link events and the transport trait the rest
//! of the crate is written against.

pub mod addr;
pub mod events;
pub mod transport;

pub use addr::{AddrParseError, Candidate, MeshAddr, RelayedMessage, MAX_PAYLOAD_LEN};
pub use events::{DisconnectReason, MeshEvent};
pub use transport::{
    LinkAuth, LinkSettings, MeshTransport, NodeType, ParentAssignment, TransportError,
};
