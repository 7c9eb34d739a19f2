//! agtdesk-transport: the one shared WebSocket to the session server and the
//! JSON-RPC control-plane client.
//!
//! Inbound frames are tagged with the connection generation that received
//! them so the consumer can drop anything from a superseded socket.

pub mod connection;
pub mod control;
pub mod error;

pub use connection::{
    CommandSink, Connection, ConnectionConfig, ConnectionState, DEFAULT_RECONNECT_DELAY, Inbound,
    TaggedFrame,
};
pub use control::{ControlClient, ControlPlane, DEFAULT_REQUEST_TIMEOUT};
pub use error::TransportError;
