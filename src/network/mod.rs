//! P2P connection layer
//!
//! Manages the TCP connections of a node.
//!
//! # Features
//! - Single reactor thread owning every socket
//! - Thread-safe command queue
//! - Inbound accept with optional isolation
//! - Outbound connect with failure reporting
//! - Write backlog limit per connection
//! - Orderly shutdown

pub mod address;
pub mod config;
pub mod conman;
pub mod connection;
pub mod errors;
pub mod event;
pub mod peer;
pub mod registry;

pub use address::{AddressError, EndpointAddress};
pub use config::{ConnManConfig, DEFAULT_MAX_BUFFER, DEFAULT_PORT, DEFAULT_READ_BUFFER};
pub use conman::{ConnError, ConnectionManager, ReactorState, REACTOR_THREAD_NAME};
pub use connection::Connection;
pub use errors::ErrorCode;
pub use event::{Event, EventQueue, PeerData};
pub use peer::{CloseInfo, ConnectionObserver, PeerServer};
pub use registry::{ConnectionId, ConnectionTable};
