//! Conman: TCP connection manager for a P2P node
//!
//! This crate provides the connection layer of a peer-to-peer node:
//! - Listening socket with inbound accept
//! - Outbound connects to IPv4 endpoints
//! - Registry of live connections with stable ids
//! - Cross-thread event queue drained by one reactor thread
//! - Per-connection write backlog limit
//! - Close reasons normalized to integer error codes
//!
//! # Example
//!
//! ```no_run
//! use conman::network::{
//!     CloseInfo, ConnManConfig, Connection, ConnectionManager, ConnectionObserver,
//!     EndpointAddress, ErrorCode, PeerServer,
//! };
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl PeerServer for Echo {
//!     fn authenticate(&self, connection: Arc<Connection>) {
//!         connection.start_read();
//!     }
//!     fn on_failed_connect(&self, _address: EndpointAddress, _error: ErrorCode) {}
//! }
//!
//! impl ConnectionObserver for Echo {
//!     fn on_connected(&self, _connection: &Arc<Connection>) {}
//!     fn on_message(&self, connection: &Arc<Connection>, data: &[u8]) {
//!         connection.send(data.to_vec());
//!     }
//!     fn on_close(&self, _connection: &Arc<Connection>, _info: CloseInfo) {}
//! }
//!
//! let echo = Arc::new(Echo);
//! let manager = ConnectionManager::start(ConnManConfig::default(), echo.clone(), echo).unwrap();
//! println!("Listening on {}", manager.bind_address());
//!
//! manager.shutdown(ErrorCode::SHUTDOWN);
//! manager.join();
//! ```

pub mod cli;
pub mod network;

// Re-export commonly used types
pub use network::{
    CloseInfo, ConnManConfig, Connection, ConnectionManager, ConnectionObserver, EndpointAddress,
    ErrorCode, PeerData, PeerServer,
};
