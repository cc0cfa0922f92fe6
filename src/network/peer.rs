//! Interfaces consumed by the connection manager
//!
//! The peer server decides what to do with fresh connections; the observer
//! receives the byte stream and lifecycle of every connection. Both are
//! called synchronously from the reactor thread, so implementations must not
//! block.

use crate::network::address::EndpointAddress;
use crate::network::connection::Connection;
use crate::network::errors::ErrorCode;
use std::sync::Arc;

/// Final notice for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseInfo {
    pub error: ErrorCode,
}

/// Authentication and dial bookkeeping for peers
pub trait PeerServer: Send + Sync {
    /// Called once for every accepted inbound connection.
    ///
    /// Reading does not begin until someone calls
    /// [`Connection::start_read`].
    fn authenticate(&self, connection: Arc<Connection>);

    /// Called once per outbound attempt that failed to start
    fn on_failed_connect(&self, address: EndpointAddress, error: ErrorCode);
}

/// Per-connection stream callbacks
pub trait ConnectionObserver: Send + Sync {
    /// Reading has begun
    fn on_connected(&self, connection: &Arc<Connection>);

    /// One chunk of inbound bytes, never delivered after closing
    fn on_message(&self, connection: &Arc<Connection>, data: &[u8]);

    /// Exactly once per connection
    fn on_close(&self, connection: &Arc<Connection>, info: CloseInfo);
}
