//! Connection manager configuration

use crate::network::address::EndpointAddress;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Default P2P port
pub const DEFAULT_PORT: u16 = 9186;

/// Outbound backlog above which a connection is closed (32 MiB)
pub const DEFAULT_MAX_BUFFER: usize = 32 * 1024 * 1024;

/// Read buffer reserved per read call (64 KiB)
pub const DEFAULT_READ_BUFFER: usize = 64 * 1024;

/// Connection manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConnManConfig {
    /// Local address to listen on
    pub bind: EndpointAddress,
    /// Drop every inbound connection
    pub isolated: bool,
    /// Maximum unflushed bytes per connection
    pub max_buffer: usize,
    /// Bytes reserved for each socket read
    pub read_buffer_size: usize,
    /// Trace every chunk sent and received
    pub log_communication: bool,
}

impl Default for ConnManConfig {
    fn default() -> Self {
        Self {
            bind: EndpointAddress::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT),
            isolated: false,
            max_buffer: DEFAULT_MAX_BUFFER,
            read_buffer_size: DEFAULT_READ_BUFFER,
            log_communication: false,
        }
    }
}

impl ConnManConfig {
    pub fn new(bind: EndpointAddress) -> Self {
        Self {
            bind,
            ..Default::default()
        }
    }

    pub fn with_isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }

    pub fn with_max_buffer(mut self, max_buffer: usize) -> Self {
        self.max_buffer = max_buffer;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_log_communication(mut self, enable: bool) -> Self {
        self.log_communication = enable;
        self
    }
}
