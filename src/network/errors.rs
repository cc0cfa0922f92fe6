//! Connection close reasons
//!
//! Every way a connection can end is reduced to an integer [`ErrorCode`].
//! Positive codes are OS errno values, negative codes belong to the
//! connection layer. Names and descriptions are for diagnostics only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Normalized reason code for a connection closure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    /// Peer closed its end of the stream
    pub const EOF: ErrorCode = ErrorCode(-4095);
    /// Outbound write backlog exceeded the configured threshold
    pub const BUFFER_FULL: ErrorCode = ErrorCode(-5000);
    /// A higher layer asked for the connection to be closed
    pub const LOCAL_CLOSE: ErrorCode = ErrorCode(-5001);
    /// The connection manager is shutting down
    pub const SHUTDOWN: ErrorCode = ErrorCode(-5002);
    /// I/O failure that carried no OS error code
    pub const UNKNOWN: ErrorCode = ErrorCode(-5003);

    /// Normalize an I/O error
    pub fn from_io(err: &io::Error) -> Self {
        if let Some(code) = err.raw_os_error() {
            return ErrorCode(code);
        }
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::EOF,
            _ => Self::UNKNOWN,
        }
    }

    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn is_os_error(&self) -> bool {
        self.0 > 0
    }

    /// Stable short name, e.g. `EOF` or `ECONNRESET`
    pub fn name(&self) -> String {
        match *self {
            Self::EOF => "EOF".to_string(),
            Self::BUFFER_FULL => "EBUFFERFULL".to_string(),
            Self::LOCAL_CLOSE => "ELOCALCLOSE".to_string(),
            Self::SHUTDOWN => "ESHUTDOWN".to_string(),
            Self::UNKNOWN => "EUNKNOWN".to_string(),
            ErrorCode(code) if code > 0 => os_error_name(code)
                .map(str::to_string)
                .unwrap_or_else(|| format!("EOS{}", code)),
            ErrorCode(code) => format!("E{}", code),
        }
    }

    /// Human-readable description
    pub fn description(&self) -> String {
        match *self {
            Self::EOF => "end of file".to_string(),
            Self::BUFFER_FULL => "write buffer full".to_string(),
            Self::LOCAL_CLOSE => "closed by local request".to_string(),
            Self::SHUTDOWN => "connection manager shut down".to_string(),
            Self::UNKNOWN => "unknown error".to_string(),
            ErrorCode(code) if code > 0 => io::Error::from_raw_os_error(code).to_string(),
            ErrorCode(code) => format!("unknown error code {}", code),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.description())
    }
}

/// errno name derived from the portable error kind
fn os_error_name(code: i32) -> Option<&'static str> {
    let name = match io::Error::from_raw_os_error(code).kind() {
        io::ErrorKind::ConnectionRefused => "ECONNREFUSED",
        io::ErrorKind::ConnectionReset => "ECONNRESET",
        io::ErrorKind::ConnectionAborted => "ECONNABORTED",
        io::ErrorKind::NotConnected => "ENOTCONN",
        io::ErrorKind::AddrInUse => "EADDRINUSE",
        io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
        io::ErrorKind::BrokenPipe => "EPIPE",
        io::ErrorKind::TimedOut => "ETIMEDOUT",
        io::ErrorKind::PermissionDenied => "EACCES",
        io::ErrorKind::WouldBlock => "EAGAIN",
        io::ErrorKind::Interrupted => "EINTR",
        io::ErrorKind::InvalidInput => "EINVAL",
        io::ErrorKind::OutOfMemory => "ENOMEM",
        io::ErrorKind::HostUnreachable => "EHOSTUNREACH",
        io::ErrorKind::NetworkUnreachable => "ENETUNREACH",
        io::ErrorKind::NetworkDown => "ENETDOWN",
        _ => return None,
    };
    Some(name)
}
