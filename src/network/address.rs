//! Endpoint addresses
//!
//! An IPv4 address plus port, written `a.b.c.d:port`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use thiserror::Error;

/// Address parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,
    #[error("Missing port in '{0}'")]
    MissingPort(String),
    #[error("Invalid port '{0}'")]
    InvalidPort(String),
    #[error("Invalid IPv4 address '{0}'")]
    InvalidIp(String),
    #[error("Not an IPv4 endpoint: {0}")]
    NotIpv4(SocketAddr),
}

/// IPv4 endpoint of a TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl EndpointAddress {
    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Parse the canonical `ip:port` text form
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        if text.is_empty() {
            return Err(AddressError::Empty);
        }

        let (ip, port) = text
            .rsplit_once(':')
            .ok_or_else(|| AddressError::MissingPort(text.to_string()))?;

        if port.is_empty() {
            return Err(AddressError::MissingPort(text.to_string()));
        }

        // u16::from_str accepts a leading '+', the text form does not
        if !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AddressError::InvalidPort(port.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::InvalidPort(port.to_string()))?;

        let ip = ip
            .parse::<Ipv4Addr>()
            .map_err(|_| AddressError::InvalidIp(ip.to_string()))?;

        Ok(Self { ip, port })
    }

    /// OS-level socket address for bind and connect
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for EndpointAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<SocketAddrV4> for EndpointAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl TryFrom<SocketAddr> for EndpointAddress {
    type Error = AddressError;

    fn try_from(addr: SocketAddr) -> Result<Self, Self::Error> {
        match addr {
            SocketAddr::V4(v4) => Ok(v4.into()),
            SocketAddr::V6(_) => Err(AddressError::NotIpv4(addr)),
        }
    }
}

impl Serialize for EndpointAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EndpointAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let addr = EndpointAddress::parse("127.0.0.1:9186").unwrap();
        assert_eq!(addr.ip, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(addr.port, 9186);

        let addr: EndpointAddress = "0.0.0.0:0".parse().unwrap();
        assert_eq!(addr, EndpointAddress::new(Ipv4Addr::UNSPECIFIED, 0));

        let addr: EndpointAddress = "255.255.255.255:65535".parse().unwrap();
        assert_eq!(addr.port, u16::MAX);
    }

    #[test]
    fn test_round_trip() {
        for text in ["10.0.0.5:5555", "192.0.2.1:9186", "1.2.3.4:1", "0.0.0.0:65535"] {
            let addr = EndpointAddress::parse(text).unwrap();
            assert_eq!(addr.to_string(), text);
            assert_eq!(EndpointAddress::parse(&addr.to_string()).unwrap(), addr);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(EndpointAddress::parse(""), Err(AddressError::Empty));
        assert!(matches!(
            EndpointAddress::parse("127.0.0.1"),
            Err(AddressError::MissingPort(_))
        ));
        assert!(matches!(
            EndpointAddress::parse("127.0.0.1:"),
            Err(AddressError::MissingPort(_))
        ));
        assert!(matches!(
            EndpointAddress::parse("127.0.0.1:http"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            EndpointAddress::parse("127.0.0.1:+80"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            EndpointAddress::parse("127.0.0.1:65536"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            EndpointAddress::parse("127.0.0.1:80 "),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            EndpointAddress::parse("256.0.0.1:80"),
            Err(AddressError::InvalidIp(_))
        ));
        assert!(matches!(
            EndpointAddress::parse("localhost:80"),
            Err(AddressError::InvalidIp(_))
        ));
        assert!(matches!(
            EndpointAddress::parse("[::1]:80"),
            Err(AddressError::InvalidIp(_))
        ));
        assert!(matches!(
            EndpointAddress::parse(":80"),
            Err(AddressError::InvalidIp(_))
        ));
    }

    #[test]
    fn test_socket_addr_conversions() {
        let addr = EndpointAddress::parse("10.0.0.5:5555").unwrap();
        let sock = addr.socket_addr();
        assert_eq!(sock.to_string(), "10.0.0.5:5555");
        assert_eq!(EndpointAddress::try_from(sock).unwrap(), addr);

        let v6: SocketAddr = "[::1]:80".parse().unwrap();
        assert!(matches!(
            EndpointAddress::try_from(v6),
            Err(AddressError::NotIpv4(_))
        ));
    }

    #[test]
    fn test_serde_uses_text_form() {
        let addr = EndpointAddress::parse("10.0.0.5:5555").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"10.0.0.5:5555\"");

        let back: EndpointAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);

        assert!(serde_json::from_str::<EndpointAddress>("\"10.0.0.5\"").is_err());
    }
}
