use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, SipParseError};

/// The protocol name/version pair of a start line or Via sent-protocol,
/// e.g. `("SIP", "2.0")`.
///
/// Equality is case-insensitive on the name and exact on the version.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub name: String,
    pub version: String,
}

impl ProtocolInfo {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.version.is_empty()
    }
}

impl Default for ProtocolInfo {
    fn default() -> Self {
        Self::new("SIP", "2.0")
    }
}

impl PartialEq for ProtocolInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.version == other.version
    }
}

impl fmt::Display for ProtocolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// The transport a message travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransportType {
    #[default]
    Udp,
    Tcp,
    Tls,
    Ws,
}

impl TransportType {
    /// `true` when delivery is reliable (stream transports).
    pub const fn reliable(&self) -> bool {
        !matches!(self, TransportType::Udp)
    }

    /// `true` when the transport runs over an encrypted channel.
    pub const fn secured(&self) -> bool {
        matches!(self, TransportType::Tls)
    }

    /// `true` for stream transports that need Content-Length framing.
    pub const fn streamed(&self) -> bool {
        !matches!(self, TransportType::Udp)
    }

    pub const fn default_port(&self) -> u16 {
        match self {
            TransportType::Udp | TransportType::Tcp => 5060,
            TransportType::Tls => 5061,
            TransportType::Ws => 80,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportType::Udp => "UDP",
            TransportType::Tcp => "TCP",
            TransportType::Tls => "TLS",
            TransportType::Ws => "WS",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("UDP") {
            Ok(TransportType::Udp)
        } else if s.eq_ignore_ascii_case("TCP") {
            Ok(TransportType::Tcp)
        } else if s.eq_ignore_ascii_case("TLS") {
            Ok(TransportType::Tls)
        } else if s.eq_ignore_ascii_case("WS") {
            Ok(TransportType::Ws)
        } else {
            Err(SipParseError::new(format!("unknown transport '{s}'")).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_equality_is_case_insensitive_on_name() {
        assert_eq!(ProtocolInfo::new("SIP", "2.0"), ProtocolInfo::new("sip", "2.0"));
        assert_ne!(ProtocolInfo::new("SIP", "2.0"), ProtocolInfo::new("SIP", "2.1"));
    }

    #[test]
    fn test_transport_flags() {
        assert!(!TransportType::Udp.reliable());
        assert!(TransportType::Tcp.reliable());
        assert!(TransportType::Tls.secured());
        assert_eq!(TransportType::Udp.default_port(), 5060);
        assert_eq!(TransportType::Tls.default_port(), 5061);
    }
}
