use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::message::Params;
use crate::parser;

/// URI parameters whose comparison is case-insensitive and whose
/// absence must agree on both sides, RFC 3261 §19.1.4.
const COMPARED_PARAMS: [&str; 6] = ["transport", "user", "method", "maddr", "ttl", "lr"];

/// A URI scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Scheme {
    #[default]
    Sip,
    Sips,
    Tel,
    Other(String),
}

impl Scheme {
    pub fn as_str(&self) -> &str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
            Scheme::Tel => "tel",
            Scheme::Other(s) => s,
        }
    }

    pub fn from_token(token: &str) -> Self {
        if token.eq_ignore_ascii_case("sip") {
            Scheme::Sip
        } else if token.eq_ignore_ascii_case("sips") {
            Scheme::Sips
        } else if token.eq_ignore_ascii_case("tel") {
            Scheme::Tel
        } else {
            Scheme::Other(token.to_ascii_lowercase())
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host, either a domain name or an IP address.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub enum Host {
    Domain(String),
    Ip(IpAddr),
}

/// Domains hash case-folded to stay consistent with equality.
impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Host::Domain(domain) => {
                state.write_u8(0);
                domain.to_ascii_lowercase().hash(state);
            }
            Host::Ip(ip) => {
                state.write_u8(1);
                ip.hash(state);
            }
        }
    }
}

impl Host {
    pub fn is_empty(&self) -> bool {
        matches!(self, Host::Domain(d) if d.is_empty())
    }

    pub fn from_token(token: &str) -> Self {
        match token.parse::<IpAddr>() {
            Ok(ip) => Host::Ip(ip),
            Err(_) => Host::Domain(token.to_string()),
        }
    }
}

impl Default for Host {
    fn default() -> Self {
        Host::Domain(String::new())
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Host::Domain(a), Host::Domain(b)) => a.eq_ignore_ascii_case(b),
            (Host::Ip(a), Host::Ip(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Domain(domain) => f.write_str(domain),
            // IPv6 references are always bracketed on the wire.
            Host::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]"),
            Host::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

/// A host with an optional port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HostPort {
    pub host: Host,
    pub port: Option<u16>,
}

impl HostPort {
    pub fn new(host: Host, port: Option<u16>) -> Self {
        Self { host, port }
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self.host, Host::Ip(IpAddr::V6(_)))
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

impl FromStr for HostPort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut scanner = sipkit_util::Scanner::new(s.as_bytes());
        parser::parse_host_port(&mut scanner)
    }
}

/// A SIP(S) URI, RFC 3261 §19.1.
#[derive(Debug, Clone, Eq, Default, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host_port: HostPort,
    /// Ordered `;name=value` URI parameters.
    pub params: Params,
    /// Ordered `?name=value` URI headers.
    pub headers: Params,
}

impl Uri {
    pub fn new(scheme: Scheme, user: Option<&str>, host_port: HostPort) -> Self {
        Self {
            scheme,
            user: user.map(str::to_string),
            password: None,
            host_port,
            params: Params::new(),
            headers: Params::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.host_port.host.is_empty() && !matches!(&self.scheme, Scheme::Other(s) if s.is_empty())
    }

    /// The `transport=` URI parameter, if present.
    pub fn transport_param(&self) -> Option<&str> {
        self.params.get_value("transport")
    }

    pub fn maddr_param(&self) -> Option<&str> {
        self.params.get_value("maddr")
    }

    pub fn lr_param(&self) -> bool {
        self.params.contains("lr")
    }
}

impl PartialEq for Uri {
    fn eq(&self, other: &Self) -> bool {
        if self.scheme != other.scheme
            || self.user != other.user
            || self.host_port != other.host_port
        {
            return false;
        }

        // The compared set must agree on presence and (case-folded) value;
        // any other parameter is significant only when both carry it.
        for name in COMPARED_PARAMS {
            match (self.params.get(name), other.params.get(name)) {
                (None, None) => {}
                (Some(a), Some(b)) => {
                    let matches = match (a, b) {
                        (None, None) => true,
                        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                        _ => false,
                    };
                    if !matches {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        for param in self.params.iter() {
            if COMPARED_PARAMS.iter().any(|n| param.name.eq_ignore_ascii_case(n)) {
                continue;
            }
            if let Some(theirs) = other.params.get(&param.name) {
                let matches = match (param.value.as_deref(), theirs) {
                    (None, None) => true,
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                    _ => false,
                };
                if !matches {
                    return false;
                }
            }
        }
        true
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{user}")?;
            if let Some(password) = &self.password {
                write!(f, ":{password}")?;
            }
            write!(f, "@")?;
        }
        write!(f, "{}", self.host_port)?;
        write!(f, "{}", self.params)?;
        let mut sep = '?';
        for header in self.headers.iter() {
            write!(f, "{sep}{header}")?;
            sep = '&';
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut scanner = sipkit_util::Scanner::new(s.as_bytes());
        parser::parse_uri(&mut scanner)
    }
}

/// A `(display-name, URI)` pair as it appears in From, To, Contact and
/// Route headers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NameAddr {
    pub display: Option<String>,
    pub uri: Uri,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        Self { display: None, uri }
    }

    pub fn with_display(display: &str, uri: Uri) -> Self {
        Self {
            display: Some(display.to_string()),
            uri,
        }
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display {
            Some(display) => write!(f, "{display} <{}>", self.uri),
            None => write!(f, "<{}>", self.uri),
        }
    }
}

impl FromStr for NameAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut scanner = sipkit_util::Scanner::new(s.as_bytes());
        parser::parse_name_addr(&mut scanner)
    }
}
