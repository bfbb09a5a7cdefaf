use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipkit_util::{util::is_space, util::is_token, Scanner};

use crate::error::{Error, Result, SipParseError};
use crate::headers::SipHeaderParse;
use crate::message::{Host, HostPort, Params, ProtocolInfo, TransportType};
use crate::parser;

const BRANCH_PARAM: &str = "branch";
const RECEIVED_PARAM: &str = "received";
const RPORT_PARAM: &str = "rport";
const MADDR_PARAM: &str = "maddr";
const TTL_PARAM: &str = "ttl";

/// The `Via` SIP header.
///
/// Indicates the path taken by the request so far and the path responses
/// should follow back.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Via {
    pub proto: ProtocolInfo,
    pub transport: TransportType,
    pub sent_by: HostPort,
    pub branch: Option<String>,
    pub received: Option<IpAddr>,
    /// `Some(port)` once rewritten; `rport_requested` remembers the bare
    /// `;rport` the sender put on the wire (RFC 3581).
    pub rport: Option<u16>,
    pub rport_requested: bool,
    pub maddr: Option<Host>,
    pub ttl: Option<u8>,
    /// Extension parameters, in wire order.
    pub params: Params,
}

impl Via {
    pub fn new(transport: TransportType, sent_by: HostPort, branch: Option<&str>) -> Self {
        Self {
            proto: ProtocolInfo::default(),
            transport,
            sent_by,
            branch: branch.map(str::to_string),
            received: None,
            rport: None,
            rport_requested: false,
            maddr: None,
            ttl: None,
            params: Params::new(),
        }
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn set_received(&mut self, received: IpAddr) {
        self.received = Some(received);
    }

    /// `true` when the sender asked for symmetric response routing.
    pub fn wants_rport(&self) -> bool {
        self.rport_requested && self.rport.is_none()
    }
}

impl SipHeaderParse for Via {
    const NAME: &'static str = "Via";
    const SHORT_NAME: Option<&'static str> = Some("v");

    /*
     * Via               =  ( "Via" / "v" ) HCOLON via-parm *(COMMA via-parm)
     * via-parm          =  sent-protocol LWS sent-by *( SEMI via-params )
     * sent-protocol     =  protocol-name SLASH protocol-version
     *                      SLASH transport
     * sent-by           =  host [ COLON port ]
     */
    fn parse(scanner: &mut Scanner) -> Result<Self> {
        let name = scanner.read_str_while(is_token)?.to_string();
        scanner.must_read(b'/')?;
        let version = scanner.read_str_while(|b| is_token(b) && b != b'/')?.to_string();
        scanner.must_read(b'/')?;
        let transport: TransportType = scanner.read_str_while(is_token)?.parse()?;

        scanner.read_while(is_space);
        let sent_by = parser::parse_host_port(scanner)?;

        let mut via = Via {
            proto: ProtocolInfo { name, version },
            transport,
            sent_by,
            ..Default::default()
        };

        for param in parser::parse_header_params(scanner)?.iter() {
            if param.name.eq_ignore_ascii_case(BRANCH_PARAM) {
                via.branch = param.value.clone();
            } else if param.name.eq_ignore_ascii_case(RECEIVED_PARAM) {
                via.received = param.value.as_deref().and_then(|v| v.parse().ok());
            } else if param.name.eq_ignore_ascii_case(RPORT_PARAM) {
                match param.value.as_deref() {
                    None | Some("") => via.rport_requested = true,
                    Some(value) => {
                        via.rport = Some(
                            value
                                .parse()
                                .map_err(|_| SipParseError::new("invalid rport value"))?,
                        );
                        via.rport_requested = true;
                    }
                }
            } else if param.name.eq_ignore_ascii_case(MADDR_PARAM) {
                via.maddr = param.value.as_deref().map(Host::from_token);
            } else if param.name.eq_ignore_ascii_case(TTL_PARAM) {
                via.ttl = param.value.as_deref().and_then(|v| v.parse().ok());
            } else {
                via.params.push(&param.name, param.value.as_deref());
            }
        }

        Ok(via)
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.proto, self.transport, self.sent_by)?;

        if let Some(rport) = self.rport {
            write!(f, ";rport={rport}")?;
        } else if self.rport_requested {
            write!(f, ";rport")?;
        }
        if let Some(received) = &self.received {
            write!(f, ";received={received}")?;
        }
        if let Some(ttl) = &self.ttl {
            write!(f, ";ttl={ttl}")?;
        }
        if let Some(maddr) = &self.maddr {
            write!(f, ";maddr={maddr}")?;
        }
        if let Some(branch) = &self.branch {
            write!(f, ";branch={branch}")?;
        }
        write!(f, "{}", self.params)
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&mut Scanner::new(s.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn test_parse() {
        let via: Via = "SIP/2.0/UDP bobspc.biloxi.com:5060;received=192.0.2.4"
            .parse()
            .unwrap();

        assert_eq!(via.transport, TransportType::Udp);
        assert_eq!(
            via.sent_by,
            HostPort {
                host: Host::Domain("bobspc.biloxi.com".into()),
                port: Some(5060)
            }
        );
        assert_eq!(via.received, Some("192.0.2.4".parse().unwrap()));

        let via: Via = "SIP/2.0/UDP 192.0.2.1:5060;received=192.0.2.207;branch=z9hG4bK77asjd"
            .parse()
            .unwrap();

        assert_eq!(
            via.sent_by.host,
            Host::Ip(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)))
        );
        assert_eq!(via.branch(), Some("z9hG4bK77asjd"));
    }

    #[test]
    fn test_bare_rport_round_trips() {
        let via: Via = "SIP/2.0/UDP client.example.com;rport;branch=z9hG4bK77"
            .parse()
            .unwrap();

        assert!(via.wants_rport());
        assert_eq!(
            via.to_string(),
            "SIP/2.0/UDP client.example.com;rport;branch=z9hG4bK77"
        );
    }

    #[test]
    fn test_extension_params_preserved_in_order() {
        let via: Via = "SIP/2.0/TCP proxy.example.com;x-a=1;x-b".parse().unwrap();
        assert_eq!(via.to_string(), "SIP/2.0/TCP proxy.example.com;x-a=1;x-b");
    }
}
