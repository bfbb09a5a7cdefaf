use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipkit_util::Scanner;

use crate::error::{Error, Result};
use crate::headers::SipHeaderParse;
use crate::message::{NameAddr, Params};
use crate::parser;

/// The `Route` SIP header.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Route {
    pub addr: NameAddr,
    pub params: Params,
}

impl Route {
    pub fn new(addr: NameAddr) -> Self {
        Self {
            addr,
            params: Params::new(),
        }
    }

    /// `true` when the hop is a loose router.
    pub fn is_loose(&self) -> bool {
        self.addr.uri.lr_param()
    }
}

impl SipHeaderParse for Route {
    const NAME: &'static str = "Route";

    fn parse(scanner: &mut Scanner) -> Result<Self> {
        let addr = parser::parse_name_addr(scanner)?;
        let params = parser::parse_header_params(scanner)?;

        Ok(Self { addr, params })
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.addr, self.params)
    }
}

impl FromStr for Route {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&mut Scanner::new(s.as_bytes()))
    }
}
