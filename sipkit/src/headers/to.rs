use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipkit_util::Scanner;

use crate::error::{Error, Result};
use crate::headers::{SipHeaderParse, TAG_PARAM};
use crate::message::{NameAddr, Params};
use crate::parser;

/// The `To` SIP header.
///
/// Identifies the logical recipient of the request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct To {
    pub addr: NameAddr,
    pub tag: Option<String>,
    pub params: Params,
}

impl To {
    pub fn new(addr: NameAddr) -> Self {
        Self {
            addr,
            tag: None,
            params: Params::new(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn set_tag(&mut self, tag: &str) {
        self.tag = Some(tag.to_string());
    }
}

impl SipHeaderParse for To {
    const NAME: &'static str = "To";
    const SHORT_NAME: Option<&'static str> = Some("t");

    fn parse(scanner: &mut Scanner) -> Result<Self> {
        let addr = parser::parse_name_addr(scanner)?;
        let mut tag = None;
        let mut params = Params::new();

        for param in parser::parse_header_params(scanner)?.iter() {
            if param.name.eq_ignore_ascii_case(TAG_PARAM) {
                tag = param.value.clone();
            } else {
                params.push(&param.name, param.value.as_deref());
            }
        }

        Ok(Self { addr, tag, params })
    }
}

impl fmt::Display for To {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={tag}")?;
        }
        write!(f, "{}", self.params)
    }
}

impl FromStr for To {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&mut Scanner::new(s.as_bytes()))
    }
}
