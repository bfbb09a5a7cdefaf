use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipkit_util::{util::is_token, Scanner};

use crate::error::{Error, Result};
use crate::headers::SipHeaderParse;
use crate::message::Params;
use crate::parser;

/// The `Content-Type` SIP header.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentType {
    pub mtype: String,
    pub subtype: String,
    pub params: Params,
}

impl ContentType {
    pub fn new(mtype: &str, subtype: &str) -> Self {
        Self {
            mtype: mtype.to_string(),
            subtype: subtype.to_string(),
            params: Params::new(),
        }
    }
}

impl SipHeaderParse for ContentType {
    const NAME: &'static str = "Content-Type";
    const SHORT_NAME: Option<&'static str> = Some("c");

    fn parse(scanner: &mut Scanner) -> Result<Self> {
        let mtype = scanner.read_str_while(is_token)?.to_string();
        scanner.must_read(b'/')?;
        let subtype = scanner.read_str_while(is_token)?.to_string();
        let params = parser::parse_header_params(scanner)?;

        Ok(Self { mtype, subtype, params })
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.mtype, self.subtype, self.params)
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&mut Scanner::new(s.as_bytes()))
    }
}
