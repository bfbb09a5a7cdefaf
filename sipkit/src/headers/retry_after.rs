use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipkit_util::Scanner;

use crate::error::{Error, Result};
use crate::headers::SipHeaderParse;
use crate::message::Params;
use crate::parser;

/// The `Retry-After` SIP header.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryAfter {
    pub seconds: u32,
    pub params: Params,
}

impl RetryAfter {
    pub fn new(seconds: u32) -> Self {
        Self {
            seconds,
            params: Params::new(),
        }
    }
}

impl SipHeaderParse for RetryAfter {
    const NAME: &'static str = "Retry-After";

    fn parse(scanner: &mut Scanner) -> Result<Self> {
        let seconds = scanner.read_num()?;
        let params = parser::parse_header_params(scanner)?;

        Ok(Self { seconds, params })
    }
}

impl fmt::Display for RetryAfter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.seconds, self.params)
    }
}

impl FromStr for RetryAfter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&mut Scanner::new(s.as_bytes()))
    }
}
