use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipkit_util::Scanner;

use crate::error::{Error, Result};
use crate::headers::SipHeaderParse;

/// The `Max-Forwards` SIP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxForwards(u32);

impl MaxForwards {
    pub const fn new(hops: u32) -> Self {
        Self(hops)
    }

    pub const fn hops(&self) -> u32 {
        self.0
    }
}

impl Default for MaxForwards {
    fn default() -> Self {
        Self(70)
    }
}

impl SipHeaderParse for MaxForwards {
    const NAME: &'static str = "Max-Forwards";

    fn parse(scanner: &mut Scanner) -> Result<Self> {
        Ok(Self(scanner.read_num()?))
    }
}

impl fmt::Display for MaxForwards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MaxForwards {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&mut Scanner::new(s.as_bytes()))
    }
}
