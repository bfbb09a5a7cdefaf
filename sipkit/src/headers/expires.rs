use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipkit_util::Scanner;

use crate::error::{Error, Result};
use crate::headers::SipHeaderParse;

/// The `Expires` SIP header, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Expires(u32);

impl Expires {
    pub const fn new(seconds: u32) -> Self {
        Self(seconds)
    }

    pub const fn seconds(&self) -> u32 {
        self.0
    }
}

impl SipHeaderParse for Expires {
    const NAME: &'static str = "Expires";

    fn parse(scanner: &mut Scanner) -> Result<Self> {
        Ok(Self(scanner.read_num()?))
    }
}

impl fmt::Display for Expires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Expires {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&mut Scanner::new(s.as_bytes()))
    }
}
