use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipkit_util::{util::is_newline, Scanner};

use crate::error::{Error, Result};
use crate::headers::SipHeaderParse;

/// The `Call-ID` SIP header.
///
/// Unique identifier grouping all messages of a call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl SipHeaderParse for CallId {
    const NAME: &'static str = "Call-ID";
    const SHORT_NAME: Option<&'static str> = Some("i");

    fn parse(scanner: &mut Scanner) -> Result<Self> {
        let id = scanner.read_str_while(|b| !is_newline(b))?;
        Ok(Self(id.trim().to_string()))
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CallId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&mut Scanner::new(s.as_bytes()))
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
