use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipkit_util::{util::is_digit, util::is_space, Scanner};

use crate::error::{Error, Result};
use crate::headers::SipHeaderParse;

/// The `Timestamp` SIP header.
///
/// Values are kept as their wire text so rendering and equality stay
/// exact.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub time: String,
    pub delay: Option<String>,
}

impl Timestamp {
    pub fn new(time: &str) -> Self {
        Self {
            time: time.to_string(),
            delay: None,
        }
    }
}

fn is_number(b: u8) -> bool {
    is_digit(b) || b == b'.'
}

impl SipHeaderParse for Timestamp {
    const NAME: &'static str = "Timestamp";

    fn parse(scanner: &mut Scanner) -> Result<Self> {
        let time = scanner.read_str_while(is_number)?.to_string();
        scanner.read_while(is_space);
        let delay = scanner.read_str_while(is_number)?;
        let delay = (!delay.is_empty()).then(|| delay.to_string());

        Ok(Self { time, delay })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.time)?;
        if let Some(delay) = &self.delay {
            write!(f, " {delay}")?;
        }
        Ok(())
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&mut Scanner::new(s.as_bytes()))
    }
}
