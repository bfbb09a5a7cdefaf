use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipkit_util::{util::is_space, util::is_token, Scanner};

use crate::error::{Error, Result};
use crate::headers::SipHeaderParse;
use crate::message::SipMethod;

/// The `CSeq` SIP header.
///
/// Orders requests within a dialog and ties responses to requests.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CSeq {
    pub seq: u32,
    pub method: SipMethod,
}

impl CSeq {
    pub fn new(seq: u32, method: SipMethod) -> Self {
        Self { seq, method }
    }
}

impl SipHeaderParse for CSeq {
    const NAME: &'static str = "CSeq";

    fn parse(scanner: &mut Scanner) -> Result<Self> {
        let seq = scanner.read_num()?;
        scanner.read_while(is_space);
        let method = scanner.read_str_while(is_token)?;

        Ok(Self {
            seq,
            method: SipMethod::from_token(method),
        })
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

impl FromStr for CSeq {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(&mut Scanner::new(s.as_bytes()))
    }
}
