use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, SipParseError};

/// A SIP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SipMethod {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Subscribe,
    Notify,
    Refer,
    Info,
    Update,
    Prack,
    Publish,
    Message,
    /// An extension method, stored verbatim.
    Other(String),
}

impl SipMethod {
    pub fn as_str(&self) -> &str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Register => "REGISTER",
            SipMethod::Options => "OPTIONS",
            SipMethod::Subscribe => "SUBSCRIBE",
            SipMethod::Notify => "NOTIFY",
            SipMethod::Refer => "REFER",
            SipMethod::Info => "INFO",
            SipMethod::Update => "UPDATE",
            SipMethod::Prack => "PRACK",
            SipMethod::Publish => "PUBLISH",
            SipMethod::Message => "MESSAGE",
            SipMethod::Other(s) => s,
        }
    }

    pub fn from_token(token: &str) -> Self {
        match token {
            "INVITE" => SipMethod::Invite,
            "ACK" => SipMethod::Ack,
            "BYE" => SipMethod::Bye,
            "CANCEL" => SipMethod::Cancel,
            "REGISTER" => SipMethod::Register,
            "OPTIONS" => SipMethod::Options,
            "SUBSCRIBE" => SipMethod::Subscribe,
            "NOTIFY" => SipMethod::Notify,
            "REFER" => SipMethod::Refer,
            "INFO" => SipMethod::Info,
            "UPDATE" => SipMethod::Update,
            "PRACK" => SipMethod::Prack,
            "PUBLISH" => SipMethod::Publish,
            "MESSAGE" => SipMethod::Message,
            other => SipMethod::Other(other.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, SipMethod::Other(s) if s.is_empty())
    }
}

impl Default for SipMethod {
    fn default() -> Self {
        SipMethod::Options
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SipMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SipParseError::new("empty method").into());
        }
        Ok(SipMethod::from_token(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_methods_round_trip() {
        for m in ["INVITE", "ACK", "BYE", "CANCEL", "REGISTER", "OPTIONS"] {
            let method: SipMethod = m.parse().unwrap();
            assert_eq!(method.to_string(), m);
        }
    }

    #[test]
    fn test_extension_method_is_kept_verbatim() {
        let method: SipMethod = "FOOBAR".parse().unwrap();
        assert_eq!(method, SipMethod::Other("FOOBAR".into()));
        assert_eq!(method.to_string(), "FOOBAR");
    }
}
