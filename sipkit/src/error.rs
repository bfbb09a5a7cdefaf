use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error raised by the wire parser, carrying the source position.
#[derive(Debug, PartialEq, Eq)]
pub struct SipParseError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for SipParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at line {} column {}", self.message, self.line, self.col)
    }
}

impl std::error::Error for SipParseError {}

impl SipParseError {
    pub fn new<T>(s: T) -> Self
    where
        T: AsRef<str>,
    {
        Self {
            message: s.as_ref().to_string(),
            line: 0,
            col: 0,
        }
    }
}

impl From<&str> for SipParseError {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SipParseError {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<sipkit_util::Error> for SipParseError {
    fn from(err: sipkit_util::Error) -> Self {
        SipParseError {
            message: format!("{:?}", err.kind),
            line: err.line,
            col: err.col,
        }
    }
}

impl From<sipkit_util::Error> for Error {
    fn from(err: sipkit_util::Error) -> Self {
        Self::Parse(err.into())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::Parse(SipParseError::new(format!("invalid utf-8: {err}")))
    }
}

impl From<std::fmt::Error> for Error {
    fn from(value: std::fmt::Error) -> Self {
        Self::Fmt(value)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed wire input. The message is rejected, the connection may
    /// remain open.
    #[error(transparent)]
    Parse(#[from] SipParseError),

    /// A caller-supplied value violated a precondition. Not retryable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The message failed its validity check.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("missing required '{0}' header")]
    MissingRequiredHeader(&'static str),

    /// The method is not acceptable for the target transaction kind, e.g.
    /// ACK or INVITE handed to a non-INVITE client transaction.
    #[error("method '{0}' not allowed here")]
    MethodNotAllowed(String),

    /// Sentinel returned once by `close` and by every send thereafter.
    #[error("transport closed")]
    TransportClosed,

    /// A temporary lower-level I/O failure (e.g. deadline exceeded). Counts
    /// as a retransmission failure and may escalate to a timer B/F timeout.
    #[error("temporary transport failure: {0}")]
    TransportTemporary(#[source] std::io::Error),

    /// A handler or FSM entry action panicked.
    #[error("panic: {0}")]
    Panic(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("channel closed")]
    ChannelClosed,

    #[error("format error")]
    Fmt(std::fmt::Error),
}

impl Error {
    /// `true` for failures that do not terminate a transaction by
    /// themselves.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Error::TransportTemporary(_))
    }
}
