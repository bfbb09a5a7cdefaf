//! Transaction keys, RFC 3261 §17.1.3 / §17.2.3.

use serde::{Deserialize, Serialize};

use crate::message::{HostPort, SipMethod};
use crate::transport::{IncomingRequest, IncomingResponse, OutgoingRequest};

/// The RFC 3261 branch magic cookie.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// Identifies a transaction: the top Via branch plus the CSeq method,
/// with ACK collapsing into the INVITE it acknowledges. Server keys also
/// carry the Via sent-by to disambiguate branches minted by distinct
/// clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TsxKey {
    Client(ClientKey),
    Server(ServerKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientKey {
    branch: String,
    method: SipMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerKey {
    branch: String,
    sent_by: HostPort,
    method: SipMethod,
}

/// ACK belongs to the INVITE transaction it acknowledges.
fn collapse_ack(method: &SipMethod) -> SipMethod {
    if method == &SipMethod::Ack {
        SipMethod::Invite
    } else {
        method.clone()
    }
}

impl TsxKey {
    pub fn client(branch: &str, method: &SipMethod) -> Self {
        TsxKey::Client(ClientKey {
            branch: branch.to_string(),
            method: collapse_ack(method),
        })
    }

    pub fn server(branch: &str, sent_by: &HostPort, method: &SipMethod) -> Self {
        TsxKey::Server(ServerKey {
            branch: branch.to_string(),
            sent_by: sent_by.clone(),
            method: collapse_ack(method),
        })
    }

    /// Key for an outbound request's client transaction.
    pub fn for_outgoing(request: &OutgoingRequest) -> Option<Self> {
        let via = request.request.headers.via()?;
        let cseq = request.request.headers.cseq()?;

        Some(Self::client(via.branch()?, &cseq.method))
    }

    /// Key a received response is matched under.
    pub fn for_response(response: &IncomingResponse) -> Option<Self> {
        let mandatory = &response.info.mandatory;

        Some(Self::client(mandatory.via.branch()?, &mandatory.cseq.method))
    }

    /// Key a received request is matched under.
    pub fn for_request(request: &IncomingRequest) -> Option<Self> {
        let mandatory = &request.info.mandatory;
        let branch = mandatory.via.branch()?;
        if !branch.starts_with(BRANCH_MAGIC_COOKIE) {
            return None;
        }

        Some(Self::server(branch, &mandatory.via.sent_by, request.method()))
    }

    pub fn branch(&self) -> &str {
        match self {
            TsxKey::Client(key) => &key.branch,
            TsxKey::Server(key) => &key.branch,
        }
    }

    pub fn method(&self) -> &SipMethod {
        match self {
            TsxKey::Client(key) => &key.method,
            TsxKey::Server(key) => &key.method,
        }
    }
}

impl std::fmt::Display for TsxKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TsxKey::Client(key) => write!(f, "uac:{}:{}", key.branch, key.method),
            TsxKey::Server(key) => write!(f, "uas:{}:{}:{}", key.branch, key.sent_by, key.method),
        }
    }
}
