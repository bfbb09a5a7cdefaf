//! Serializable transaction projections.
//!
//! A snapshot carries everything needed to resume a transaction in
//! another process: identity, state, the originating request, the last
//! response, the send target and the armed timers with their schedule
//! points. Restoring never re-sends the original request; timers resume
//! with wall-clock residuals (minor cross-process clock jitter is
//! acceptable).

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::{Request, Response, TransportType};
use crate::transaction::{
    ClientTransaction, ClientTsx, InviteClientTransaction, InviteServerTransaction,
    ServerTransaction, ServerTsx, State, TimerSnapshot, TimerTable, Timings, TransactionLayer,
    TsxKey, TsxShared,
};
use crate::transport::{Encode, OutgoingRequest, TargetInfo, Transport};

/// Which of the four state machines a snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TsxKind {
    InviteClient,
    Client,
    InviteServer,
    Server,
}

/// The serializable projection of one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsxSnapshot {
    pub kind: TsxKind,
    pub state: State,
    pub key: TsxKey,
    pub request: Request,
    pub last_response: Option<Response>,
    pub target: SocketAddr,
    pub protocol: TransportType,
    pub timings: Timings,
    pub timers: Vec<TimerSnapshot>,
}

impl TsxSnapshot {
    pub(crate) fn capture(kind: TsxKind, shared: &TsxShared) -> Self {
        Self {
            kind,
            state: shared.state(),
            key: shared.key.clone(),
            request: shared.request.clone(),
            last_response: shared.last_response(),
            target: shared.target,
            protocol: shared.transport.protocol(),
            timings: shared.timings,
            timers: shared.timers.lock().expect("Lock failed").snapshot(),
        }
    }

    /// Rebuilds the shared half of a transaction plus the encoded
    /// original request (clients retransmit it; servers ignore it).
    pub(crate) fn reinstall(
        self,
        expected: TsxKind,
        transport: Transport,
    ) -> Result<(Arc<TsxShared>, Bytes)> {
        if self.kind != expected {
            return Err(Error::InvalidArgument(format!(
                "snapshot holds a {:?} transaction, not {expected:?}",
                self.kind
            )));
        }
        if transport.protocol() != self.protocol {
            return Err(Error::InvalidArgument(format!(
                "snapshot was taken over {}, got {}",
                self.protocol,
                transport.protocol()
            )));
        }

        let shared = TsxShared::new(
            self.key,
            self.request.clone(),
            transport,
            self.target,
            self.timings,
            self.state,
        );
        if let Some(response) = &self.last_response {
            shared.set_last_response(response);
        }
        {
            let mut timers = shared.timers.lock().expect("Lock failed");
            *timers = TimerTable::restore(&self.timers);
        }

        let encoded = OutgoingRequest::new(
            self.request,
            TargetInfo {
                target: shared.target,
                transport: shared.transport.clone(),
            },
        )
        .encode()?;

        Ok((shared, encoded))
    }

    /// Reinstalls whichever state machine the snapshot belongs to.
    pub fn restore(
        self,
        transport: Transport,
        layer: Weak<TransactionLayer>,
    ) -> Result<RestoredTsx> {
        match self.kind {
            TsxKind::InviteClient => InviteClientTransaction::restore(self, transport, layer)
                .map(|tsx| RestoredTsx::Client(ClientTsx::Invite(tsx))),
            TsxKind::Client => ClientTransaction::restore(self, transport, layer)
                .map(|tsx| RestoredTsx::Client(ClientTsx::NonInvite(tsx))),
            TsxKind::InviteServer => InviteServerTransaction::restore(self, transport, layer)
                .map(|tsx| RestoredTsx::Server(ServerTsx::Invite(tsx))),
            TsxKind::Server => ServerTransaction::restore(self, transport, layer)
                .map(|tsx| RestoredTsx::Server(ServerTsx::NonInvite(tsx))),
        }
    }
}

/// The handle a restored snapshot yields.
#[derive(Clone)]
pub enum RestoredTsx {
    Client(ClientTsx),
    Server(ServerTsx),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TimerKind;

    #[test]
    fn test_snapshot_json_round_trip() {
        let request: Request = {
            let raw = "INVITE sip:bob@biloxi.com SIP/2.0\r\n\
                Via: SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds\r\n\
                From: <sip:alice@atlanta.com>;tag=88\r\n\
                To: <sip:bob@biloxi.com>\r\n\
                Call-ID: a84b4c76e66710\r\n\
                CSeq: 1 INVITE\r\n\
                Max-Forwards: 70\r\n\
                Content-Length: 0\r\n\r\n";
            crate::parser::Parser::parse(raw.as_bytes())
                .unwrap()
                .request()
                .unwrap()
                .clone()
        };

        let snapshot = TsxSnapshot {
            kind: TsxKind::InviteClient,
            state: State::Calling,
            key: TsxKey::client("z9hG4bK776asdhds", &crate::message::SipMethod::Invite),
            request,
            last_response: None,
            target: "55.55.55.55:5060".parse().unwrap(),
            protocol: TransportType::Udp,
            timings: Timings::default(),
            timers: vec![
                TimerSnapshot {
                    kind: TimerKind::A,
                    scheduled_at: 1_700_000_000_000,
                    duration: 500,
                },
                TimerSnapshot {
                    kind: TimerKind::B,
                    scheduled_at: 1_700_000_000_000,
                    duration: 32_000,
                },
            ],
        };

        let json = serde_json::to_string_pretty(&snapshot).unwrap();
        assert!(json.contains("\"scheduled_at\""));
        assert!(json.contains("\"duration\""));

        let back: TsxSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
    }
}
