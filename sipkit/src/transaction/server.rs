//! Non-INVITE server transaction, RFC 3261 §17.2.2.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::message::{Response, ResponseOptions, SipMethod, StatusCode};
use crate::transaction::{
    detach, impl_tsx_handle, snapshot::TsxKind, Role, ServerTsx, State, Termination, TimerKind,
    Timings, TransactionLayer, TransactionMessage, TsxCore, TsxKey, TsxShared, TsxSnapshot,
};
use crate::transport::{Encode, IncomingRequest, OutgoingResponse, TargetInfo, Transport};

/// A non-INVITE server transaction.
///
/// States: Trying, Proceeding, Completed, Terminated. Retransmitted
/// requests re-trigger the last response; timer J bounds the completed
/// state on unreliable transports.
#[derive(Clone, Debug)]
pub struct ServerTransaction {
    pub(crate) core: TsxCore,
}

impl_tsx_handle!(ServerTransaction, TsxKind::Server);

impl ServerTransaction {
    /// Adopts a received non-INVITE request; the transaction starts in
    /// Trying.
    pub fn start(
        request: &IncomingRequest,
        timings: Timings,
        layer: Weak<TransactionLayer>,
    ) -> Result<Self> {
        match request.method() {
            SipMethod::Invite | SipMethod::Ack => {
                return Err(Error::MethodNotAllowed(request.method().to_string()));
            }
            _ => {}
        }
        let key = TsxKey::for_request(request)
            .ok_or_else(|| Error::InvalidMessage("request lacks an RFC 3261 branch".into()))?;

        let shared = TsxShared::new(
            key,
            request.request.clone(),
            request.info.transport.clone(),
            request.source(),
            timings,
            State::Trying,
        );

        Ok(Self::spawn(shared, layer))
    }

    /// Reinstalls a transaction from a snapshot; nothing is re-sent.
    pub fn restore(
        snapshot: TsxSnapshot,
        transport: Transport,
        layer: Weak<TransactionLayer>,
    ) -> Result<Self> {
        let (shared, _) = snapshot.reinstall(TsxKind::Server, transport)?;
        Ok(Self::spawn(shared, layer))
    }

    fn spawn(shared: Arc<TsxShared>, layer: Weak<TransactionLayer>) -> Self {
        let (sender, rx) = mpsc::unbounded_channel();

        let handle = Self {
            core: TsxCore {
                shared: shared.clone(),
                sender,
            },
        };
        if let Some(layer) = layer.upgrade() {
            layer.add_server_tsx(ServerTsx::NonInvite(handle.clone()));
        }

        let last_encoded = shared.last_response().and_then(|response| {
            let outgoing = OutgoingResponse::new(
                response,
                TargetInfo {
                    target: shared.target,
                    transport: shared.transport.clone(),
                },
            );
            outgoing.encode().ok()
        });

        let fsm = Fsm {
            shared,
            rx,
            layer,
            last_encoded,
        };
        tokio::spawn(fsm.run());
        handle
    }

    /// Sends a response with the given code, built from the original
    /// request. Final responses get a fresh To tag when the request
    /// carried none.
    pub fn respond(&self, code: StatusCode) -> Result<()> {
        let response = self.core.shared.request.new_response(
            code,
            ResponseOptions {
                local_tag: Some(crate::generate_tag()),
                ..Default::default()
            },
        );
        self.respond_response(response)
    }

    /// Sends a TU-built response through the transaction.
    pub fn respond_response(&self, response: Response) -> Result<()> {
        let outgoing = OutgoingResponse::new(
            response,
            TargetInfo {
                target: self.core.shared.target,
                transport: self.core.shared.transport.clone(),
            },
        );
        self.core
            .sender
            .send(TransactionMessage::Respond(outgoing))
            .map_err(|_| Error::ChannelClosed)
    }
}

struct Fsm {
    shared: Arc<TsxShared>,
    rx: mpsc::UnboundedReceiver<TransactionMessage>,
    layer: Weak<TransactionLayer>,
    last_encoded: Option<Bytes>,
}

impl Fsm {
    async fn run(mut self) {
        loop {
            if self.shared.state() == State::Terminated {
                break;
            }
            let deadline = self.shared.timers.lock().expect("Lock failed").next_deadline();
            let sleep_to = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(TransactionMessage::Request(request)) => self.on_request(request).await,
                    Some(TransactionMessage::Respond(response)) => self.on_respond(response).await,
                    Some(TransactionMessage::Terminate) | None => {
                        self.terminate_with(Termination::Terminate);
                    }
                    Some(_) => {}
                },
                _ = time::sleep_until(sleep_to), if deadline.is_some() => {
                    let due = {
                        let mut timers = self.shared.timers.lock().expect("Lock failed");
                        timers.take_due(Instant::now())
                    };
                    for (kind, _) in due {
                        self.on_timer(kind);
                    }
                }
            }
        }
        self.shared.cancel_all_timers();
        detach(&self.layer, Role::Uas, &self.shared.key);
        debug!("[{}] dropped", self.shared.key);
    }

    async fn on_request(&mut self, _request: IncomingRequest) {
        match self.shared.state() {
            // No response yet; the retransmission is absorbed.
            State::Trying => trace!("[{}] retransmission absorbed in Trying", self.shared.key),
            State::Proceeding | State::Completed => {
                if self.resend_last().await.is_err() {
                    self.terminate_with(Termination::TransportErr);
                }
            }
            state => trace!("[{}] retransmission ignored in {state:?}", self.shared.key),
        }
    }

    async fn on_respond(&mut self, response: OutgoingResponse) {
        let code = response.code();
        let state = self.shared.state();

        match state {
            State::Trying | State::Proceeding if code.is_provisional() => {
                if self.send_response(response).await.is_err() {
                    self.terminate_with(Termination::TransportErr);
                    return;
                }
                self.shared.set_state(State::Proceeding);
            }
            State::Trying | State::Proceeding if code.is_final() => {
                if self.send_response(response).await.is_err() {
                    self.terminate_with(Termination::TransportErr);
                    return;
                }
                self.shared.set_state(State::Completed);
                let linger = self.shared.timings.timer_j(self.shared.reliable());
                if linger.is_zero() {
                    self.terminate_with(Termination::Normal);
                    return;
                }
                self.shared.arm(TimerKind::J, linger);
            }
            _ => trace!("[{}] response {code} ignored in {state:?}", self.shared.key),
        }
    }

    fn on_timer(&mut self, kind: TimerKind) {
        match (self.shared.state(), kind) {
            (State::Completed, TimerKind::J) => self.terminate_with(Termination::Normal),
            (state, kind) => trace!("[{}] stale {kind:?} in {state:?}", self.shared.key),
        }
    }

    async fn send_response(&mut self, response: OutgoingResponse) -> Result<()> {
        let encoded = response.encode()?;
        self.shared.send_buf(&encoded).await?;
        self.shared.set_last_response(&response.response);
        self.last_encoded = Some(encoded);
        Ok(())
    }

    async fn resend_last(&mut self) -> Result<()> {
        let Some(encoded) = self.last_encoded.clone() else {
            return Ok(());
        };
        self.shared.send_buf(&encoded).await.map(|_| ())
    }

    fn terminate_with(&mut self, reason: Termination) {
        self.shared.set_termination(reason);
        self.shared.cancel_all_timers();
        self.shared.set_state(State::Terminated);
    }
}
