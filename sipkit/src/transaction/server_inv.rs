//! INVITE server transaction, RFC 3261 §17.2.1 + RFC 6026.

use std::cmp;
use std::sync::{Arc, Mutex, Weak};
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

type RequestRx = mpsc::UnboundedReceiver<IncomingRequest>;

/// An INVITE server transaction.
///
/// States: Proceeding (auto-100 grace), Completed (non-2xx final,
/// retransmitting on timer G until the ACK), Confirmed (ACK absorption),
/// Accepted (2xx window, RFC 6026), Terminated.
#[derive(Clone, Debug)]
pub struct InviteServerTransaction {
    pub(crate) core: TsxCore,
    requests: Arc<Mutex<Option<RequestRx>>>,
}

impl_tsx_handle!(InviteServerTransaction, TsxKind::InviteServer);

impl InviteServerTransaction {
    /// Adopts a received INVITE. The transaction starts in Proceeding
    /// and emits 100 Trying itself unless the TU responds within the
    /// configured grace.
    pub fn start(
        request: &IncomingRequest,
        timings: Timings,
        layer: Weak<TransactionLayer>,
    ) -> Result<Self> {
        if request.method() != &SipMethod::Invite {
            return Err(Error::MethodNotAllowed(request.method().to_string()));
        }
        let key = TsxKey::for_request(request)
            .ok_or_else(|| Error::InvalidMessage("request lacks an RFC 3261 branch".into()))?;

        let shared = TsxShared::new(
            key,
            request.request.clone(),
            request.info.transport.clone(),
            request.source(),
            timings,
            State::Proceeding,
        );
        shared.arm(TimerKind::Trying100, timings.t100);

        Ok(Self::spawn(shared, layer))
    }

    /// Reinstalls a transaction from a snapshot; nothing is re-sent.
    pub fn restore(
        snapshot: TsxSnapshot,
        transport: Transport,
        layer: Weak<TransactionLayer>,
    ) -> Result<Self> {
        let (shared, _) = snapshot.reinstall(TsxKind::InviteServer, transport)?;
        Ok(Self::spawn(shared, layer))
    }

    fn spawn(shared: Arc<TsxShared>, layer: Weak<TransactionLayer>) -> Self {
        let (sender, rx) = mpsc::unbounded_channel();
        let (tu, tu_rx) = mpsc::unbounded_channel();

        let handle = Self {
            core: TsxCore {
                shared: shared.clone(),
                sender,
            },
            requests: Arc::new(Mutex::new(Some(tu_rx))),
        };
        if let Some(layer) = layer.upgrade() {
            layer.add_server_tsx(ServerTsx::Invite(handle.clone()));
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
            tu,
            layer,
            last_encoded,
        };
        tokio::spawn(fsm.run());
        handle
    }

    /// Sends a response with the given code through the transaction,
    /// built from the original INVITE. Final responses get a fresh To
    /// tag when the INVITE carried none.
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

    /// Takes the receiver observing the ACKs routed to the TU while the
    /// transaction sits in Accepted.
    pub fn requests(&self) -> Option<RequestRx> {
        self.requests.lock().expect("Lock failed").take()
    }
}

struct Fsm {
    shared: Arc<TsxShared>,
    rx: mpsc::UnboundedReceiver<TransactionMessage>,
    tu: mpsc::UnboundedSender<IncomingRequest>,
    layer: Weak<TransactionLayer>,
    /// Wire bytes of the last response, resent on retransmissions and
    /// timer G.
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
                    for (kind, fired_after) in due {
                        self.on_timer(kind, fired_after).await;
                    }
                }
            }
        }
        self.shared.cancel_all_timers();
        detach(&self.layer, Role::Uas, &self.shared.key);
        debug!("[{}] dropped", self.shared.key);
    }

    async fn on_request(&mut self, request: IncomingRequest) {
        let state = self.shared.state();

        match (request.method(), state) {
            (&SipMethod::Ack, State::Completed) => {
                self.shared.cancel(TimerKind::G);
                self.shared.cancel(TimerKind::H);
                self.shared.set_state(State::Confirmed);
                let linger = self.shared.timings.timer_i(self.shared.reliable());
                if linger.is_zero() {
                    self.terminate_with(Termination::Normal);
                    return;
                }
                self.shared.arm(TimerKind::I, linger);
            }
            // The ACK for a 2xx belongs to the TU, not the transaction.
            (&SipMethod::Ack, State::Accepted) => {
                let _ = self.tu.send(request);
            }
            (&SipMethod::Ack, _) => trace!("[{}] ACK absorbed in {state:?}", self.shared.key),
            // INVITE retransmissions re-trigger the last response.
            (_, State::Proceeding | State::Completed) => {
                if self.resend_last().await.is_err() {
                    self.terminate_with(Termination::TransportErr);
                }
            }
            _ => trace!("[{}] retransmission absorbed in {state:?}", self.shared.key),
        }
    }

    async fn on_respond(&mut self, response: OutgoingResponse) {
        let code = response.code();
        let state = self.shared.state();

        match state {
            State::Proceeding if code.is_provisional() => {
                self.shared.cancel(TimerKind::Trying100);
                if self.send_response(response).await.is_err() {
                    self.terminate_with(Termination::TransportErr);
                }
            }
            State::Proceeding if code.is_success() => {
                self.shared.cancel(TimerKind::Trying100);
                if self.send_response(response).await.is_err() {
                    self.terminate_with(Termination::TransportErr);
                    return;
                }
                self.shared.set_state(State::Accepted);
                self.shared.arm(TimerKind::L, self.shared.timings.t1x64());
            }
            State::Proceeding => {
                self.shared.cancel(TimerKind::Trying100);
                if self.send_response(response).await.is_err() {
                    self.terminate_with(Termination::TransportErr);
                    return;
                }
                self.shared.set_state(State::Completed);
                if !self.shared.reliable() {
                    self.shared.arm(TimerKind::G, self.shared.timings.t1);
                }
                self.shared.arm(TimerKind::H, self.shared.timings.t1x64());
            }
            // The TU retransmits its 2xx through the transaction while
            // Accepted.
            State::Accepted if code.is_success() => {
                if self.send_response(response).await.is_err() {
                    self.terminate_with(Termination::TransportErr);
                }
            }
            State::Completed if code.is_final() => {
                if self.resend_last().await.is_err() {
                    self.terminate_with(Termination::TransportErr);
                }
            }
            _ => trace!("[{}] response {code} ignored in {state:?}", self.shared.key),
        }
    }

    async fn on_timer(&mut self, kind: TimerKind, fired_after: Duration) {
        let state = self.shared.state();

        match (state, kind) {
            // The TU stayed quiet through the grace period; answer the
            // INVITE with 100 Trying ourselves.
            (State::Proceeding, TimerKind::Trying100) => {
                if self.last_encoded.is_none() {
                    let trying = self
                        .shared
                        .request
                        .new_response(StatusCode::TRYING, ResponseOptions::default());
                    let outgoing = OutgoingResponse::new(
                        trying,
                        TargetInfo {
                            target: self.shared.target,
                            transport: self.shared.transport.clone(),
                        },
                    );
                    if self.send_response(outgoing).await.is_err() {
                        self.terminate_with(Termination::TransportErr);
                    }
                }
            }
            (State::Completed, TimerKind::G) => {
                let next = cmp::min(fired_after * 2, self.shared.timings.t2);
                match self.resend_last().await {
                    Ok(()) => {
                        self.shared.add_retransmit();
                        self.shared.arm(TimerKind::G, next);
                    }
                    Err(err) if err.is_temporary() => {
                        debug!("[{}] retransmission failed: {err}", self.shared.key);
                        self.shared.arm(TimerKind::G, next);
                    }
                    Err(_) => self.terminate_with(Termination::TransportErr),
                }
            }
            (State::Completed, TimerKind::H) => self.terminate_with(Termination::TimerH),
            (State::Confirmed, TimerKind::I) => self.terminate_with(Termination::Normal),
            (State::Accepted, TimerKind::L) => self.terminate_with(Termination::Normal),
            _ => trace!("[{}] stale {kind:?} in {state:?}", self.shared.key),
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
            // Nothing sent yet (INVITE retransmitted inside the 100
            // grace); absorb.
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
