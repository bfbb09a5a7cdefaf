//! INVITE client transaction, RFC 3261 §17.1.1 + RFC 6026.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::headers::{CSeq, Header, Headers, MaxForwards};
use crate::message::{Request, Response, SipMethod};
use crate::transaction::{
    detach, impl_tsx_handle, snapshot::TsxKind, ClientTsx, Role, State, Termination, TimerKind,
    Timings, TransactionLayer, TransactionMessage, TsxCore, TsxKey, TsxShared, TsxSnapshot,
};
use crate::transport::{Encode, IncomingResponse, OutgoingRequest, TargetInfo, Transport};

type ResponseRx = mpsc::UnboundedReceiver<IncomingResponse>;

/// An INVITE client transaction.
///
/// States: Calling, Proceeding, Completed (non-2xx final, ACK owned
/// here), Accepted (2xx retransmission window, RFC 6026), Terminated.
#[derive(Clone, Debug)]
pub struct InviteClientTransaction {
    pub(crate) core: TsxCore,
    responses: Arc<Mutex<Option<ResponseRx>>>,
}

impl_tsx_handle!(InviteClientTransaction, TsxKind::InviteClient);

impl InviteClientTransaction {
    /// Sends the INVITE and runs the transaction.
    ///
    /// Blocks until the request bytes are handed to the socket; the
    /// transaction starts in Calling with timers A (unreliable only) and
    /// B armed.
    pub async fn start(
        request: OutgoingRequest,
        timings: Timings,
        layer: Weak<TransactionLayer>,
    ) -> Result<Self> {
        if request.request.method() != &SipMethod::Invite {
            return Err(Error::MethodNotAllowed(request.request.method().to_string()));
        }
        let key = TsxKey::for_outgoing(&request)
            .ok_or_else(|| Error::InvalidMessage("request lacks a Via branch or CSeq".into()))?;

        let encoded = request.encode()?;
        let shared = TsxShared::new(
            key,
            request.request,
            request.info.transport,
            request.info.target,
            timings,
            State::Calling,
        );

        shared.send_buf(&encoded).await?;
        if !shared.reliable() {
            shared.arm(TimerKind::A, timings.t1);
        }
        shared.arm(TimerKind::B, timings.t1x64());

        Ok(Self::spawn(shared, encoded, layer))
    }

    /// Reinstalls a transaction from a snapshot. The original request is
    /// not re-sent; armed timers resume with their residual durations.
    pub fn restore(
        snapshot: TsxSnapshot,
        transport: Transport,
        layer: Weak<TransactionLayer>,
    ) -> Result<Self> {
        let (shared, encoded) = snapshot.reinstall(TsxKind::InviteClient, transport)?;
        Ok(Self::spawn(shared, encoded, layer))
    }

    fn spawn(shared: Arc<TsxShared>, encoded: Bytes, layer: Weak<TransactionLayer>) -> Self {
        let (sender, rx) = mpsc::unbounded_channel();
        let (tu, tu_rx) = mpsc::unbounded_channel();

        let handle = Self {
            core: TsxCore {
                shared: shared.clone(),
                sender,
            },
            responses: Arc::new(Mutex::new(Some(tu_rx))),
        };
        if let Some(layer) = layer.upgrade() {
            layer.add_client_tsx(ClientTsx::Invite(handle.clone()));
        }

        let fsm = Fsm {
            shared,
            rx,
            tu,
            layer,
            encoded,
            ack: None,
        };
        tokio::spawn(fsm.run());
        handle
    }

    /// Takes the receiver observing every matched response, in arrival
    /// order and including 2xx retransmissions.
    pub fn responses(&self) -> Option<ResponseRx> {
        self.responses.lock().expect("Lock failed").take()
    }
}

struct Fsm {
    shared: Arc<TsxShared>,
    rx: mpsc::UnboundedReceiver<TransactionMessage>,
    tu: mpsc::UnboundedSender<IncomingResponse>,
    layer: Weak<TransactionLayer>,
    encoded: Bytes,
    /// ACK for a non-2xx final, cached for retransmission.
    ack: Option<Bytes>,
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
                    Some(TransactionMessage::Response(response)) => self.on_response(response).await,
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
        detach(&self.layer, Role::Uac, &self.shared.key);
        debug!("[{}] dropped", self.shared.key);
    }

    async fn on_response(&mut self, response: IncomingResponse) {
        let code = response.code();
        let state = self.shared.state();
        self.shared.set_last_response(&response.response);

        match state {
            State::Calling | State::Proceeding if code.is_provisional() => {
                self.shared.cancel(TimerKind::A);
                self.shared.set_state(State::Proceeding);
                self.deliver(response);
            }
            State::Calling | State::Proceeding if code.is_success() => {
                self.shared.cancel(TimerKind::A);
                self.shared.cancel(TimerKind::B);
                self.shared.set_state(State::Accepted);
                self.shared.arm(TimerKind::M, self.shared.timings.t1x64());
                self.deliver(response);
            }
            State::Calling | State::Proceeding => {
                self.shared.cancel(TimerKind::A);
                self.shared.cancel(TimerKind::B);
                self.shared.set_state(State::Completed);
                if self.send_ack(&response.response).await.is_err() {
                    self.deliver(response);
                    self.terminate_with(Termination::TransportErr);
                    return;
                }
                let linger = self.shared.timings.timer_d(self.shared.reliable());
                if linger.is_zero() {
                    self.deliver(response);
                    self.terminate_with(Termination::Normal);
                    return;
                }
                self.shared.arm(TimerKind::D, linger);
                self.deliver(response);
            }
            // A retransmitted non-2xx final re-triggers the ACK but never
            // reaches the TU again.
            State::Completed if code.is_final() && !code.is_success() => {
                if self.resend_ack().await.is_err() {
                    self.terminate_with(Termination::TransportErr);
                }
            }
            // Every 2xx in Accepted goes up, retransmissions included.
            State::Accepted if code.is_success() => self.deliver(response),
            _ => trace!("[{}] {code} ignored in {state:?}", self.shared.key),
        }
    }

    async fn on_timer(&mut self, kind: TimerKind, fired_after: Duration) {
        let state = self.shared.state();

        match (state, kind) {
            (State::Calling, TimerKind::A) => {
                match self.shared.send_buf(&self.encoded).await {
                    Ok(_) => {
                        self.shared.add_retransmit();
                        self.shared.arm(TimerKind::A, fired_after * 2);
                    }
                    Err(err) if err.is_temporary() => {
                        debug!("[{}] retransmission failed: {err}", self.shared.key);
                        self.shared.arm(TimerKind::A, fired_after * 2);
                    }
                    Err(_) => self.terminate_with(Termination::TransportErr),
                }
            }
            (State::Calling | State::Proceeding, TimerKind::B) => {
                self.terminate_with(Termination::TimerB)
            }
            (State::Completed, TimerKind::D) => self.terminate_with(Termination::Normal),
            (State::Accepted, TimerKind::M) => self.terminate_with(Termination::Normal),
            _ => trace!("[{}] stale {kind:?} in {state:?}", self.shared.key),
        }
    }

    /// Builds the ACK for a non-2xx final: the INVITE's top Via and
    /// request URI, the response's To (tag included), CSeq renumbered to
    /// ACK with the INVITE's sequence.
    fn build_ack(&self, response: &Response) -> Result<Request> {
        let invite = &self.shared.request;
        let via = invite
            .headers
            .via()
            .ok_or_else(|| Error::InvalidMessage("INVITE lost its Via".into()))?;
        let to = response.headers.to().or_else(|| invite.headers.to());
        let cseq = invite
            .headers
            .cseq()
            .ok_or_else(|| Error::InvalidMessage("INVITE lost its CSeq".into()))?;

        let mut headers = Headers::with_capacity(6);
        headers.push(Header::Via(via.clone()));
        if let Some(from) = invite.headers.from_header() {
            headers.push(Header::From(from.clone()));
        }
        if let Some(to) = to {
            headers.push(Header::To(to.clone()));
        }
        if let Some(call_id) = invite.headers.call_id() {
            headers.push(Header::CallId(call_id.clone()));
        }
        headers.push(Header::CSeq(CSeq::new(cseq.seq, SipMethod::Ack)));
        headers.push(Header::MaxForwards(MaxForwards::new(70)));

        Ok(Request::with_headers(
            SipMethod::Ack,
            invite.uri().clone(),
            headers,
        ))
    }

    async fn send_ack(&mut self, response: &Response) -> Result<()> {
        let ack = self.build_ack(response)?;
        let outgoing = OutgoingRequest::new(
            ack,
            TargetInfo {
                target: self.shared.target,
                transport: self.shared.transport.clone(),
            },
        );
        let encoded = outgoing.encode()?;
        self.ack = Some(encoded.clone());
        self.shared.send_buf(&encoded).await.map(|_| ())
    }

    /// Re-sends the cached ACK byte-for-byte; a restored transaction
    /// rebuilds it from the stored final response first.
    async fn resend_ack(&mut self) -> Result<()> {
        if self.ack.is_none() {
            let response = self
                .shared
                .last_response()
                .ok_or_else(|| Error::InvalidMessage("no final response to acknowledge".into()))?;
            return self.send_ack(&response).await;
        }
        let ack = self.ack.clone().expect("checked above");
        self.shared.send_buf(&ack).await.map(|_| ())
    }

    fn deliver(&self, response: IncomingResponse) {
        // The TU may have dropped its receiver; that is not an error.
        let _ = self.tu.send(response);
    }

    fn terminate_with(&mut self, reason: Termination) {
        self.shared.set_termination(reason);
        self.shared.cancel_all_timers();
        self.shared.set_state(State::Terminated);
    }
}
