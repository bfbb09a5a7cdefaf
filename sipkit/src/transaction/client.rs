//! Non-INVITE client transaction, RFC 3261 §17.1.2.

use std::cmp;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::message::SipMethod;
use crate::transaction::{
    detach, impl_tsx_handle, snapshot::TsxKind, ClientTsx, Role, State, Termination, TimerKind,
    Timings, TransactionLayer, TransactionMessage, TsxCore, TsxKey, TsxShared, TsxSnapshot,
};
use crate::transport::{Encode, IncomingResponse, OutgoingRequest, Transport};

type ResponseRx = mpsc::UnboundedReceiver<IncomingResponse>;

/// A non-INVITE client transaction.
///
/// States: Trying, Proceeding, Completed, Terminated. Retransmissions
/// run on timer E (doubling, capped at T2), the overall timeout on
/// timer F, completed-state lingering on timer K.
#[derive(Clone, Debug)]
pub struct ClientTransaction {
    pub(crate) core: TsxCore,
    responses: Arc<Mutex<Option<ResponseRx>>>,
}

impl_tsx_handle!(ClientTransaction, TsxKind::Client);

impl ClientTransaction {
    /// Sends the request and runs the transaction.
    pub async fn start(
        request: OutgoingRequest,
        timings: Timings,
        layer: Weak<TransactionLayer>,
    ) -> Result<Self> {
        match request.request.method() {
            SipMethod::Invite | SipMethod::Ack => {
                return Err(Error::MethodNotAllowed(request.request.method().to_string()));
            }
            _ => {}
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
            State::Trying,
        );

        shared.send_buf(&encoded).await?;
        if !shared.reliable() {
            shared.arm(TimerKind::E, timings.t1);
        }
        shared.arm(TimerKind::F, timings.t1x64());

        Ok(Self::spawn(shared, encoded, layer))
    }

    /// Reinstalls a transaction from a snapshot without re-sending the
    /// original request.
    pub fn restore(
        snapshot: TsxSnapshot,
        transport: Transport,
        layer: Weak<TransactionLayer>,
    ) -> Result<Self> {
        let (shared, encoded) = snapshot.reinstall(TsxKind::Client, transport)?;
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
            layer.add_client_tsx(ClientTsx::NonInvite(handle.clone()));
        }

        let fsm = Fsm {
            shared,
            rx,
            tu,
            layer,
            encoded,
        };
        tokio::spawn(fsm.run());
        handle
    }

    /// Takes the receiver observing every matched response in arrival
    /// order.
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
                    Some(TransactionMessage::Response(response)) => self.on_response(response),
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

    fn on_response(&mut self, response: IncomingResponse) {
        let code = response.code();
        let state = self.shared.state();
        self.shared.set_last_response(&response.response);

        match state {
            State::Trying | State::Proceeding if code.is_provisional() => {
                self.shared.set_state(State::Proceeding);
                self.deliver(response);
            }
            State::Trying | State::Proceeding if code.is_final() => {
                self.shared.cancel(TimerKind::E);
                self.shared.cancel(TimerKind::F);
                self.shared.set_state(State::Completed);
                let linger = self.shared.timings.timer_k(self.shared.reliable());
                if linger.is_zero() {
                    self.deliver(response);
                    self.terminate_with(Termination::Normal);
                    return;
                }
                self.shared.arm(TimerKind::K, linger);
                self.deliver(response);
            }
            // Retransmitted finals in Completed are absorbed.
            _ => trace!("[{}] {code} ignored in {state:?}", self.shared.key),
        }
    }

    async fn on_timer(&mut self, kind: TimerKind, fired_after: Duration) {
        let state = self.shared.state();

        match (state, kind) {
            (State::Trying | State::Proceeding, TimerKind::E) => {
                // Doubles towards T2 while Trying, pinned at T2 once
                // Proceeding.
                let next = match state {
                    State::Trying => cmp::min(fired_after * 2, self.shared.timings.t2),
                    _ => self.shared.timings.t2,
                };
                match self.shared.send_buf(&self.encoded).await {
                    Ok(_) => {
                        self.shared.add_retransmit();
                        self.shared.arm(TimerKind::E, next);
                    }
                    Err(err) if err.is_temporary() => {
                        debug!("[{}] retransmission failed: {err}", self.shared.key);
                        self.shared.arm(TimerKind::E, next);
                    }
                    Err(_) => self.terminate_with(Termination::TransportErr),
                }
            }
            (State::Trying | State::Proceeding, TimerKind::F) => {
                self.terminate_with(Termination::TimerF)
            }
            (State::Completed, TimerKind::K) => self.terminate_with(Termination::Normal),
            _ => trace!("[{}] stale {kind:?} in {state:?}", self.shared.key),
        }
    }

    fn deliver(&self, response: IncomingResponse) {
        let _ = self.tu.send(response);
    }

    fn terminate_with(&mut self, reason: Termination) {
        self.shared.set_termination(reason);
        self.shared.cancel_all_timers();
        self.shared.set_state(State::Terminated);
    }
}
