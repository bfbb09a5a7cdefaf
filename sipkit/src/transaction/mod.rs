//! SIP transaction layer, RFC 3261 §17 with the RFC 6026 patches.
//!
//! Each transaction is an independent actor: a spawned task owns the
//! state machine and consumes a [`TransactionMessage`] queue plus its
//! timer table. Handles stay cheap clones; state is observable through a
//! `watch` channel and matched responses flow to the TU over an
//! unbounded channel in arrival order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::message::{Request, Response};
use crate::transport::{IncomingRequest, IncomingResponse, OutgoingResponse, Transport};

pub mod key;
mod client;
mod client_inv;
mod server;
mod server_inv;
mod snapshot;
mod timer;

#[cfg(test)]
pub(crate) mod tests;

pub use client::ClientTransaction;
pub use client_inv::InviteClientTransaction;
pub use key::TsxKey;
pub use server::ServerTransaction;
pub use server_inv::InviteServerTransaction;
pub use snapshot::{RestoredTsx, TsxKind, TsxSnapshot};
pub use timer::{TimerKind, TimerSnapshot, Timings};

pub(crate) use timer::TimerTable;

/// The states a transaction can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum State {
    Calling,
    Trying,
    Proceeding,
    Completed,
    Accepted,
    Confirmed,
    Terminated,
}

/// The event that drove a transaction into Terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Regular end of life (timers D/I/J/K/L/M, or a final response on a
    /// reliable transport).
    Normal,
    /// Timer B fired: no final response for the INVITE.
    TimerB,
    /// Timer F fired: no final response for the non-INVITE request.
    TimerF,
    /// Timer H fired: the ACK never arrived.
    TimerH,
    /// A transport send failed fatally (or an entry action panicked).
    TransportErr,
    /// The TU asked for termination.
    Terminate,
}

/// The role a transaction plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Uac,
    Uas,
}

/// Events consumed by a transaction's task.
pub enum TransactionMessage {
    /// A matched request arrived (server transactions: retransmissions
    /// and ACKs).
    Request(IncomingRequest),
    /// A matched response arrived (client transactions).
    Response(IncomingResponse),
    /// The TU wants this response sent (server transactions).
    Respond(OutgoingResponse),
    /// The TU wants the transaction gone.
    Terminate,
}

/// State shared between a transaction's handle clones and its task.
#[derive(Debug)]
pub(crate) struct TsxShared {
    pub key: TsxKey,
    pub request: Request,
    pub transport: Transport,
    pub target: SocketAddr,
    pub timings: Timings,
    state: Mutex<State>,
    state_tx: watch::Sender<State>,
    last_response: Mutex<Option<Response>>,
    termination: Mutex<Option<Termination>>,
    retransmit_count: AtomicUsize,
    pub timers: Mutex<TimerTable>,
}

impl TsxShared {
    pub fn new(
        key: TsxKey,
        request: Request,
        transport: Transport,
        target: SocketAddr,
        timings: Timings,
        state: State,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(state);

        Arc::new(Self {
            key,
            request,
            transport,
            target,
            timings,
            state: Mutex::new(state),
            state_tx,
            last_response: Mutex::new(None),
            termination: Mutex::new(None),
            retransmit_count: AtomicUsize::new(0),
            timers: Mutex::new(TimerTable::new()),
        })
    }

    pub fn state(&self) -> State {
        *self.state.lock().expect("Lock failed")
    }

    pub fn set_state(&self, state: State) {
        let old = {
            let mut guard = self.state.lock().expect("Lock failed");
            std::mem::replace(&mut *guard, state)
        };
        if old != state {
            trace!("[{}] {old:?} -> {state:?}", self.key);
            self.state_tx.send_replace(state);
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<State> {
        self.state_tx.subscribe()
    }

    pub fn reliable(&self) -> bool {
        self.transport.reliable()
    }

    pub fn last_response(&self) -> Option<Response> {
        self.last_response.lock().expect("Lock failed").clone()
    }

    pub fn set_last_response(&self, response: &Response) {
        let mut guard = self.last_response.lock().expect("Lock failed");
        *guard = Some(response.clone());
    }

    pub fn termination(&self) -> Option<Termination> {
        *self.termination.lock().expect("Lock failed")
    }

    pub fn set_termination(&self, reason: Termination) {
        let mut guard = self.termination.lock().expect("Lock failed");
        guard.get_or_insert(reason);
    }

    pub fn retransmit_count(&self) -> usize {
        self.retransmit_count.load(Ordering::SeqCst)
    }

    pub fn add_retransmit(&self) -> usize {
        self.retransmit_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn arm(&self, kind: TimerKind, duration: std::time::Duration) {
        self.timers.lock().expect("Lock failed").arm(kind, duration);
    }

    pub fn cancel(&self, kind: TimerKind) {
        self.timers.lock().expect("Lock failed").cancel(kind);
    }

    pub fn cancel_all_timers(&self) {
        self.timers.lock().expect("Lock failed").cancel_all();
    }

    /// Sends raw bytes over the transaction's transport. Panics inside
    /// the transport are contained and surface as [`Error::Panic`] so the
    /// state machine can degrade to a transport-error termination instead
    /// of unwinding through the driver.
    pub async fn send_buf(&self, buf: &Bytes) -> Result<usize> {
        let fut = self.transport.send(buf, self.target);
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Error::Panic(panic_message(&panic))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

/// The handle half every public transaction type wraps.
#[derive(Clone, Debug)]
pub(crate) struct TsxCore {
    pub shared: Arc<TsxShared>,
    pub sender: mpsc::UnboundedSender<TransactionMessage>,
}

impl TsxCore {
    pub fn terminate(&self) {
        // A closed channel means the task is already gone; termination
        // is idempotent either way.
        let _ = self.sender.send(TransactionMessage::Terminate);
    }
}

macro_rules! impl_tsx_handle {
    ($ty:ty, $kind:expr) => {
        impl $ty {
            /// The transaction key.
            pub fn key(&self) -> &crate::transaction::TsxKey {
                &self.core.shared.key
            }

            /// Current state.
            pub fn state(&self) -> crate::transaction::State {
                self.core.shared.state()
            }

            /// A watch receiver observing every state change.
            pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<crate::transaction::State> {
                self.core.shared.subscribe_state()
            }

            /// The last response this transaction saw (client) or sent
            /// (server).
            pub fn last_response(&self) -> Option<crate::message::Response> {
                self.core.shared.last_response()
            }

            /// The event that terminated the transaction, once terminal.
            pub fn termination(&self) -> Option<crate::transaction::Termination> {
                self.core.shared.termination()
            }

            /// How often the original message was retransmitted.
            pub fn retransmit_count(&self) -> usize {
                self.core.shared.retransmit_count()
            }

            /// Forces the transaction into Terminated from any state.
            /// Idempotent; cancels all timers and releases transport
            /// resources.
            pub fn terminate(&self) {
                self.core.terminate()
            }

            /// A serializable projection sufficient to resume this
            /// transaction in another process.
            pub fn snapshot(&self) -> crate::transaction::TsxSnapshot {
                crate::transaction::TsxSnapshot::capture($kind, &self.core.shared)
            }
        }
    };
}
pub(crate) use impl_tsx_handle;

/// A client transaction of either flavor.
#[derive(Clone)]
pub enum ClientTsx {
    Invite(InviteClientTransaction),
    NonInvite(ClientTransaction),
}

impl ClientTsx {
    pub(crate) fn receive(&self, response: IncomingResponse) {
        let sender = match self {
            ClientTsx::Invite(tsx) => &tsx.core.sender,
            ClientTsx::NonInvite(tsx) => &tsx.core.sender,
        };
        if sender.send(TransactionMessage::Response(response)).is_err() {
            debug!("response for a terminated client transaction dropped");
        }
    }

    pub fn key(&self) -> &TsxKey {
        match self {
            ClientTsx::Invite(tsx) => tsx.key(),
            ClientTsx::NonInvite(tsx) => tsx.key(),
        }
    }
}

/// A server transaction of either flavor.
#[derive(Clone)]
pub enum ServerTsx {
    Invite(InviteServerTransaction),
    NonInvite(ServerTransaction),
}

impl ServerTsx {
    pub(crate) fn receive(&self, request: IncomingRequest) {
        let sender = match self {
            ServerTsx::Invite(tsx) => &tsx.core.sender,
            ServerTsx::NonInvite(tsx) => &tsx.core.sender,
        };
        if sender.send(TransactionMessage::Request(request)).is_err() {
            debug!("request for a terminated server transaction dropped");
        }
    }

    pub fn key(&self) -> &TsxKey {
        match self {
            ServerTsx::Invite(tsx) => tsx.key(),
            ServerTsx::NonInvite(tsx) => tsx.key(),
        }
    }
}

/// Holds every live transaction, keyed for ingress matching.
#[derive(Default)]
pub struct TransactionLayer {
    client_transactions: Mutex<std::collections::HashMap<TsxKey, ClientTsx>>,
    server_transactions: Mutex<std::collections::HashMap<TsxKey, ServerTsx>>,
}

impl TransactionLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_client_tsx(&self, tsx: ClientTsx) {
        let key = tsx.key().clone();
        self.client_transactions
            .lock()
            .expect("Lock failed")
            .insert(key, tsx);
    }

    pub(crate) fn add_server_tsx(&self, tsx: ServerTsx) {
        let key = tsx.key().clone();
        self.server_transactions
            .lock()
            .expect("Lock failed")
            .insert(key, tsx);
    }

    pub fn remove_client_tsx(&self, key: &TsxKey) -> Option<ClientTsx> {
        self.client_transactions.lock().expect("Lock failed").remove(key)
    }

    pub fn remove_server_tsx(&self, key: &TsxKey) -> Option<ServerTsx> {
        self.server_transactions.lock().expect("Lock failed").remove(key)
    }

    pub fn find_client_tsx(&self, key: &TsxKey) -> Option<ClientTsx> {
        self.client_transactions
            .lock()
            .expect("Lock failed")
            .get(key)
            .cloned()
    }

    pub fn find_server_tsx(&self, key: &TsxKey) -> Option<ServerTsx> {
        self.server_transactions
            .lock()
            .expect("Lock failed")
            .get(key)
            .cloned()
    }

    pub fn client_count(&self) -> usize {
        self.client_transactions.lock().expect("Lock failed").len()
    }

    pub fn server_count(&self) -> usize {
        self.server_transactions.lock().expect("Lock failed").len()
    }

    /// Routes a response to its client transaction. Returns `false` when
    /// no transaction matches.
    pub fn handle_response(&self, response: &IncomingResponse) -> bool {
        let Some(key) = TsxKey::for_response(response) else {
            warn!("response without branch ignored");
            return false;
        };
        match self.find_client_tsx(&key) {
            Some(tsx) => {
                tsx.receive(response.clone());
                true
            }
            None => false,
        }
    }

    /// Routes a request to its server transaction. Returns `false` when
    /// no transaction matches (a new request, or an ACK for a 2xx whose
    /// transaction is already gone).
    pub fn handle_request(&self, request: &IncomingRequest) -> bool {
        let Some(key) = TsxKey::for_request(request) else {
            return false;
        };
        match self.find_server_tsx(&key) {
            Some(tsx) => {
                tsx.receive(request.clone());
                true
            }
            None => false,
        }
    }
}

/// Detaches a finished transaction from the layer, tolerating a layer
/// that is already gone.
pub(crate) fn detach(layer: &Weak<TransactionLayer>, role: Role, key: &TsxKey) {
    if let Some(layer) = layer.upgrade() {
        match role {
            Role::Uac => {
                layer.remove_client_tsx(key);
            }
            Role::Uas => {
                layer.remove_server_tsx(key);
            }
        };
    }
}
