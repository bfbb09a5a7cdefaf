//! SIP transport layer.
//!
//! A [`Transport`] is a cheap cloneable handle over one concrete
//! transport instance (a UDP socket, one TCP connection). The
//! [`TransportLayer`] keeps the registry of live transports, hands out
//! events from their read pumps and carries the registered ingress
//! handlers.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::headers::Via;
use crate::message::{Host, StatusCode, TransportType};

mod decoder;
mod incoming;
mod outgoing;
pub mod tcp;
pub mod udp;

pub use incoming::{IncomingInfo, IncomingRequest, IncomingResponse};
pub use outgoing::{Encode, OutgoingRequest, OutgoingResponse, TargetInfo};

/// Upper bound for a message read from a stream transport.
pub const MAX_MSG_SIZE: usize = 65_535;

/// One raw datagram or framed stream message.
#[derive(Clone)]
pub struct Packet {
    pub payload: Bytes,
    /// The address of the sender.
    pub addr: SocketAddr,
    /// The time the packet was received.
    pub time: SystemTime,
}

impl Packet {
    pub fn new(payload: Bytes, addr: SocketAddr) -> Self {
        Self {
            payload,
            addr,
            time: SystemTime::now(),
        }
    }
}

/// Abstraction over a concrete SIP transport implementation.
#[async_trait::async_trait]
pub trait SipTransport: Send + Sync + 'static {
    /// Sends a buffer to the given remote socket address, returning the
    /// number of bytes handed to the socket.
    async fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize>;

    fn protocol(&self) -> TransportType;

    /// The local socket address bound to this transport.
    fn local_addr(&self) -> SocketAddr;

    /// The peer address, for connection-oriented transports.
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// `false` once the underlying socket is gone; reliable transports
    /// are only reused while this holds.
    fn is_open(&self) -> bool {
        true
    }

    /// Tears the transport down. Sends return [`Error::TransportClosed`]
    /// afterwards.
    fn close(&self) {}

    /// The advertised local name, host:port.
    fn local_name(&self) -> Cow<'_, str> {
        Cow::Owned(self.local_addr().to_string())
    }
}

/// A cloneable handle to a [`SipTransport`].
#[derive(Clone)]
pub struct Transport(Arc<dyn SipTransport>);

impl Transport {
    pub fn new<T: SipTransport>(inner: T) -> Self {
        Self(Arc::new(inner))
    }

    pub async fn send(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        self.0.send(buf, addr).await
    }

    pub fn protocol(&self) -> TransportType {
        self.0.protocol()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.0.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.0.remote_addr()
    }

    pub fn is_open(&self) -> bool {
        self.0.is_open()
    }

    pub fn close(&self) {
        self.0.close()
    }

    pub fn local_name(&self) -> Cow<'_, str> {
        self.0.local_name()
    }

    #[inline]
    pub fn reliable(&self) -> bool {
        self.0.protocol().reliable()
    }

    #[inline]
    pub fn secure(&self) -> bool {
        self.0.protocol().secured()
    }

    #[inline]
    pub fn streamed(&self) -> bool {
        self.0.protocol().streamed()
    }

    /// `true` when `addr` shares the local socket's address family.
    pub fn is_same_af(&self, addr: &SocketAddr) -> bool {
        let ours = self.local_addr();
        (addr.is_ipv4() && ours.is_ipv4()) || (addr.is_ipv6() && ours.is_ipv6())
    }

    pub fn key(&self) -> TransportKey {
        TransportKey::new(
            self.remote_addr().unwrap_or_else(|| self.local_addr()),
            self.protocol(),
        )
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transport({} {})", self.protocol(), self.local_addr())
    }
}

/// Identifies a transport connection in the registry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TransportKey {
    addr: SocketAddr,
    protocol: TransportType,
}

impl TransportKey {
    pub fn new(addr: SocketAddr, protocol: TransportType) -> Self {
        TransportKey { addr, protocol }
    }
}

/// Factory for connection-oriented transports; dials a new connection
/// when no live one matches the destination.
#[async_trait::async_trait]
pub trait Factory: Send + Sync {
    async fn create(&self, addr: SocketAddr) -> Result<Transport>;

    fn protocol(&self) -> TransportType;
}

/// Events flowing from the transport read pumps into the endpoint.
pub enum TransportEvent {
    /// A framed message arrived.
    Packet { transport: Transport, packet: Packet },
    /// A stream message declared a body beyond [`MAX_MSG_SIZE`]; the
    /// payload holds the message head only.
    Oversized { transport: Transport, packet: Packet },
    /// A new transport came up.
    Created(Transport),
    /// A transport went away.
    Closed(TransportKey),
}

pub type TransportTx = mpsc::Sender<TransportEvent>;
pub type TransportRx = mpsc::Receiver<TransportEvent>;

/// Handler for requests that did not match a transaction.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    async fn on_request(&self, request: IncomingRequest);
}

/// Handler for responses that did not match a transaction.
#[async_trait::async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn on_response(&self, response: IncomingResponse);
}

/// Identifies a registered handler; pass it back to unbind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Transport registry plus ingress handler fan-out.
pub struct TransportLayer {
    transports: Mutex<HashMap<TransportKey, Transport>>,
    factories: Mutex<Vec<Arc<dyn Factory>>>,
    request_handlers: Mutex<Vec<(HandlerId, Arc<dyn RequestHandler>)>>,
    response_handlers: Mutex<Vec<(HandlerId, Arc<dyn ResponseHandler>)>>,
    next_handler_id: AtomicU64,
    parse_rejections: AtomicU64,
    transport_tx: TransportTx,
    transport_rx: Mutex<Option<TransportRx>>,
}

impl Default for TransportLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportLayer {
    pub fn new() -> Self {
        let (transport_tx, transport_rx) = mpsc::channel(1_000);

        Self {
            transports: Default::default(),
            factories: Default::default(),
            request_handlers: Default::default(),
            response_handlers: Default::default(),
            next_handler_id: AtomicU64::new(1),
            parse_rejections: AtomicU64::new(0),
            transport_tx,
            transport_rx: Mutex::new(Some(transport_rx)),
        }
    }

    pub fn sender(&self) -> TransportTx {
        self.transport_tx.clone()
    }

    /// Takes the event receiver. Only the endpoint pump may call this,
    /// once.
    pub(crate) fn take_receiver(&self) -> Option<TransportRx> {
        self.transport_rx.lock().expect("Lock failed").take()
    }

    pub fn add_transport(&self, transport: Transport) {
        debug!("transport up: {transport:?}");
        self.transports
            .lock()
            .expect("Lock failed")
            .insert(transport.key(), transport);
    }

    pub fn remove_transport(&self, key: TransportKey) -> Option<Transport> {
        self.transports.lock().expect("Lock failed").remove(&key)
    }

    pub fn transport_count(&self) -> usize {
        self.transports.lock().expect("Lock failed").len()
    }

    pub fn add_factory(&self, factory: Arc<dyn Factory>) {
        self.factories.lock().expect("Lock failed").push(factory);
    }

    /// Count of ingress messages dropped by the parser.
    pub fn parse_rejections(&self) -> u64 {
        self.parse_rejections.load(Ordering::Relaxed)
    }

    pub(crate) fn count_parse_rejection(&self) {
        self.parse_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Finds a live transport for the destination: exact connection
    /// match first, then any transport of the protocol in the same
    /// address family.
    pub fn find(&self, dst: SocketAddr, protocol: TransportType) -> Option<Transport> {
        let transports = self.transports.lock().expect("Lock failed");

        if let Some(transport) = transports.get(&TransportKey::new(dst, protocol)) {
            if transport.is_open() {
                return Some(transport.clone());
            }
        }

        transports
            .values()
            .find(|t| t.protocol() == protocol && t.is_same_af(&dst) && t.is_open())
            .cloned()
    }

    /// Finds a transport or dials one through a registered factory.
    pub async fn find_or_create(&self, dst: SocketAddr, protocol: TransportType) -> Result<Transport> {
        if let Some(transport) = self.find(dst, protocol) {
            return Ok(transport);
        }

        let factory = {
            let factories = self.factories.lock().expect("Lock failed");
            factories.iter().find(|f| f.protocol() == protocol).cloned()
        };
        let factory = factory.ok_or_else(|| {
            Error::InvalidArgument(format!("no transport available for {protocol} towards {dst}"))
        })?;

        let transport = factory.create(dst).await?;
        self.add_transport(transport.clone());
        Ok(transport)
    }

    pub fn on_request(&self, handler: Arc<dyn RequestHandler>) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.request_handlers
            .lock()
            .expect("Lock failed")
            .push((id, handler));
        id
    }

    pub fn on_response(&self, handler: Arc<dyn ResponseHandler>) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.response_handlers
            .lock()
            .expect("Lock failed")
            .push((id, handler));
        id
    }

    /// Unbinds a handler registered with [`TransportLayer::on_request`]
    /// or [`TransportLayer::on_response`].
    pub fn unbind(&self, id: HandlerId) {
        self.request_handlers
            .lock()
            .expect("Lock failed")
            .retain(|(hid, _)| *hid != id);
        self.response_handlers
            .lock()
            .expect("Lock failed")
            .retain(|(hid, _)| *hid != id);
    }

    /// Snapshot of the request handlers; iteration happens outside the
    /// lock.
    pub(crate) fn request_handlers(&self) -> Vec<Arc<dyn RequestHandler>> {
        self.request_handlers
            .lock()
            .expect("Lock failed")
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }

    pub(crate) fn response_handlers(&self) -> Vec<Arc<dyn ResponseHandler>> {
        self.response_handlers
            .lock()
            .expect("Lock failed")
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }
}

/// Resolves where a response to the given top Via must go, RFC 3261
/// §18.2.2 plus the RFC 3581 `rport` extension: maddr first, then
/// `received` (with `rport` when present), then sent-by, defaulting the
/// port from the transport.
pub async fn resolve_response_target(via: &Via) -> Result<SocketAddr> {
    let port = via
        .rport
        .or(via.sent_by.port)
        .unwrap_or_else(|| via.transport.default_port());

    let host = match (&via.maddr, via.received) {
        (Some(maddr), _) => maddr.clone(),
        (None, Some(received)) => Host::Ip(received),
        (None, None) => via.sent_by.host.clone(),
    };

    match host {
        Host::Ip(ip) => Ok(SocketAddr::new(ip, port)),
        Host::Domain(domain) => {
            let mut addrs = tokio::net::lookup_host((domain.as_str(), port)).await?;
            addrs
                .next()
                .ok_or_else(|| Error::InvalidArgument(format!("cannot resolve '{domain}'")))
        }
    }
}

/// Derives the deterministic To-tag used on stateless responses: a
/// SHA-256 over the request identity, truncated to 16 hex characters.
pub fn stateless_to_tag(request: &IncomingRequest) -> String {
    let mandatory = &request.info.mandatory;
    let mut hasher = Sha256::new();

    hasher.update(format!(
        "uri={}|via={}|callid={}|fromtag={}|cseq={}|cseqm={}",
        request.uri(),
        mandatory.via,
        mandatory.call_id,
        mandatory.from.tag().unwrap_or_default(),
        mandatory.cseq.seq,
        mandatory.cseq.method,
    ));

    let digest = hasher.finalize();
    let mut tag = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        tag.push_str(&format!("{byte:02x}"));
    }
    tag
}

/// Builds the minimum valid response to a request outside any
/// transaction, used for fatal ingress errors (413, 500, 503).
pub fn stateless_response(
    request: &IncomingRequest,
    code: StatusCode,
    extra_headers: Vec<crate::headers::Header>,
) -> crate::message::Response {
    request.request.new_response(
        code,
        crate::message::ResponseOptions {
            local_tag: Some(stateless_to_tag(request)),
            headers: extra_headers,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::transport::MockTransport;

    #[test]
    fn test_add_and_find_transport() {
        let layer = TransportLayer::default();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();

        layer.add_transport(MockTransport::new_udp().into_transport());

        assert!(layer.find(addr, TransportType::Udp).is_some());
        assert!(layer.find(addr, TransportType::Tcp).is_none());
        assert_eq!(layer.transport_count(), 1);
    }

    #[test]
    fn test_remove_transport() {
        let layer = TransportLayer::default();
        let transport = MockTransport::new_udp().into_transport();
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let key = transport.key();

        layer.add_transport(transport);
        assert!(layer.find(addr, TransportType::Udp).is_some());

        layer.remove_transport(key);
        assert!(layer.find(addr, TransportType::Udp).is_none());
    }

    #[tokio::test]
    async fn test_response_target_prefers_received_and_rport() {
        let via: Via = "SIP/2.0/UDP client.example.com:5060;rport=9988;received=192.0.2.7;branch=z9hG4bK1"
            .parse()
            .unwrap();

        let target = resolve_response_target(&via).await.unwrap();
        assert_eq!(target, "192.0.2.7:9988".parse().unwrap());
    }

    #[tokio::test]
    async fn test_response_target_falls_back_to_sent_by() {
        let via: Via = "SIP/2.0/UDP 198.51.100.2:6060;branch=z9hG4bK1".parse().unwrap();
        let target = resolve_response_target(&via).await.unwrap();
        assert_eq!(target, "198.51.100.2:6060".parse().unwrap());

        let via: Via = "SIP/2.0/TCP 198.51.100.2;branch=z9hG4bK1".parse().unwrap();
        let target = resolve_response_target(&via).await.unwrap();
        assert_eq!(target, "198.51.100.2:5060".parse().unwrap());
    }
}
