//! The endpoint ties the transport and transaction layers together.
//!
//! Ingress flows transport pump → parse → Via rewrite → transaction
//! match → TU handlers → stateless fallback. Egress creates client
//! transactions and resolves destinations.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::headers::Header;
use crate::message::{
    Host, MandatoryHeaders, Request, Scheme, SipMethod, StatusCode, TransportType, Uri,
};
use crate::parser::Parser;
use crate::transaction::{
    ClientTransaction, ClientTsx, InviteClientTransaction, InviteServerTransaction,
    ServerTransaction, ServerTsx, Timings, TransactionLayer,
};
use crate::transport::{
    resolve_response_target, stateless_response, Encode, IncomingInfo, IncomingRequest,
    IncomingResponse, OutgoingRequest, OutgoingResponse, Packet, TargetInfo, Transport,
    TransportEvent, TransportLayer,
};

/// Upper bound on the synchronous part of a request send.
pub const SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Builder for an [`Endpoint`].
#[derive(Default)]
pub struct EndpointBuilder {
    timings: Timings,
    transactions: Option<TransactionLayer>,
}

impl EndpointBuilder {
    pub fn new() -> Self {
        Self {
            timings: Timings::default(),
            transactions: None,
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_transaction_layer(mut self, layer: TransactionLayer) -> Self {
        self.transactions = Some(layer);
        self
    }

    pub fn build(self) -> Endpoint {
        Endpoint(Arc::new(Inner {
            transports: TransportLayer::new(),
            transactions: Arc::new(self.transactions.unwrap_or_default()),
            timings: self.timings,
        }))
    }
}

struct Inner {
    transports: TransportLayer,
    transactions: Arc<TransactionLayer>,
    timings: Timings,
}

/// A SIP endpoint: one transport registry, one transaction layer, one
/// set of timing knobs.
#[derive(Clone)]
pub struct Endpoint(Arc<Inner>);

impl Endpoint {
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    pub fn transports(&self) -> &TransportLayer {
        &self.0.transports
    }

    pub fn transactions(&self) -> &Arc<TransactionLayer> {
        &self.0.transactions
    }

    pub fn timings(&self) -> Timings {
        self.0.timings
    }

    /// Drains transport events until every transport sender is gone.
    /// Call once, from a spawned task.
    pub async fn serve(&self) -> Result<()> {
        let mut rx = self
            .0
            .transports
            .take_receiver()
            .ok_or_else(|| Error::InvalidArgument("endpoint is already serving".into()))?;

        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Packet { transport, packet } => {
                    let endpoint = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = endpoint.process_packet(transport, packet).await {
                            debug!("ingress error: {err}");
                        }
                    });
                }
                TransportEvent::Oversized { transport, packet } => {
                    let endpoint = self.clone();
                    tokio::spawn(async move {
                        endpoint.process_oversized(transport, packet).await;
                    });
                }
                TransportEvent::Created(transport) => self.0.transports.add_transport(transport),
                TransportEvent::Closed(key) => {
                    self.0.transports.remove_transport(key);
                }
            }
        }
        Ok(())
    }

    /// One ingress pipeline run for a raw packet.
    pub(crate) async fn process_packet(&self, transport: Transport, packet: Packet) -> Result<()> {
        let payload = &packet.payload;

        // Keepalives: a double CRLF is a ping we answer, a bare CRLF is
        // the pong. Never handed to the parser.
        if payload.iter().copied().all(|b| b == b'\r' || b == b'\n') {
            if payload.as_ref() == b"\r\n\r\n" {
                transport.send(b"\r\n", packet.addr).await?;
            }
            return Ok(());
        }

        let message = match Parser::parse(payload) {
            Ok(message) => message,
            Err(err) => {
                self.0.transports.count_parse_rejection();
                warn!(
                    "ignoring {} bytes from {} {}: {err}",
                    payload.len(),
                    transport.protocol(),
                    packet.addr
                );
                return Err(err);
            }
        };

        match message {
            crate::message::SipMessage::Request(mut request) => {
                rewrite_top_via(&mut request, &transport, packet.addr);
                let mandatory = MandatoryHeaders::try_from(&request.headers)?;
                let incoming =
                    IncomingRequest::new(request, IncomingInfo::new(mandatory, transport, packet));
                self.process_request(incoming).await
            }
            crate::message::SipMessage::Response(response) => {
                let mandatory = MandatoryHeaders::try_from(&response.headers)?;
                let incoming =
                    IncomingResponse::new(response, IncomingInfo::new(mandatory, transport, packet));
                self.process_response(incoming).await
            }
        }
    }

    pub(crate) async fn process_request(&self, request: IncomingRequest) -> Result<()> {
        if self.0.transactions.handle_request(&request) {
            return Ok(());
        }

        let handlers = self.0.transports.request_handlers();
        if handlers.is_empty() {
            debug!("no handler for {}; answering 503", request.request);
            return self
                .respond_statelessly(&request, StatusCode::SERVICE_UNAVAILABLE, vec![])
                .await;
        }

        for handler in handlers {
            let call = handler.on_request(request.clone());
            if std::panic::AssertUnwindSafe(call).catch_unwind().await.is_err() {
                warn!("request handler panicked; answering 500");
                let retry = Header::parse_named("Retry-After", "60")?;
                self.respond_statelessly(&request, StatusCode::INTERNAL_SERVER_ERROR, vec![retry])
                    .await?;
                request.transport().close();
                break;
            }
        }
        Ok(())
    }

    pub(crate) async fn process_response(&self, response: IncomingResponse) -> Result<()> {
        if self.0.transactions.handle_response(&response) {
            return Ok(());
        }

        let handlers = self.0.transports.response_handlers();
        if handlers.is_empty() {
            // Unmatched responses are dropped silently.
            debug!("unmatched response {} dropped", response.response);
            return Ok(());
        }
        for handler in handlers {
            let call = handler.on_response(response.clone());
            if std::panic::AssertUnwindSafe(call).catch_unwind().await.is_err() {
                warn!("response handler panicked");
                response.transport().close();
                break;
            }
        }
        Ok(())
    }

    /// Answers an over-sized stream message with 413 and drops the
    /// connection.
    pub(crate) async fn process_oversized(&self, transport: Transport, packet: Packet) {
        if let Ok(crate::message::SipMessage::Request(mut request)) =
            Parser::parse_head(&packet.payload)
        {
            rewrite_top_via(&mut request, &transport, packet.addr);
            if let Ok(mandatory) = MandatoryHeaders::try_from(&request.headers) {
                let incoming = IncomingRequest::new(
                    request,
                    IncomingInfo::new(mandatory, transport.clone(), packet),
                );
                let _ = self
                    .respond_statelessly(&incoming, StatusCode::REQUEST_ENTITY_TOO_LARGE, vec![])
                    .await;
            }
        }
        transport.close();
        self.0.transports.remove_transport(transport.key());
    }

    /// Sends a response outside any transaction, RFC 3261 §18.2.2
    /// destination rules.
    pub async fn respond_statelessly(
        &self,
        request: &IncomingRequest,
        code: StatusCode,
        extra_headers: Vec<Header>,
    ) -> Result<()> {
        let response = stateless_response(request, code, extra_headers);
        let target = match resolve_response_target(&request.info.mandatory.via).await {
            Ok(target) => target,
            // Symmetric fallback: answer where the packet came from.
            Err(_) => request.source(),
        };

        let outgoing = OutgoingResponse::new(
            response,
            TargetInfo {
                target,
                transport: request.transport().clone(),
            },
        );
        let encoded = outgoing.encode()?;
        request.transport().send(&encoded, target).await?;
        Ok(())
    }

    /// Creates a client transaction for the request and sends it,
    /// blocking until the bytes are handed to the socket (bounded by
    /// [`SEND_TIMEOUT`]). The flavor follows the method; destination
    /// resolution follows the Request-URI unless `target` pins it.
    pub async fn send_request(
        &self,
        request: Request,
        target: Option<TargetInfo>,
    ) -> Result<ClientTsx> {
        let info = match target {
            Some(info) => info,
            None => self.resolve_request_target(request.uri()).await?,
        };
        let outgoing = OutgoingRequest::new(request, info);
        let layer = Arc::downgrade(&self.0.transactions);

        let send = async {
            if outgoing.request.method() == &SipMethod::Invite {
                let tsx = InviteClientTransaction::start(outgoing, self.0.timings, layer).await?;
                Ok(ClientTsx::Invite(tsx))
            } else {
                let tsx = ClientTransaction::start(outgoing, self.0.timings, layer).await?;
                Ok(ClientTsx::NonInvite(tsx))
            }
        };
        tokio::time::timeout(SEND_TIMEOUT, send).await.map_err(|_| {
            Error::TransportTemporary(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "send deadline exceeded",
            ))
        })?
    }

    /// Creates the server transaction for a received request.
    pub fn new_server_tsx(&self, request: &IncomingRequest) -> Result<ServerTsx> {
        let layer = Arc::downgrade(&self.0.transactions);

        if request.is_method(&SipMethod::Invite) {
            let tsx = InviteServerTransaction::start(request, self.0.timings, layer)?;
            Ok(ServerTsx::Invite(tsx))
        } else {
            let tsx = ServerTransaction::start(request, self.0.timings, layer)?;
            Ok(ServerTsx::NonInvite(tsx))
        }
    }

    /// Picks transport and address for a Request-URI: the `transport=`
    /// parameter decides the protocol (TLS for sips), UDP is the
    /// default; `maddr` overrides the host; ports default from the
    /// protocol.
    async fn resolve_request_target(&self, uri: &Uri) -> Result<TargetInfo> {
        let protocol = if uri.scheme == Scheme::Sips {
            TransportType::Tls
        } else {
            match uri.transport_param() {
                Some(param) => param.parse()?,
                None => TransportType::Udp,
            }
        };
        let port = uri.host_port.port.unwrap_or_else(|| protocol.default_port());

        let host = match uri.maddr_param() {
            Some(maddr) => Host::from_token(maddr),
            None => uri.host_port.host.clone(),
        };
        let target = match host {
            Host::Ip(ip) => SocketAddr::new(ip, port),
            Host::Domain(domain) => {
                let mut addrs = tokio::net::lookup_host((domain.as_str(), port)).await?;
                addrs
                    .next()
                    .ok_or_else(|| Error::InvalidArgument(format!("cannot resolve '{domain}'")))?
            }
        };

        let transport = self.0.transports.find_or_create(target, protocol).await?;
        Ok(TargetInfo { target, transport })
    }
}

/// RFC 3261 §18.2.1 / RFC 3581: stamp `received` when the source differs
/// from the sent-by host, echo `rport` for unreliable transports.
fn rewrite_top_via(request: &mut Request, transport: &Transport, source: SocketAddr) {
    let reliable = transport.reliable();
    let Some(via) = request.headers.via_mut() else {
        return;
    };

    let sent_from_matches = matches!(&via.sent_by.host, Host::Ip(ip) if *ip == source.ip());
    if !sent_from_matches {
        via.set_received(source.ip());
    }
    if !reliable && via.wants_rport() {
        via.rport = Some(source.port());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::transport::MockTransport;
    use bytes::Bytes;

    const INVITE_MSG: &str = "INVITE sip:bob@biloxi.com SIP/2.0\r\n\
        Via: SIP/2.0/UDP pc33.atlanta.com;rport;branch=z9hG4bK776asdhds\r\n\
        Max-Forwards: 70\r\n\
        To: Bob <sip:bob@biloxi.com>\r\n\
        From: Alice <sip:alice@atlanta.com>;tag=1928301774\r\n\
        Call-ID: a84b4c76e66710@pc33.atlanta.com\r\n\
        CSeq: 314159 INVITE\r\n\
        Content-Length: 0\r\n\r\n";

    fn endpoint() -> Endpoint {
        Endpoint::builder()
            .with_transaction_layer(TransactionLayer::default())
            .build()
    }

    #[test_log::test(tokio::test)]
    async fn test_unhandled_request_gets_stateless_503() {
        let endpoint = endpoint();
        let mock = MockTransport::new_udp();
        let transport = mock.clone().into_transport();
        let source: SocketAddr = "198.51.100.1:49152".parse().unwrap();

        endpoint
            .process_packet(transport, Packet::new(Bytes::from_static(INVITE_MSG.as_bytes()), source))
            .await
            .unwrap();

        let sent = mock.last_message().expect("a 503 must go out");
        let response = sent.response().expect("a response must go out");
        assert_eq!(response.code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_stateless_to_tag_is_deterministic() {
        let endpoint = endpoint();
        let source: SocketAddr = "198.51.100.1:49152".parse().unwrap();
        let mut tags = Vec::new();

        for _ in 0..2 {
            let mock = MockTransport::new_udp();
            let transport = mock.clone().into_transport();
            endpoint
                .process_packet(
                    transport,
                    Packet::new(Bytes::from_static(INVITE_MSG.as_bytes()), source),
                )
                .await
                .unwrap();

            let sent = mock.last_message().unwrap();
            let tag = sent
                .response()
                .unwrap()
                .headers
                .to()
                .unwrap()
                .tag()
                .unwrap()
                .to_string();
            assert_eq!(tag.len(), 16);
            tags.push(tag);
        }
        assert_eq!(tags[0], tags[1]);
    }

    #[tokio::test]
    async fn test_keepalive_ping_gets_pong() {
        let endpoint = endpoint();
        let mock = MockTransport::new_udp();
        let transport = mock.clone().into_transport();
        let source: SocketAddr = "198.51.100.1:49152".parse().unwrap();

        endpoint
            .process_packet(transport.clone(), Packet::new(Bytes::from_static(b"\r\n\r\n"), source))
            .await
            .unwrap();
        assert_eq!(mock.last_buffer().as_deref(), Some(&b"\r\n"[..]));

        endpoint
            .process_packet(transport, Packet::new(Bytes::from_static(b"\r\n"), source))
            .await
            .unwrap();
        assert_eq!(mock.sent_count(), 1, "a pong must not be answered");
    }

    #[tokio::test]
    async fn test_garbage_bumps_rejection_counter_and_is_dropped() {
        let endpoint = endpoint();
        let mock = MockTransport::new_udp();
        let transport = mock.clone().into_transport();
        let source: SocketAddr = "198.51.100.1:49152".parse().unwrap();

        let result = endpoint
            .process_packet(transport, Packet::new(Bytes::from_static(b"%%% nonsense"), source))
            .await;

        assert!(result.is_err());
        assert_eq!(endpoint.transports().parse_rejections(), 1);
        assert_eq!(mock.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_via_rewrite_stamps_received_and_rport() {
        let endpoint = endpoint();
        let mock = MockTransport::new_udp();
        let transport = mock.clone().into_transport();
        let source: SocketAddr = "198.51.100.1:49152".parse().unwrap();

        endpoint
            .process_packet(transport, Packet::new(Bytes::from_static(INVITE_MSG.as_bytes()), source))
            .await
            .unwrap();

        // The 503 goes back to received:rport per RFC 3581.
        let (_, target) = mock.last_sent().unwrap();
        assert_eq!(target, source);
    }
}
