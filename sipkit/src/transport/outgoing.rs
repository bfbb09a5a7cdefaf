use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::SystemTime;

use bytes::Bytes;

use crate::error::Result;
use crate::headers::{ContentLength, Header};
use crate::message::{RenderOptions, Request, Response, StatusCode};
use crate::transport::Transport;

/// Where and how an outbound message leaves the stack.
#[derive(Clone)]
pub struct TargetInfo {
    /// The socket this message is sent to.
    pub target: SocketAddr,
    /// The transport used to send it.
    pub transport: Transport,
}

/// An outbound SIP request.
#[derive(Clone)]
pub struct OutgoingRequest {
    pub request: Request,
    pub info: TargetInfo,
    /// Cached wire encoding, filled on first send.
    pub encoded: Option<Bytes>,
    pub metadata: HashMap<String, String>,
    /// Set once the send was handed to the socket; the envelope is frozen
    /// from then on.
    pub sent_at: Option<SystemTime>,
}

impl OutgoingRequest {
    pub fn new(request: Request, info: TargetInfo) -> Self {
        Self {
            request,
            info,
            encoded: None,
            metadata: HashMap::new(),
            sent_at: None,
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.info.target
    }
}

/// An outbound SIP response.
#[derive(Clone)]
pub struct OutgoingResponse {
    pub response: Response,
    pub info: TargetInfo,
    pub encoded: Option<Bytes>,
    pub metadata: HashMap<String, String>,
    pub sent_at: Option<SystemTime>,
}

impl OutgoingResponse {
    pub fn new(response: Response, info: TargetInfo) -> Self {
        Self {
            response,
            info,
            encoded: None,
            metadata: HashMap::new(),
            sent_at: None,
        }
    }

    pub fn code(&self) -> StatusCode {
        self.response.code()
    }

    pub fn target(&self) -> SocketAddr {
        self.info.target
    }
}

/// Converts a message into its wire bytes, forcing Content-Length to the
/// actual body length first.
pub trait Encode {
    fn encode(&self) -> Result<Bytes>;
}

impl Encode for OutgoingRequest {
    fn encode(&self) -> Result<Bytes> {
        let mut message = self.request.clone();
        message
            .headers
            .set_header(Header::ContentLength(ContentLength::new(message.body.len() as u32)));

        Ok(Bytes::from(message.render(RenderOptions::default())))
    }
}

impl Encode for OutgoingResponse {
    fn encode(&self) -> Result<Bytes> {
        let mut message = self.response.clone();
        message
            .headers
            .set_header(Header::ContentLength(ContentLength::new(message.body.len() as u32)));

        Ok(Bytes::from(message.render(RenderOptions::default())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SipMethod;
    use crate::test_utils::transport::MockTransport;

    #[test]
    fn test_encode_injects_content_length() {
        let mut request = Request::new(SipMethod::Message, "sip:bob@biloxi.com".parse().unwrap());
        request.body = b"Hello world!\r\n".to_vec();

        let transport = MockTransport::new_udp().into_transport();
        let outgoing = OutgoingRequest::new(
            request,
            TargetInfo {
                target: "192.0.2.1:5060".parse().unwrap(),
                transport,
            },
        );

        let encoded = outgoing.encode().unwrap();
        let text = String::from_utf8(encoded.to_vec()).unwrap();

        assert!(text.contains("Content-Length: 14\r\n"));
        assert!(text.ends_with("\r\n\r\nHello world!\r\n"));
    }
}
