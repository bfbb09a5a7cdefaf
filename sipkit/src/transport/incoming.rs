use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops;

use crate::message::{MandatoryHeaders, Request, Response, SipMethod};
use crate::transport::{Packet, Transport};

/// Metadata shared by received requests and responses: the transport the
/// message arrived on, the raw packet, the extracted mandatory headers
/// and a free-form metadata bag.
#[derive(Clone)]
pub struct IncomingInfo {
    pub mandatory: MandatoryHeaders,
    pub transport: Transport,
    pub packet: Packet,
    pub metadata: HashMap<String, String>,
}

impl IncomingInfo {
    pub fn new(mandatory: MandatoryHeaders, transport: Transport, packet: Packet) -> Self {
        Self {
            mandatory,
            transport,
            packet,
            metadata: HashMap::new(),
        }
    }
}

/// A received SIP request.
#[derive(Clone)]
pub struct IncomingRequest {
    pub request: Request,
    pub info: Box<IncomingInfo>,
}

impl IncomingRequest {
    pub fn new(request: Request, info: IncomingInfo) -> Self {
        Self {
            request,
            info: Box::new(info),
        }
    }

    #[inline]
    pub fn is_method(&self, method: &SipMethod) -> bool {
        self.request.method() == method
    }

    /// The address the packet came from.
    pub fn source(&self) -> SocketAddr {
        self.info.packet.addr
    }

    pub fn transport(&self) -> &Transport {
        &self.info.transport
    }
}

impl ops::Deref for IncomingRequest {
    type Target = Request;

    fn deref(&self) -> &Self::Target {
        &self.request
    }
}

/// A received SIP response.
#[derive(Clone)]
pub struct IncomingResponse {
    pub response: Response,
    pub info: Box<IncomingInfo>,
}

impl IncomingResponse {
    pub fn new(response: Response, info: IncomingInfo) -> Self {
        Self {
            response,
            info: Box::new(info),
        }
    }

    pub fn source(&self) -> SocketAddr {
        self.info.packet.addr
    }

    pub fn transport(&self) -> &Transport {
        &self.info.transport
    }
}

impl ops::Deref for IncomingResponse {
    type Target = Response;

    fn deref(&self) -> &Self::Target {
        &self.response
    }
}
