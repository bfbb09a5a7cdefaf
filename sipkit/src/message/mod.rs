//! SIP message types.
//!
//! [`SipMessage`] is either a [`Request`] or a [`Response`]. Messages own
//! their data; clones are deep and fully isolated from the original.

mod code;
mod method;
mod params;
mod protocol;
mod uri;

pub use code::StatusCode;
pub use method::SipMethod;
pub use params::{Param, Params};
pub use protocol::{ProtocolInfo, TransportType};
pub use uri::{Host, HostPort, NameAddr, Scheme, Uri};

use std::fmt::{self, Write as _};
use std::io;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::headers::{CSeq, CallId, From as FromHdr, Header, Headers, SipHeaderParse, To, Via};

/// Controls wire rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Emit RFC 3261 §20 compact header names where they exist.
    pub compact: bool,
}

/// Options for building a response from a request.
#[derive(Debug, Clone, Default)]
pub struct ResponseOptions {
    /// Overrides the canonical reason phrase.
    pub reason: Option<String>,
    /// Tag attached to To on final responses when the request's To has
    /// none.
    pub local_tag: Option<String>,
    /// Extra headers appended after the copied ones, in order.
    pub headers: Vec<Header>,
}

/// A SIP message, either request or response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

impl SipMessage {
    pub const fn is_request(&self) -> bool {
        matches!(self, SipMessage::Request(_))
    }

    pub const fn is_response(&self) -> bool {
        matches!(self, SipMessage::Response(_))
    }

    pub fn request(&self) -> Option<&Request> {
        match self {
            SipMessage::Request(request) => Some(request),
            SipMessage::Response(_) => None,
        }
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            SipMessage::Response(response) => Some(response),
            SipMessage::Request(_) => None,
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            SipMessage::Request(request) => &request.headers,
            SipMessage::Response(response) => &response.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            SipMessage::Request(request) => &mut request.headers,
            SipMessage::Response(response) => &mut response.headers,
        }
    }

    pub fn body(&self) -> &[u8] {
        match self {
            SipMessage::Request(request) => &request.body,
            SipMessage::Response(response) => &response.body,
        }
    }

    pub fn render(&self, opts: RenderOptions) -> Vec<u8> {
        match self {
            SipMessage::Request(request) => request.render(opts),
            SipMessage::Response(response) => response.render(opts),
        }
    }
}

impl std::convert::From<Request> for SipMessage {
    fn from(value: Request) -> Self {
        SipMessage::Request(value)
    }
}

impl std::convert::From<Response> for SipMessage {
    fn from(value: Response) -> Self {
        SipMessage::Response(value)
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipMessage::Request(request) => write!(f, "{request}"),
            SipMessage::Response(response) => write!(f, "{response}"),
        }
    }
}

/// A SIP Request-Line: method and Request-URI.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestLine {
    pub method: SipMethod,
    pub uri: Uri,
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)
    }
}

/// A SIP request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Request {
    pub req_line: RequestLine,
    pub proto: ProtocolInfo,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: SipMethod, uri: Uri) -> Self {
        Request {
            req_line: RequestLine { method, uri },
            proto: ProtocolInfo::default(),
            headers: Headers::default(),
            body: Vec::new(),
        }
    }

    pub fn with_headers(method: SipMethod, uri: Uri, headers: Headers) -> Self {
        Request {
            req_line: RequestLine { method, uri },
            proto: ProtocolInfo::default(),
            headers,
            body: Vec::new(),
        }
    }

    pub fn method(&self) -> &SipMethod {
        &self.req_line.method
    }

    pub fn uri(&self) -> &Uri {
        &self.req_line.uri
    }

    /// Validity per RFC 3261 §8.1.1: non-empty method, valid URI and
    /// protocol, and at least one Via, To, From, Call-ID, CSeq and
    /// Max-Forwards.
    pub fn is_valid(&self) -> bool {
        !self.req_line.method.is_empty()
            && self.req_line.uri.is_valid()
            && self.proto.is_valid()
            && self.headers.via().is_some()
            && self.headers.to().is_some()
            && self.headers.from_header().is_some()
            && self.headers.call_id().is_some()
            && self.headers.cseq().is_some()
            && self.headers.max_forwards().is_some()
    }

    /// Renders the wire form, CRLF line endings.
    pub fn render(&self, opts: RenderOptions) -> Vec<u8> {
        let mut out = String::new();
        write!(out, "{} {} {}\r\n", self.req_line.method, self.req_line.uri, self.proto)
            .expect("writing to a String cannot fail");
        self.headers
            .write_wire(&mut out, opts.compact)
            .expect("writing to a String cannot fail");
        out.push_str("\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Streaming render. Returns the number of bytes written and the
    /// first I/O failure, if any.
    pub fn render_to<W: io::Write>(&self, writer: &mut W, opts: RenderOptions) -> Result<usize> {
        let bytes = self.render(opts);
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Builds a response to this request, RFC 3261 §8.2.6: protocol
    /// copied, Via headers copied in order, From copied, To copied (with
    /// `opts.local_tag` attached on final responses when absent), Call-ID
    /// and CSeq copied, then `opts.headers` appended. The response's
    /// header storage is fully independent of the request's.
    pub fn new_response(&self, code: StatusCode, opts: ResponseOptions) -> Response {
        let reason = opts.reason.unwrap_or_else(|| code.reason().to_string());
        let mut headers = Headers::with_capacity(self.headers.len() + opts.headers.len());

        for via in self.headers.get(Via::NAME) {
            headers.push(via.clone());
        }
        if let Some(from) = self.headers.from_header() {
            headers.push(Header::From(from.clone()));
        }
        if let Some(to) = self.headers.to() {
            let mut to = to.clone();
            if !code.is_provisional() && to.tag.is_none() {
                if let Some(tag) = &opts.local_tag {
                    to.set_tag(tag);
                }
            }
            headers.push(Header::To(to));
        }
        if let Some(call_id) = self.headers.call_id() {
            headers.push(Header::CallId(call_id.clone()));
        }
        if let Some(cseq) = self.headers.cseq() {
            headers.push(Header::CSeq(cseq.clone()));
        }
        headers.extend(opts.headers);

        Response {
            proto: self.proto.clone(),
            status_line: StatusLine { code, reason },
            headers,
            body: Vec::new(),
        }
    }
}

/// One-line form for logs.
impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.req_line, self.proto)
    }
}

/// A SIP Status-Line: code and reason phrase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusLine {
    pub code: StatusCode,
    pub reason: String,
}

impl StatusLine {
    pub fn new(code: StatusCode, reason: &str) -> Self {
        StatusLine {
            code,
            reason: reason.to_string(),
        }
    }
}

/// Reason phrases compare case-insensitively; the RFC leaves their case
/// to the sender.
impl PartialEq for StatusLine {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.reason.eq_ignore_ascii_case(&other.reason)
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// A SIP response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Response {
    pub proto: ProtocolInfo,
    pub status_line: StatusLine,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(code: StatusCode) -> Self {
        Self {
            proto: ProtocolInfo::default(),
            status_line: StatusLine {
                code,
                reason: code.reason().to_string(),
            },
            headers: Headers::default(),
            body: Vec::new(),
        }
    }

    pub fn code(&self) -> StatusCode {
        self.status_line.code
    }

    pub fn reason(&self) -> &str {
        &self.status_line.reason
    }

    /// Validity per RFC 3261 §8.2.6: valid protocol, code in range, and
    /// at least one Via, To, From, Call-ID and CSeq.
    pub fn is_valid(&self) -> bool {
        self.proto.is_valid()
            && self.status_line.code.is_valid()
            && self.headers.via().is_some()
            && self.headers.to().is_some()
            && self.headers.from_header().is_some()
            && self.headers.call_id().is_some()
            && self.headers.cseq().is_some()
    }

    /// Renders the wire form, CRLF line endings.
    pub fn render(&self, opts: RenderOptions) -> Vec<u8> {
        let mut out = String::new();
        write!(out, "{} {} {}\r\n", self.proto, self.status_line.code, self.status_line.reason)
            .expect("writing to a String cannot fail");
        self.headers
            .write_wire(&mut out, opts.compact)
            .expect("writing to a String cannot fail");
        out.push_str("\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Streaming render. Returns the number of bytes written and the
    /// first I/O failure, if any.
    pub fn render_to<W: io::Write>(&self, writer: &mut W, opts: RenderOptions) -> Result<usize> {
        let bytes = self.render(opts);
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }
}

/// One-line form for logs.
impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.proto, self.status_line)
    }
}

/// The headers every message must carry, extracted once at ingress so the
/// transaction layer never re-scans the header list.
#[derive(Debug, Clone, PartialEq)]
pub struct MandatoryHeaders {
    pub via: Via,
    pub from: FromHdr,
    pub to: To,
    pub call_id: CallId,
    pub cseq: CSeq,
}

impl TryFrom<&Headers> for MandatoryHeaders {
    type Error = Error;

    fn try_from(headers: &Headers) -> Result<Self> {
        let via = headers.via().ok_or(Error::MissingRequiredHeader(Via::NAME))?;
        let from = headers.from_header().ok_or(Error::MissingRequiredHeader(FromHdr::NAME))?;
        let to = headers.to().ok_or(Error::MissingRequiredHeader(To::NAME))?;
        let call_id = headers
            .call_id()
            .ok_or(Error::MissingRequiredHeader(CallId::NAME))?;
        let cseq = headers.cseq().ok_or(Error::MissingRequiredHeader(CSeq::NAME))?;

        Ok(Self {
            via: via.clone(),
            from: from.clone(),
            to: to.clone(),
            call_id: call_id.clone(),
            cseq: cseq.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::MaxForwards;

    fn invite() -> Request {
        let headers = Headers::from([
            Header::parse_named("Via", "SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776asdhds")
                .unwrap(),
            Header::parse_named("From", "Alice <sip:alice@atlanta.com>;tag=1928301774").unwrap(),
            Header::parse_named("To", "Bob <sip:bob@biloxi.com>").unwrap(),
            Header::parse_named("Call-ID", "a84b4c76e66710@pc33.atlanta.com").unwrap(),
            Header::parse_named("CSeq", "314159 INVITE").unwrap(),
            Header::MaxForwards(MaxForwards::new(70)),
        ]);
        Request::with_headers(SipMethod::Invite, "sip:bob@biloxi.com".parse().unwrap(), headers)
    }

    #[test]
    fn test_request_validity() {
        let request = invite();
        assert!(request.is_valid());

        let mut missing = request.clone();
        missing.headers.remove("Max-Forwards");
        assert!(!missing.is_valid());
    }

    #[test]
    fn test_clone_isolation() {
        let request = invite();
        let mut cloned = request.clone();

        cloned.headers.to_mut().unwrap().set_tag("314159");
        cloned.headers.remove("CSeq");

        assert!(request.headers.to().unwrap().tag().is_none());
        assert!(request.headers.cseq().is_some());
    }

    #[test]
    fn test_new_response_copies_and_detaches_headers() {
        let request = invite();
        let mut response = request.new_response(
            StatusCode::OK,
            ResponseOptions {
                local_tag: Some("as83kd9bs".into()),
                ..Default::default()
            },
        );

        assert_eq!(response.headers.to().unwrap().tag(), Some("as83kd9bs"));
        assert_eq!(response.headers.cseq(), request.headers.cseq());
        assert_eq!(response.headers.get("Via").count(), 1);

        response.headers.to_mut().unwrap().set_tag("changed");
        assert!(request.headers.to().unwrap().tag().is_none());
    }

    #[test]
    fn test_new_response_keeps_provisional_to_untagged() {
        let request = invite();
        let response = request.new_response(
            StatusCode::RINGING,
            ResponseOptions {
                local_tag: Some("as83kd9bs".into()),
                ..Default::default()
            },
        );

        assert!(response.headers.to().unwrap().tag().is_none());
    }

    #[test]
    fn test_new_response_appends_extra_headers_in_order() {
        let request = invite();
        let response = request.new_response(
            StatusCode::OK,
            ResponseOptions {
                headers: vec![
                    Header::parse_named("X-Extra", "1").unwrap(),
                    Header::parse_named("X-Extra", "2").unwrap(),
                ],
                ..Default::default()
            },
        );

        let extras: Vec<String> = response.headers.get("X-Extra").map(|h| h.to_string()).collect();
        assert_eq!(extras, ["X-Extra: 1", "X-Extra: 2"]);
    }

    #[test]
    fn test_reason_phrase_compares_case_insensitively() {
        let a = Response::new(StatusCode::OK);
        let mut b = Response::new(StatusCode::OK);
        b.status_line.reason = "ok".into();

        assert_eq!(a, b);
    }

    #[test]
    fn test_display_is_one_line() {
        let request = invite();
        assert_eq!(request.to_string(), "INVITE sip:bob@biloxi.com SIP/2.0");

        let response = Response::new(StatusCode::RINGING);
        assert_eq!(response.to_string(), "SIP/2.0 180 Ringing");
    }

    #[test]
    fn test_compact_render_exact_bytes() {
        let headers = Headers::from([
            Header::parse_named("Via", "SIP/2.0/UDP a.example.com;branch=z9hG4bK776asdhds").unwrap(),
            Header::parse_named("From", "Alice <sip:alice@a.example.com>;tag=abc").unwrap(),
            Header::parse_named("To", "Bob <sip:bob@b.example.com>").unwrap(),
            Header::parse_named("CSeq", "1 INVITE").unwrap(),
            Header::parse_named("Call-ID", "zxc").unwrap(),
            Header::MaxForwards(MaxForwards::new(70)),
            Header::parse_named("Contact", "<sip:alice@client.a.example.com>").unwrap(),
            Header::parse_named("Content-Type", "text/plain").unwrap(),
            Header::parse_named("Content-Length", "14").unwrap(),
            Header::parse_named("X-Custom", "foo").unwrap(),
            Header::parse_named("P-Custom", "bar").unwrap(),
        ]);
        let mut request = Request::with_headers(
            SipMethod::Invite,
            "sip:bob@b.example.com".parse().unwrap(),
            headers,
        );
        request.body = b"Hello world!\r\n".to_vec();

        let rendered = request.render(RenderOptions { compact: true });

        // Compact forms for the headers RFC 3261 §20 lists one for; CSeq
        // and Max-Forwards stay long. Unknown headers keep insertion
        // order after the well-known block.
        let expected = "INVITE sip:bob@b.example.com SIP/2.0\r\n\
            v: SIP/2.0/UDP a.example.com;branch=z9hG4bK776asdhds\r\n\
            f: Alice <sip:alice@a.example.com>;tag=abc\r\n\
            t: Bob <sip:bob@b.example.com>\r\n\
            i: zxc\r\n\
            CSeq: 1 INVITE\r\n\
            m: <sip:alice@client.a.example.com>\r\n\
            Max-Forwards: 70\r\n\
            c: text/plain\r\n\
            l: 14\r\n\
            X-Custom: foo\r\n\
            P-Custom: bar\r\n\
            \r\n\
            Hello world!\r\n";
        assert_eq!(String::from_utf8(rendered).unwrap(), expected);
    }

    #[test]
    fn test_zero_value_render_round_trips_to_zero() {
        let zero = Request::default();
        let rendered = zero.render(RenderOptions::default());
        assert_eq!(rendered, b"OPTIONS sip: SIP/2.0\r\n\r\n");

        let parsed = crate::parser::Parser::parse(&rendered).unwrap();
        assert_eq!(parsed.request(), Some(&zero));

        let zero = Response::default();
        let parsed = crate::parser::Parser::parse(&zero.render(RenderOptions::default())).unwrap();
        assert_eq!(parsed.response(), Some(&zero));
    }

    #[test]
    fn test_equality_laws_over_options() {
        let request = invite();
        let zero = Request::default();

        assert_eq!(request, request.clone());
        assert_eq!(Some(&zero), Some(&Request::default()));
        assert_ne!(Some(&zero), None::<&Request>);
        assert_eq!(None::<&Request>, None::<&Request>);
    }

    #[test]
    fn test_render_to_reports_bytes_written() {
        let request = invite();
        let mut sink = Vec::new();

        let written = request.render_to(&mut sink, RenderOptions::default()).unwrap();

        assert_eq!(written, sink.len());
        assert_eq!(sink, request.render(RenderOptions::default()));
    }

    #[test]
    fn test_json_round_trip() {
        let request = invite();
        let json = serde_json::to_string(&request).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(request, back);
    }

    #[test]
    fn test_zero_value_json_round_trip() {
        let zero = Response::default();
        let json = serde_json::to_string(&zero).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();

        assert_eq!(zero, back);
    }

    #[test]
    fn test_empty_object_deserializes_to_the_zero_value() {
        let request: Request = serde_json::from_str("{}").unwrap();
        assert_eq!(request, Request::default());

        let response: Response = serde_json::from_str("{}").unwrap();
        assert_eq!(response, Response::default());
    }
}
