use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::headers::{CSeq, Header, Headers, MaxForwards};
use crate::message::{
    MandatoryHeaders, Request, Response, ResponseOptions, SipMethod, StatusCode,
};
use crate::transaction::{State, Timings};
use crate::transport::{
    IncomingInfo, IncomingRequest, IncomingResponse, OutgoingRequest, Packet, TargetInfo,
    Transport,
};

pub const FROM_HDR_STR: &str = "Alice <sip:alice@localhost>;tag=1928301774";
pub const TO_HDR_STR: &str = "Bob <sip:bob@localhost>";
pub const CALLID_STR: &str = "a84b4c76e66710@pc33.atlanta.com";
pub const REMOTE_ADDR: &str = "55.55.55.55:5060";

/// Asserts that the next state observed on the watcher equals the
/// expectation.
#[macro_export]
macro_rules! assert_state_eq {
    ($watcher:expr, $state:expr $(,)?) => {{
        $crate::assert_state_eq!($watcher, $state,)
    }};

    ($watcher:expr, $state:expr, $($arg:tt)*) => {{
        $crate::test_utils::transaction::wait_state_change(&mut $watcher).await;
        assert_eq!(*$watcher.borrow(), $state, $($arg)*);
    }};
}

pub async fn wait_state_change(state: &mut watch::Receiver<State>) {
    timeout(Duration::from_secs(1), state.changed())
        .await
        .expect("timeout reached and no state change received")
        .expect("the state channel has been closed");
}

/// Lets the transaction tasks drain their queues.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// T1 shrunk so timer-driven tests stay quick under the paused clock.
pub fn fast_timings() -> Timings {
    Timings::with_t1(Duration::from_millis(20))
}

fn request_headers(method: &SipMethod, branch: &str) -> Headers {
    Headers::from([
        Header::parse_named("Via", &format!("SIP/2.0/UDP localhost:5060;branch={branch}")).unwrap(),
        Header::parse_named("From", FROM_HDR_STR).unwrap(),
        Header::parse_named("To", TO_HDR_STR).unwrap(),
        Header::parse_named("Call-ID", CALLID_STR).unwrap(),
        Header::CSeq(CSeq::new(1, method.clone())),
        Header::MaxForwards(MaxForwards::new(70)),
    ])
}

pub fn test_request(method: SipMethod) -> Request {
    let branch = crate::generate_branch();
    Request::with_headers(
        method.clone(),
        "sip:bob@localhost".parse().unwrap(),
        request_headers(&method, &branch),
    )
}

/// A request as a client transaction sends it.
pub fn outgoing_request(method: SipMethod, transport: Transport) -> OutgoingRequest {
    OutgoingRequest::new(
        test_request(method),
        TargetInfo {
            target: REMOTE_ADDR.parse().unwrap(),
            transport,
        },
    )
}

/// A request as a server transaction receives it.
pub fn incoming_request(method: SipMethod, transport: Transport) -> IncomingRequest {
    let request = test_request(method);
    let mandatory = MandatoryHeaders::try_from(&request.headers).unwrap();
    let packet = Packet::new(Bytes::new(), REMOTE_ADDR.parse().unwrap());

    IncomingRequest::new(request, IncomingInfo::new(mandatory, transport, packet))
}

/// Rewrites an incoming request into the matching ACK, branch preserved.
pub fn ack_for(request: &IncomingRequest) -> IncomingRequest {
    let mut ack = request.clone();
    ack.request.req_line.method = SipMethod::Ack;
    let seq = ack.request.headers.cseq().map(|cseq| cseq.seq);
    if let Some(seq) = seq {
        ack.request
            .headers
            .set_header(Header::CSeq(CSeq::new(seq, SipMethod::Ack)));
    }
    ack.info.mandatory = MandatoryHeaders::try_from(&ack.request.headers).unwrap();
    ack
}

/// A response matching the given request, as the transaction layer
/// would deliver it.
pub fn response_for(request: &OutgoingRequest, code: StatusCode, transport: Transport) -> IncomingResponse {
    let response = build_response(&request.request, code);
    let mandatory = MandatoryHeaders::try_from(&response.headers).unwrap();
    let packet = Packet::new(Bytes::new(), REMOTE_ADDR.parse().unwrap());

    IncomingResponse::new(response, IncomingInfo::new(mandatory, transport, packet))
}

pub fn build_response(request: &Request, code: StatusCode) -> Response {
    request.new_response(
        code,
        ResponseOptions {
            local_tag: code.is_final().then(|| "as83kd9bs".to_string()),
            ..Default::default()
        },
    )
}
