//! INVITE server transaction tests, RFC 3261 §17.2.1 + RFC 6026.
//!
//!                        |INVITE
//!                        |pass INV to TU
//!     INVITE             V send 100 if TU won't in 200ms
//!     send response+-----------+       2xx from TU
//!         +--------|           |------------------+
//!         |        | Proceeding|                  |
//!         +------->|           |<------+          V
//!                  |           | 1xx from TU  +----------+
//!                  +-----------+ send         | Accepted |
//!     300-699 from TU |                       +----------+
//!     send response   |           2xx from TU: resend |
//!                     V           ACK: pass to TU     |Timer L
//!     INVITE       +-----------+                      |
//!     send resp    | Completed |--+ Timer G: resend   |
//!         +------->|           |<-+                   |
//!         +--------+-----------+                      |
//!                     | ACK        Timer H            |
//!                     V                               |
//!                  +-----------+                      |
//!                  | Confirmed |                      |
//!                  +-----------+                      |
//!                     |Timer I                        |
//!                     V                               V
//!                  +-----------+<---------------------+
//!                  |Terminated |
//!                  +-----------+

use std::sync::Weak;
use std::time::Duration;

use tokio::time;

use crate::message::{SipMethod, StatusCode};
use crate::test_utils::transaction::{ack_for, fast_timings, incoming_request, settle};
use crate::test_utils::transport::MockTransport;
use crate::transaction::{InviteServerTransaction, State, Termination, TransactionMessage};
use crate::transport::IncomingRequest;

fn start(transport: &MockTransport) -> (InviteServerTransaction, IncomingRequest) {
    let request = incoming_request(SipMethod::Invite, transport.clone().into_transport());
    let tsx = InviteServerTransaction::start(&request, fast_timings(), Weak::new())
        .expect("transaction must start");
    (tsx, request)
}

fn retransmit(tsx: &InviteServerTransaction, request: &IncomingRequest) {
    tsx.core
        .sender
        .send(TransactionMessage::Request(request.clone()))
        .expect("transaction task must be alive");
}

#[tokio::test(start_paused = true)]
async fn absorbs_ack_after_non_2xx_final() {
    let transport = MockTransport::new_udp();
    let (tsx, request) = start(&transport);

    tsx.respond(StatusCode::BUSY_HERE).unwrap();
    settle().await;
    assert_eq!(tsx.state(), State::Completed);
    assert_eq!(transport.sent_count(), 1);
    assert_eq!(
        transport.last_message().unwrap().response().unwrap().code(),
        StatusCode::BUSY_HERE
    );

    retransmit(&tsx, &ack_for(&request));
    settle().await;
    assert_eq!(tsx.state(), State::Confirmed);
    assert_eq!(transport.sent_count(), 1, "the ACK is absorbed, nothing sent");

    time::sleep(fast_timings().t4 + Duration::from_millis(100)).await;
    settle().await;
    assert_eq!(tsx.state(), State::Terminated);
    assert_eq!(tsx.termination(), Some(Termination::Normal));
}

#[tokio::test(start_paused = true)]
async fn auto_emits_100_trying_when_the_tu_stays_quiet() {
    let transport = MockTransport::new_udp();
    let (tsx, _request) = start(&transport);

    assert_eq!(tsx.state(), State::Proceeding);
    assert_eq!(transport.sent_count(), 0);

    time::sleep(fast_timings().t100 + Duration::from_millis(50)).await;
    settle().await;

    assert_eq!(transport.sent_count(), 1);
    let sent = transport.last_message().unwrap();
    assert_eq!(sent.response().unwrap().code(), StatusCode::TRYING);
    assert_eq!(tsx.state(), State::Proceeding);
}

#[tokio::test(start_paused = true)]
async fn a_prompt_provisional_suppresses_the_auto_100() {
    let transport = MockTransport::new_udp();
    let (tsx, _request) = start(&transport);

    tsx.respond(StatusCode::RINGING).unwrap();
    settle().await;

    time::sleep(fast_timings().t100 + Duration::from_millis(50)).await;
    settle().await;

    assert_eq!(transport.sent_count(), 1, "only the 180 went out");
    assert_eq!(
        transport.last_message().unwrap().response().unwrap().code(),
        StatusCode::RINGING
    );
}

#[tokio::test(start_paused = true)]
async fn invite_retransmission_retriggers_the_last_response() {
    let transport = MockTransport::new_udp();
    let (tsx, request) = start(&transport);

    tsx.respond(StatusCode::RINGING).unwrap();
    settle().await;
    assert_eq!(transport.sent_count(), 1);

    retransmit(&tsx, &request);
    retransmit(&tsx, &request);
    settle().await;
    assert_eq!(transport.sent_count(), 3);

    tsx.respond(StatusCode::BUSY_HERE).unwrap();
    settle().await;
    retransmit(&tsx, &request);
    settle().await;
    assert_eq!(transport.sent_count(), 5);
    assert_eq!(
        transport.last_message().unwrap().response().unwrap().code(),
        StatusCode::BUSY_HERE
    );
}

#[tokio::test(start_paused = true)]
async fn timer_g_retransmits_the_final_until_the_ack() {
    let transport = MockTransport::new_udp();
    let (tsx, request) = start(&transport);
    let timings = fast_timings();

    tsx.respond(StatusCode::BUSY_HERE).unwrap();
    settle().await;
    assert_eq!(transport.sent_count(), 1);

    time::sleep(timings.t1 + Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(transport.sent_count(), 2);

    time::sleep(timings.t1 * 2 + Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(transport.sent_count(), 3);

    retransmit(&tsx, &ack_for(&request));
    settle().await;
    assert_eq!(tsx.state(), State::Confirmed);

    time::sleep(timings.t1 * 8).await;
    settle().await;
    assert_eq!(transport.sent_count(), 3, "the ACK stops timer G");
}

#[tokio::test(start_paused = true)]
async fn timer_h_gives_up_on_the_missing_ack() {
    let transport = MockTransport::new_udp();
    let (tsx, _request) = start(&transport);

    tsx.respond(StatusCode::BUSY_HERE).unwrap();
    settle().await;
    assert_eq!(tsx.state(), State::Completed);

    time::sleep(fast_timings().t1x64() + Duration::from_millis(200)).await;
    settle().await;

    assert_eq!(tsx.state(), State::Terminated);
    assert_eq!(tsx.termination(), Some(Termination::TimerH));
}

#[tokio::test(start_paused = true)]
async fn a_2xx_moves_to_accepted_and_routes_acks_to_the_tu() {
    let transport = MockTransport::new_udp();
    let (tsx, request) = start(&transport);
    let mut acks = tsx.requests().unwrap();

    tsx.respond(StatusCode::OK).unwrap();
    settle().await;
    assert_eq!(tsx.state(), State::Accepted);

    // The TU retransmits its 2xx through the transaction.
    tsx.respond(StatusCode::OK).unwrap();
    settle().await;
    assert_eq!(transport.sent_count(), 2);

    retransmit(&tsx, &ack_for(&request));
    settle().await;
    assert_eq!(tsx.state(), State::Accepted, "an ACK for a 2xx is TU business");
    assert_eq!(acks.try_recv().unwrap().method(), &SipMethod::Ack);

    time::sleep(fast_timings().t1x64() + Duration::from_millis(100)).await;
    settle().await;
    assert_eq!(tsx.state(), State::Terminated);
    assert_eq!(tsx.termination(), Some(Termination::Normal));
}

#[tokio::test(start_paused = true)]
async fn reliable_transport_confirms_and_terminates_without_timer_i() {
    let transport = MockTransport::new_tcp();
    let (tsx, request) = start(&transport);

    tsx.respond(StatusCode::BUSY_HERE).unwrap();
    settle().await;
    assert_eq!(tsx.state(), State::Completed);

    retransmit(&tsx, &ack_for(&request));
    settle().await;

    assert_eq!(tsx.state(), State::Terminated);
    assert_eq!(tsx.termination(), Some(Termination::Normal));
}

#[tokio::test]
async fn rejects_non_invite_requests() {
    let transport = MockTransport::new_udp();
    let request = incoming_request(SipMethod::Options, transport.into_transport());

    let result = InviteServerTransaction::start(&request, fast_timings(), Weak::new());
    assert_matches!(result, Err(crate::Error::MethodNotAllowed(_)));
}
