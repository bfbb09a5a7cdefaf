mod server_invite;

use std::sync::Arc;

use crate::message::{SipMethod, StatusCode};
use crate::test_utils::transaction::{
    ack_for, fast_timings, incoming_request, outgoing_request, response_for, settle,
};
use crate::test_utils::transport::MockTransport;
use crate::transaction::{
    ClientTransaction, InviteServerTransaction, ServerTransaction, State, TransactionLayer,
};

#[tokio::test]
async fn layer_matches_request_retransmissions_to_their_transaction() {
    let layer = Arc::new(TransactionLayer::default());
    let transport = MockTransport::new_udp();
    let request = incoming_request(SipMethod::Register, transport.clone().into_transport());

    let _tsx = ServerTransaction::start(&request, fast_timings(), Arc::downgrade(&layer)).unwrap();
    assert_eq!(layer.server_count(), 1);

    // Identical top Via branch and method: matched.
    assert!(layer.handle_request(&request.clone()));

    // A different branch is a different transaction.
    let other = incoming_request(SipMethod::Register, transport.into_transport());
    assert!(!layer.handle_request(&other));
}

#[tokio::test]
async fn layer_matches_responses_by_branch_and_cseq_method() {
    let layer = Arc::new(TransactionLayer::default());
    let transport = MockTransport::new_udp();
    let request = outgoing_request(SipMethod::Options, transport.clone().into_transport());

    let tsx = ClientTransaction::start(request.clone(), fast_timings(), Arc::downgrade(&layer))
        .await
        .unwrap();
    let mut responses = tsx.responses().unwrap();

    let response = response_for(&request, StatusCode::OK, transport.clone().into_transport());
    assert!(layer.handle_response(&response));
    settle().await;
    assert_eq!(responses.try_recv().unwrap().code(), StatusCode::OK);

    // Same branch, different CSeq method: no match.
    let mut mismatched = response_for(&request, StatusCode::OK, transport.into_transport());
    mismatched.info.mandatory.cseq.method = SipMethod::Invite;
    assert!(!layer.handle_response(&mismatched));
}

#[tokio::test]
async fn layer_routes_the_ack_into_the_invite_server_transaction() {
    let layer = Arc::new(TransactionLayer::default());
    let transport = MockTransport::new_udp();
    let request = incoming_request(SipMethod::Invite, transport.clone().into_transport());

    let tsx =
        InviteServerTransaction::start(&request, fast_timings(), Arc::downgrade(&layer)).unwrap();
    tsx.respond(StatusCode::BUSY_HERE).unwrap();
    settle().await;
    assert_eq!(tsx.state(), State::Completed);

    // The ACK key collapses into the INVITE key.
    assert!(layer.handle_request(&ack_for(&request)));
    settle().await;
    assert_eq!(tsx.state(), State::Confirmed);
}

#[tokio::test]
async fn terminated_transactions_leave_the_layer() {
    let layer = Arc::new(TransactionLayer::default());
    let transport = MockTransport::new_udp();
    let request = incoming_request(SipMethod::Register, transport.into_transport());

    let tsx = ServerTransaction::start(&request, fast_timings(), Arc::downgrade(&layer)).unwrap();
    assert_eq!(layer.server_count(), 1);

    tsx.terminate();
    settle().await;

    assert_eq!(layer.server_count(), 0);
    assert!(!layer.handle_request(&request));
}

#[tokio::test]
async fn responses_without_a_branch_cannot_be_matched() {
    // A response whose Via lacks the branch cannot be keyed at all.
    let transport = MockTransport::new_udp();
    let layer = TransactionLayer::default();
    let request = outgoing_request(SipMethod::Options, transport.clone().into_transport());
    let mut response = response_for(&request, StatusCode::OK, transport.into_transport());
    response.info.mandatory.via.branch = None;

    assert!(!layer.handle_response(&response));
}
