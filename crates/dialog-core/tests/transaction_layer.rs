//! Transaction layer timing and matching, driven through the public manager
//! with a recording transport and paused time.

mod common;

use std::time::Duration;

use sipstack_dialog_core::transaction::utils::{create_ack_from_invite, create_cancel, create_response};
use sipstack_dialog_core::transaction::{TransactionEvent, TransactionKey, TransactionState};
use sipstack_sip_core::builder::SimpleResponseBuilder;
use sipstack_sip_core::{Method, StatusCode, TransportType};
use tokio::sync::mpsc;

use common::{alice_addr, bob_addr, request_from, settle, transaction_layer};

fn drain(events: &mut mpsc::UnboundedReceiver<TransactionEvent>) -> Vec<TransactionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

#[tokio::test(start_paused = true)]
async fn test_invite_retransmitted_until_timer_b() {
    let (transport, manager, mut events) = transaction_layer(TransportType::Udp);
    let invite = request_from(Method::Invite, alice_addr(), TransportType::Udp);
    let key = manager.send_request(invite, bob_addr()).await.unwrap();
    assert_eq!(manager.state(&key), Some(TransactionState::Calling));

    tokio::time::sleep(Duration::from_secs(40)).await;

    // 0, 0.5, 1.5, 3.5, 7.5, 15.5 and 31.5 s; Timer B fires at 32 s
    assert_eq!(transport.sent_requests(Method::Invite).len(), 7);
    let timeouts = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, TransactionEvent::Timeout { transaction_id } if *transaction_id == key))
        .count();
    assert_eq!(timeouts, 1);
    assert_eq!(manager.state(&key), None);
}

#[tokio::test(start_paused = true)]
async fn test_invite_not_retransmitted_over_tcp() {
    let (transport, manager, mut events) = transaction_layer(TransportType::Tcp);
    let invite = request_from(Method::Invite, alice_addr(), TransportType::Tcp);
    let key = manager.send_request(invite, bob_addr()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(transport.sent_requests(Method::Invite).len(), 1);
    assert_eq!(manager.state(&key), Some(TransactionState::Calling));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, TransactionEvent::Timeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_non_invite_interval_capped_at_t2() {
    let (transport, manager, mut events) = transaction_layer(TransportType::Udp);
    let options = request_from(Method::Options, alice_addr(), TransportType::Udp);
    manager.send_request(options, bob_addr()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(40)).await;

    // Intervals 0.5, 1, 2, then 4 s until Timer F at 32 s
    assert_eq!(transport.sent_requests(Method::Options).len(), 11);
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, TransactionEvent::Timeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_no_retransmission_after_final_response() {
    let (transport, manager, mut events) = transaction_layer(TransportType::Udp);
    let options = request_from(Method::Options, alice_addr(), TransportType::Udp);
    let key = manager.send_request(options.clone(), bob_addr()).await.unwrap();

    let ok = SimpleResponseBuilder::response_from_request(&options, StatusCode::Ok)
        .to_tag("kd93h2")
        .build();
    manager.handle_message(ok.clone().into(), bob_addr()).await;
    settle().await;
    assert_eq!(manager.state(&key), Some(TransactionState::Completed));

    // A retransmitted 200 is absorbed
    manager.handle_message(ok.into(), bob_addr()).await;
    tokio::time::sleep(Duration::from_secs(4)).await;

    assert_eq!(transport.sent_requests(Method::Options).len(), 1);
    let successes = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, TransactionEvent::SuccessResponse { .. }))
        .count();
    assert_eq!(successes, 1);

    // Timer K is T4 on UDP
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(manager.state(&key), None);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_requests_answered_from_transaction() {
    let (transport, manager, mut events) = transaction_layer(TransportType::Udp);
    let invite = request_from(Method::Invite, bob_addr(), TransportType::Udp);

    manager.handle_message(invite.clone().into(), bob_addr()).await;
    settle().await;
    let key = match drain(&mut events).as_slice() {
        [TransactionEvent::NewRequest { transaction_id, .. }] => transaction_id.clone(),
        other => panic!("expected one NewRequest, got {:?}", other),
    };
    assert_eq!(Some(&key), TransactionKey::for_server_request(&invite).as_ref());

    let ringing = SimpleResponseBuilder::response_from_request(&invite, StatusCode::Ringing)
        .to_tag("a6c85cf")
        .build();
    manager.send_response(&key, ringing).await.unwrap();

    for _ in 0..3 {
        manager.handle_message(invite.clone().into(), bob_addr()).await;
    }
    settle().await;

    assert_eq!(
        transport.sent_responses(Method::Invite, StatusCode::Ringing).len(),
        4
    );
    assert!(drain(&mut events)
        .iter()
        .all(|event| !matches!(event, TransactionEvent::NewRequest { .. })));
    // The 180 suppressed the automatic 100 Trying
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(transport
        .sent_responses(Method::Invite, StatusCode::Trying)
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_automatic_trying_after_200ms() {
    let (transport, manager, _events) = transaction_layer(TransportType::Udp);
    let invite = request_from(Method::Invite, bob_addr(), TransportType::Udp);
    manager.handle_message(invite.into(), bob_addr()).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(transport
        .sent_responses(Method::Invite, StatusCode::Trying)
        .is_empty());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        transport
            .sent_responses(Method::Invite, StatusCode::Trying)
            .len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_failure_response_retransmitted_until_ack() {
    let (transport, manager, mut events) = transaction_layer(TransportType::Udp);
    let invite = request_from(Method::Invite, bob_addr(), TransportType::Udp);
    manager.handle_message(invite.clone().into(), bob_addr()).await;
    settle().await;
    let key = TransactionKey::for_server_request(&invite).unwrap();

    let busy = SimpleResponseBuilder::response_from_request(&invite, StatusCode::BusyHere)
        .to_tag("z9s8x7")
        .build();
    manager.send_response(&key, busy.clone()).await.unwrap();
    assert_eq!(manager.state(&key), Some(TransactionState::Completed));

    // Timer G fired once at 0.5 s
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(
        transport
            .sent_responses(Method::Invite, StatusCode::BusyHere)
            .len(),
        2
    );

    let ack = create_ack_from_invite(&invite, &busy).unwrap();
    manager.handle_message(ack.into(), bob_addr()).await;
    settle().await;
    assert_eq!(manager.state(&key), Some(TransactionState::Confirmed));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(
        transport
            .sent_responses(Method::Invite, StatusCode::BusyHere)
            .len(),
        2
    );
    assert_eq!(manager.state(&key), None);
    // The ACK for a non-2xx never reaches the user
    assert!(drain(&mut events)
        .iter()
        .all(|event| !matches!(event, TransactionEvent::AckReceived { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_missing_ack_reported_after_timer_h() {
    let (_transport, manager, mut events) = transaction_layer(TransportType::Udp);
    let invite = request_from(Method::Invite, bob_addr(), TransportType::Udp);
    manager.handle_message(invite.clone().into(), bob_addr()).await;
    settle().await;
    let key = TransactionKey::for_server_request(&invite).unwrap();
    let busy = create_response(&invite, StatusCode::BusyHere);
    manager.send_response(&key, busy).await.unwrap();

    tokio::time::sleep(Duration::from_secs(33)).await;
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        TransactionEvent::TransportError { transaction_id, .. } if *transaction_id == key
    )));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_for_pending_invite() {
    let (transport, manager, mut events) = transaction_layer(TransportType::Udp);
    let invite = request_from(Method::Invite, bob_addr(), TransportType::Udp);
    manager.handle_message(invite.clone().into(), bob_addr()).await;
    settle().await;
    drain(&mut events);

    let cancel = create_cancel(&invite).unwrap();
    manager.handle_message(cancel.into(), bob_addr()).await;
    settle().await;

    assert_eq!(
        transport.sent_responses(Method::Cancel, StatusCode::Ok).len(),
        1
    );
    let invite_key = TransactionKey::for_server_request(&invite).unwrap();
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        TransactionEvent::CancelReceived { transaction_id, .. } if *transaction_id == invite_key
    )));
}

#[tokio::test(start_paused = true)]
async fn test_stray_cancel_gets_481() {
    let (transport, manager, mut events) = transaction_layer(TransportType::Udp);
    let invite = request_from(Method::Invite, bob_addr(), TransportType::Udp);
    let cancel = create_cancel(&invite).unwrap();
    manager.handle_message(cancel.into(), bob_addr()).await;
    settle().await;

    assert_eq!(
        transport
            .sent_responses(Method::Cancel, StatusCode::CallOrTransactionDoesNotExist)
            .len(),
        1
    );
    assert!(drain(&mut events)
        .iter()
        .all(|event| !matches!(event, TransactionEvent::CancelReceived { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_response_discarded() {
    let (_transport, manager, mut events) = transaction_layer(TransportType::Udp);
    let options = request_from(Method::Options, alice_addr(), TransportType::Udp);
    let ok = create_response(&options, StatusCode::Ok);
    manager.handle_message(ok.into(), bob_addr()).await;
    settle().await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_provisional_event_follows_state_change() {
    let (transport, manager, mut events) = transaction_layer(TransportType::Udp);
    for _ in 0..200 {
        let invite = request_from(Method::Invite, alice_addr(), TransportType::Udp);
        let key = manager.send_request(invite.clone(), bob_addr()).await.unwrap();
        let ringing = SimpleResponseBuilder::response_from_request(&invite, StatusCode::Ringing)
            .to_tag("a8f7c1")
            .build();
        manager.handle_message(ringing.into(), bob_addr()).await;

        loop {
            if let TransactionEvent::ProvisionalResponse { transaction_id, .. } =
                events.recv().await.unwrap()
            {
                if transaction_id == key {
                    break;
                }
            }
        }
        assert_eq!(manager.state(&key), Some(TransactionState::Proceeding));
        manager.cancel(&key).await.unwrap();
        manager.abort(&key).await.unwrap();
    }
    assert_eq!(transport.sent_requests(Method::Cancel).len(), 200);
}
