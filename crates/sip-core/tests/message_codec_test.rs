//! Tests for building messages and running them through the text codec

use sipstack_sip_core::builder::{generate_branch, SimpleRequestBuilder, SimpleResponseBuilder};
use sipstack_sip_core::{parse_message, Method, RAck, StatusCode, TransportType, Via};

fn prack_request() -> sipstack_sip_core::Request {
    SimpleRequestBuilder::new(Method::Prack, "sip:bob@192.0.2.4:5060".parse().unwrap())
        .from("sip:alice@192.0.2.1".parse().unwrap(), Some("a1"))
        .to("sip:bob@192.0.2.4".parse().unwrap(), Some("b1"))
        .call_id("prack-test@192.0.2.1")
        .cseq(2)
        .via(Via::new(TransportType::Tcp, "192.0.2.1:5060".parse().unwrap(), generate_branch()))
        .rack(RAck {
            rseq: 1,
            cseq: 1,
            method: Method::Invite,
        })
        .build()
        .unwrap()
}

#[test]
fn test_prack_serialization() {
    let request = prack_request();
    let text = String::from_utf8(request.to_bytes().to_vec()).unwrap();
    assert!(text.starts_with("PRACK sip:bob@192.0.2.4:5060 SIP/2.0\r\n"));
    assert!(text.contains("RAck: 1 1 INVITE\r\n"));
    assert!(text.contains("CSeq: 2 PRACK\r\n"));
    assert!(text.ends_with("Content-Length: 0\r\n\r\n"));
}

#[test]
fn test_response_through_codec() {
    let request = prack_request();
    let response = SimpleResponseBuilder::response_from_request(&request, StatusCode::Ok)
        .body("application/sdp", "v=0\r\n")
        .build();

    let parsed = parse_message(&response.to_bytes()).unwrap();
    let parsed = parsed.as_response().unwrap();
    assert_eq!(parsed.status, StatusCode::Ok);
    assert_eq!(parsed.reason, "OK");
    assert_eq!(parsed.to_tag(), Some("b1"));
    assert_eq!(parsed.branch(), request.branch());
    assert_eq!(parsed.headers.content_type.as_deref(), Some("application/sdp"));
    assert_eq!(&parsed.body[..], b"v=0\r\n");
}

#[test]
fn test_custom_reason_phrase_kept() {
    let raw = b"SIP/2.0 486 Gone Fishing\r\n\
Via: SIP/2.0/UDP 192.0.2.1;branch=z9hG4bK1\r\n\
From: <sip:a@192.0.2.1>;tag=1\r\n\
To: <sip:b@192.0.2.2>;tag=2\r\n\
Call-ID: busy\r\n\
CSeq: 1 INVITE\r\n\r\n";
    let message = parse_message(raw).unwrap();
    let response = message.as_response().unwrap();
    assert_eq!(response.status, StatusCode::BusyHere);
    assert_eq!(response.reason, "Gone Fishing");
    assert!(response.status.is_failure());
}

#[test]
fn test_cseq_method_mismatch_rejected() {
    let raw = b"BYE sip:b@192.0.2.2 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.0.2.1;branch=z9hG4bK1\r\n\
From: <sip:a@192.0.2.1>;tag=1\r\n\
To: <sip:b@192.0.2.2>;tag=2\r\n\
Call-ID: mismatch\r\n\
CSeq: 1 INVITE\r\n\r\n";
    assert!(parse_message(raw).is_err());
}
