//! Message helpers for the transaction layer

pub mod request_builders;

pub use request_builders::{create_ack_from_invite, create_cancel};

use sipstack_sip_core::builder::SimpleResponseBuilder;
use sipstack_sip_core::{Request, Response, StatusCode};

/// Create a response to `request` without touching the To tag
pub fn create_response(request: &Request, status: StatusCode) -> Response {
    SimpleResponseBuilder::response_from_request(request, status).build()
}

/// The 100 Trying an INVITE server transaction sends on behalf of its TU
pub fn create_trying_response(request: &Request) -> Response {
    create_response(request, StatusCode::Trying)
}
