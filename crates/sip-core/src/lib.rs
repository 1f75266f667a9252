//! # sipstack-sip-core
//!
//! Structured SIP message model shared by the transport, transaction and
//! dialog layers.
//!
//! The crate provides:
//!
//! - value types for methods, status codes, URIs, Via, name-addr, CSeq and RAck
//! - [`Request`], [`Response`] and [`Message`]
//! - fluent builders and identifier generators in [`builder`]
//! - a reference RFC 3261 text codec in [`parser`]
//!
//! ```rust
//! use sipstack_sip_core::{parse_message, Method};
//!
//! let raw = b"OPTIONS sip:carol@192.0.2.8 SIP/2.0\r\n\
//! Via: SIP/2.0/UDP 192.0.2.1:5060;branch=z9hG4bKhjhs8ass877\r\n\
//! To: <sip:carol@192.0.2.8>\r\n\
//! From: <sip:alice@192.0.2.1>;tag=1928301774\r\n\
//! Call-ID: a84b4c76e66710\r\n\
//! CSeq: 63104 OPTIONS\r\n\
//! Content-Length: 0\r\n\r\n";
//!
//! let message = parse_message(raw).unwrap();
//! assert_eq!(message.as_request().unwrap().method, Method::Options);
//! ```

pub mod builder;
pub mod error;
pub mod message;
pub mod parser;
pub mod types;

pub use error::{Error, Result};
pub use message::{Headers, Message, Request, Response, EXT_100REL};
pub use parser::{frame_length, parse_message};
pub use types::{
    CSeq, Method, NameAddr, RAck, Scheme, StatusCode, TransportType, Uri, Via, BRANCH_MAGIC_COOKIE,
};

/// Commonly used items
pub mod prelude {
    pub use crate::builder::{
        generate_branch, generate_call_id, generate_tag, SimpleRequestBuilder, SimpleResponseBuilder,
    };
    pub use crate::{
        CSeq, Error, Headers, Message, Method, NameAddr, RAck, Request, Response, StatusCode,
        TransportType, Uri, Via,
    };
}
