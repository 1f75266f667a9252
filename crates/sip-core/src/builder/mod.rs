//! # Message builders
//!
//! Fluent builders for requests and responses plus the generators for the
//! identifiers RFC 3261 requires to be unique (branch, tag, Call-ID).
//!
//! ```rust
//! use sipstack_sip_core::builder::{generate_branch, SimpleRequestBuilder, SimpleResponseBuilder};
//! use sipstack_sip_core::{Method, StatusCode, TransportType, Via};
//!
//! let request = SimpleRequestBuilder::new(Method::Invite, "sip:bob@192.0.2.4".parse().unwrap())
//!     .from("sip:alice@192.0.2.1".parse().unwrap(), Some("a73kszlfl"))
//!     .to("sip:bob@192.0.2.4".parse().unwrap(), None)
//!     .call_id("1j9FpLxk3uxtm8tn@192.0.2.1")
//!     .cseq(1)
//!     .via(Via::new(TransportType::Udp, "192.0.2.1:5060".parse().unwrap(), generate_branch()))
//!     .build()
//!     .unwrap();
//!
//! let ringing = SimpleResponseBuilder::response_from_request(&request, StatusCode::Ringing)
//!     .to_tag("8321234356")
//!     .build();
//! assert_eq!(ringing.to_tag(), Some("8321234356"));
//! assert_eq!(ringing.cseq().seq, 1);
//! ```

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::message::{Headers, Request, Response, EXT_100REL};
use crate::types::{CSeq, Method, NameAddr, RAck, StatusCode, Uri, Via, BRANCH_MAGIC_COOKIE};

/// Fresh RFC 3261 branch (`z9hG4bK` + random suffix)
pub fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, uuid::Uuid::new_v4().simple())
}

/// Fresh From/To tag
pub fn generate_tag() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Fresh Call-ID scoped to the given host
pub fn generate_call_id(host: &str) -> String {
    format!("{}@{}", uuid::Uuid::new_v4().simple(), host)
}

/// Builder for SIP requests
#[derive(Debug, Clone)]
pub struct SimpleRequestBuilder {
    method: Method,
    uri: Uri,
    from: Option<NameAddr>,
    to: Option<NameAddr>,
    call_id: Option<String>,
    cseq: Option<u32>,
    via: Vec<Via>,
    max_forwards: u32,
    contact: Option<NameAddr>,
    route: Vec<NameAddr>,
    rack: Option<RAck>,
    require: Vec<String>,
    supported: Vec<String>,
    content_type: Option<String>,
    user_agent: Option<String>,
    other: Vec<(String, String)>,
    body: Bytes,
}

impl SimpleRequestBuilder {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            from: None,
            to: None,
            call_id: None,
            cseq: None,
            via: Vec::new(),
            max_forwards: 70,
            contact: None,
            route: Vec::new(),
            rack: None,
            require: Vec::new(),
            supported: Vec::new(),
            content_type: None,
            user_agent: None,
            other: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn from(mut self, uri: Uri, tag: Option<&str>) -> Self {
        let mut addr = NameAddr::new(uri);
        addr.tag = tag.map(str::to_string);
        self.from = Some(addr);
        self
    }

    pub fn to(mut self, uri: Uri, tag: Option<&str>) -> Self {
        let mut addr = NameAddr::new(uri);
        addr.tag = tag.map(str::to_string);
        self.to = Some(addr);
        self
    }

    /// Sets From from a full name-addr value
    pub fn from_addr(mut self, addr: NameAddr) -> Self {
        self.from = Some(addr);
        self
    }

    /// Sets To from a full name-addr value
    pub fn to_addr(mut self, addr: NameAddr) -> Self {
        self.to = Some(addr);
        self
    }

    pub fn call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    /// Sequence number; the CSeq method always matches the request method
    pub fn cseq(mut self, seq: u32) -> Self {
        self.cseq = Some(seq);
        self
    }

    /// Pushes a Via below any already added
    pub fn via(mut self, via: Via) -> Self {
        self.via.push(via);
        self
    }

    pub fn max_forwards(mut self, max_forwards: u32) -> Self {
        self.max_forwards = max_forwards;
        self
    }

    pub fn contact(mut self, uri: Uri) -> Self {
        self.contact = Some(NameAddr::new(uri));
        self
    }

    pub fn route(mut self, route: Vec<NameAddr>) -> Self {
        self.route = route;
        self
    }

    pub fn rack(mut self, rack: RAck) -> Self {
        self.rack = Some(rack);
        self
    }

    pub fn require(mut self, option: impl Into<String>) -> Self {
        self.require.push(option.into());
        self
    }

    pub fn supported(mut self, option: impl Into<String>) -> Self {
        self.supported.push(option.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.other.push((name.into(), value.into()));
        self
    }

    /// Attaches a body; an empty body leaves Content-Type unset
    pub fn body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        if !body.is_empty() {
            self.content_type = Some(content_type.into());
        }
        self.body = body;
        self
    }

    pub fn build(self) -> Result<Request> {
        let from = self.from.ok_or(Error::Incomplete("From"))?;
        let to = self.to.ok_or(Error::Incomplete("To"))?;
        let call_id = self.call_id.ok_or(Error::Incomplete("Call-ID"))?;
        let seq = self.cseq.ok_or(Error::Incomplete("CSeq"))?;

        let mut headers = Headers::new(from, to, call_id, CSeq::new(seq, self.method.clone()));
        headers.via = self.via;
        headers.max_forwards = Some(self.max_forwards);
        headers.contact = self.contact;
        headers.route = self.route;
        headers.rack = self.rack;
        headers.require = self.require;
        headers.supported = self.supported;
        headers.content_type = self.content_type;
        headers.user_agent = self.user_agent;
        headers.other = self.other;

        Ok(Request {
            method: self.method,
            uri: self.uri,
            headers,
            body: self.body,
        })
    }
}

/// Builder for responses to a received request
#[derive(Debug, Clone)]
pub struct SimpleResponseBuilder {
    status: StatusCode,
    reason: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl SimpleResponseBuilder {
    /// Starts a response copying Via, From, To, Call-ID, CSeq and
    /// Record-Route from the request (RFC 3261 Section 8.2.6.2)
    pub fn response_from_request(request: &Request, status: StatusCode) -> Self {
        let source = &request.headers;
        let mut headers = Headers::new(
            source.from.clone(),
            source.to.clone(),
            source.call_id.clone(),
            source.cseq.clone(),
        );
        headers.via = source.via.clone();
        headers.record_route = source.record_route.clone();
        Self {
            status,
            reason: None,
            headers,
            body: Bytes::new(),
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the To tag unless the request already carried one
    pub fn to_tag(mut self, tag: impl Into<String>) -> Self {
        if self.headers.to.tag.is_none() {
            self.headers.to.tag = Some(tag.into());
        }
        self
    }

    pub fn contact(mut self, uri: Uri) -> Self {
        self.headers.contact = Some(NameAddr::new(uri));
        self
    }

    /// Marks the response reliable (`Require: 100rel` + `RSeq`)
    pub fn rseq(mut self, rseq: u32) -> Self {
        self.headers.rseq = Some(rseq);
        if !self.headers.requires(EXT_100REL) {
            self.headers.require.push(EXT_100REL.to_string());
        }
        self
    }

    pub fn supported(mut self, option: impl Into<String>) -> Self {
        self.headers.supported.push(option.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.headers.user_agent = Some(user_agent.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.other.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        if !body.is_empty() {
            self.headers.content_type = Some(content_type.into());
        }
        self.body = body;
        self
    }

    pub fn build(self) -> Response {
        let reason = self
            .reason
            .unwrap_or_else(|| self.status.reason_phrase().to_string());
        Response {
            status: self.status,
            reason,
            headers: self.headers,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransportType;

    fn invite() -> Request {
        SimpleRequestBuilder::new(Method::Invite, "sip:bob@127.0.0.1:5070".parse().unwrap())
            .from("sip:alice@127.0.0.1".parse().unwrap(), Some("from-tag"))
            .to("sip:bob@127.0.0.1".parse().unwrap(), None)
            .call_id("call-1@127.0.0.1")
            .cseq(7)
            .via(Via::new(TransportType::Udp, "127.0.0.1:5060".parse().unwrap(), "z9hG4bKabc"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_generators() {
        assert!(generate_branch().starts_with(BRANCH_MAGIC_COOKIE));
        assert_ne!(generate_branch(), generate_branch());
        assert_eq!(generate_tag().len(), 8);
        assert!(generate_call_id("example.com").ends_with("@example.com"));
    }

    #[test]
    fn test_request_builder_requires_mandatory_headers() {
        let result = SimpleRequestBuilder::new(Method::Options, "sip:x@127.0.0.1".parse().unwrap())
            .call_id("c")
            .cseq(1)
            .build();
        assert_eq!(result.unwrap_err(), Error::Incomplete("From"));
    }

    #[test]
    fn test_cseq_method_follows_request() {
        let request = invite();
        assert_eq!(request.cseq(), &CSeq::new(7, Method::Invite));
        assert_eq!(request.headers.max_forwards, Some(70));
    }

    #[test]
    fn test_response_copies_dialog_headers() {
        let request = invite();
        let response = SimpleResponseBuilder::response_from_request(&request, StatusCode::SessionProgress)
            .to_tag("to-tag")
            .rseq(1)
            .build();
        assert_eq!(response.reason, "Session Progress");
        assert_eq!(response.branch(), Some("z9hG4bKabc"));
        assert_eq!(response.from_tag(), Some("from-tag"));
        assert_eq!(response.to_tag(), Some("to-tag"));
        assert!(response.is_reliable_provisional());
    }
}
