//! # SIP messages
//!
//! Requests and responses as structured values. Header syntax is handled by
//! [`crate::parser`]; this module only knows which headers the protocol
//! engine relies on and how to write them back out.

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::{CSeq, Method, NameAddr, RAck, StatusCode, TransportType, Uri, Via};

/// Option tag for reliable provisional responses (RFC 3262)
pub const EXT_100REL: &str = "100rel";

/// Headers carried by every message plus the optional ones the engine uses
#[derive(Debug, Clone, PartialEq)]
pub struct Headers {
    /// Via stack, topmost first
    pub via: Vec<Via>,
    pub from: NameAddr,
    pub to: NameAddr,
    pub call_id: String,
    pub cseq: CSeq,
    pub max_forwards: Option<u32>,
    pub contact: Option<NameAddr>,
    pub route: Vec<NameAddr>,
    pub record_route: Vec<NameAddr>,
    pub rseq: Option<u32>,
    pub rack: Option<RAck>,
    pub require: Vec<String>,
    pub supported: Vec<String>,
    pub content_type: Option<String>,
    pub user_agent: Option<String>,
    /// Headers not modelled above, in order of appearance
    pub other: Vec<(String, String)>,
}

impl Headers {
    pub fn new(from: NameAddr, to: NameAddr, call_id: impl Into<String>, cseq: CSeq) -> Self {
        Self {
            via: Vec::new(),
            from,
            to,
            call_id: call_id.into(),
            cseq,
            max_forwards: None,
            contact: None,
            route: Vec::new(),
            record_route: Vec::new(),
            rseq: None,
            rack: None,
            require: Vec::new(),
            supported: Vec::new(),
            content_type: None,
            user_agent: None,
            other: Vec::new(),
        }
    }

    pub fn top_via(&self) -> Option<&Via> {
        self.via.first()
    }

    pub fn top_via_mut(&mut self) -> Option<&mut Via> {
        self.via.first_mut()
    }

    /// True if `Require` lists the option tag
    pub fn requires(&self, option: &str) -> bool {
        self.require.iter().any(|o| o.eq_ignore_ascii_case(option))
    }

    /// True if `Supported` or `Require` lists the option tag
    pub fn supports(&self, option: &str) -> bool {
        self.requires(option) || self.supported.iter().any(|o| o.eq_ignore_ascii_case(option))
    }

    /// First unmodelled header with the given name
    pub fn get_other(&self, name: &str) -> Option<&str> {
        self.other
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn write_to(&self, out: &mut String, body_len: usize) {
        for via in &self.via {
            let _ = write!(out, "Via: {}\r\n", via);
        }
        if let Some(max_forwards) = self.max_forwards {
            let _ = write!(out, "Max-Forwards: {}\r\n", max_forwards);
        }
        let _ = write!(out, "From: {}\r\n", self.from);
        let _ = write!(out, "To: {}\r\n", self.to);
        let _ = write!(out, "Call-ID: {}\r\n", self.call_id);
        let _ = write!(out, "CSeq: {}\r\n", self.cseq);
        if let Some(contact) = &self.contact {
            let _ = write!(out, "Contact: {}\r\n", contact);
        }
        for route in &self.route {
            let _ = write!(out, "Route: {}\r\n", route);
        }
        for record_route in &self.record_route {
            let _ = write!(out, "Record-Route: {}\r\n", record_route);
        }
        if let Some(rseq) = self.rseq {
            let _ = write!(out, "RSeq: {}\r\n", rseq);
        }
        if let Some(rack) = &self.rack {
            let _ = write!(out, "RAck: {}\r\n", rack);
        }
        if !self.require.is_empty() {
            let _ = write!(out, "Require: {}\r\n", self.require.join(", "));
        }
        if !self.supported.is_empty() {
            let _ = write!(out, "Supported: {}\r\n", self.supported.join(", "));
        }
        if let Some(content_type) = &self.content_type {
            let _ = write!(out, "Content-Type: {}\r\n", content_type);
        }
        if let Some(user_agent) = &self.user_agent {
            let _ = write!(out, "User-Agent: {}\r\n", user_agent);
        }
        for (name, value) in &self.other {
            let _ = write!(out, "{}: {}\r\n", name, value);
        }
        let _ = write!(out, "Content-Length: {}\r\n\r\n", body_len);
    }
}

/// A SIP request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Branch of the topmost Via
    pub fn branch(&self) -> Option<&str> {
        self.headers.top_via().and_then(Via::branch)
    }

    pub fn call_id(&self) -> &str {
        &self.headers.call_id
    }

    pub fn cseq(&self) -> &CSeq {
        &self.headers.cseq
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.headers.from.tag()
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.headers.to.tag()
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Serializes the request to wire format
    pub fn to_bytes(&self) -> Bytes {
        let mut head = String::with_capacity(512);
        let _ = write!(head, "{} {} SIP/2.0\r\n", self.method, self.uri);
        self.headers.write_to(&mut head, self.body.len());
        join(head, &self.body)
    }
}

/// A SIP response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn branch(&self) -> Option<&str> {
        self.headers.top_via().and_then(Via::branch)
    }

    pub fn call_id(&self) -> &str {
        &self.headers.call_id
    }

    pub fn cseq(&self) -> &CSeq {
        &self.headers.cseq
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.headers.from.tag()
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.headers.to.tag()
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// A 1xx (other than 100) sent with `Require: 100rel` and an RSeq
    pub fn is_reliable_provisional(&self) -> bool {
        self.status.is_provisional()
            && self.status != StatusCode::Trying
            && self.headers.requires(EXT_100REL)
            && self.headers.rseq.is_some()
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut head = String::with_capacity(512);
        let _ = write!(head, "SIP/2.0 {} {}\r\n", self.status.as_u16(), self.reason);
        self.headers.write_to(&mut head, self.body.len());
        join(head, &self.body)
    }
}

fn join(head: String, body: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(head.len() + body.len());
    buf.put_slice(head.as_bytes());
    buf.put_slice(body);
    buf.freeze()
}

/// Either kind of SIP message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Message::Request(request) => Some(request),
            Message::Response(_) => None,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Message::Response(response) => Some(response),
            Message::Request(_) => None,
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(request) => &request.headers,
            Message::Response(response) => &response.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Message::Request(request) => &mut request.headers,
            Message::Response(response) => &mut response.headers,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.headers().call_id
    }

    pub fn cseq(&self) -> &CSeq {
        &self.headers().cseq
    }

    pub fn top_via(&self) -> Option<&Via> {
        self.headers().top_via()
    }

    /// Transport named by the topmost Via
    pub fn transport(&self) -> Option<TransportType> {
        self.top_via().map(|via| via.transport)
    }

    pub fn body(&self) -> &Bytes {
        match self {
            Message::Request(request) => &request.body,
            Message::Response(response) => &response.body,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Message::Request(request) => request.to_bytes(),
            Message::Response(response) => response.to_bytes(),
        }
    }

    /// Short description used in log lines
    pub fn summary(&self) -> String {
        match self {
            Message::Request(request) => format!("{} {}", request.method, request.uri),
            Message::Response(response) => {
                format!("{} {} ({})", response.status.as_u16(), response.reason, response.cseq())
            }
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}
