//! Dialog implementation for RFC 3261 SIP dialogs
//!
//! A [`Dialog`] holds the state RFC 3261 Section 12 asks a UA to keep per
//! call leg and knows how to build requests inside it.

use std::net::SocketAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sipstack_sip_core::{CSeq, Headers, Method, NameAddr, Request, Response, Uri, Via};

use super::{DialogId, DialogKey, DialogState, Session};
use crate::errors::{DialogError, DialogResult};

/// A SIP dialog as defined in RFC 3261
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialog {
    pub id: DialogId,
    pub state: DialogState,
    pub call_id: String,
    pub local_uri: Uri,
    pub remote_uri: Uri,
    pub local_tag: Option<String>,
    pub remote_tag: Option<String>,
    /// Last CSeq number we used
    pub local_cseq: u32,
    /// Last CSeq number accepted from the peer; 0 until the first one
    pub remote_cseq: u32,
    /// Where in-dialog requests go (the peer's Contact)
    pub remote_target: Uri,
    /// Route set, in the order Route headers are written
    pub route_set: Vec<Uri>,
    /// True for the UAC side
    pub is_initiator: bool,
    /// Address the dialog was set up with
    pub remote_addr: SocketAddr,
    pub session: Session,
}

impl Dialog {
    /// Dialog for an INVITE we are about to send
    pub fn new_outgoing(
        call_id: String,
        local_uri: Uri,
        local_tag: String,
        remote_uri: Uri,
        cseq: u32,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            id: DialogId::new(),
            state: DialogState::Initial,
            call_id,
            local_uri,
            remote_target: remote_uri.clone(),
            remote_uri,
            local_tag: Some(local_tag),
            remote_tag: None,
            local_cseq: cseq,
            remote_cseq: 0,
            route_set: Vec::new(),
            is_initiator: true,
            remote_addr,
            session: Session::default(),
        }
    }

    /// Dialog for a received INVITE (RFC 3261 Section 12.1.1)
    pub fn from_incoming_invite(
        request: &Request,
        local_tag: String,
        source: SocketAddr,
    ) -> DialogResult<Self> {
        let remote_tag = request
            .from_tag()
            .ok_or_else(|| DialogError::InvalidRequest("INVITE without From tag".into()))?;
        let remote_target = request
            .headers
            .contact
            .as_ref()
            .map(|contact| contact.uri.clone())
            .unwrap_or_else(|| Uri::from_socket_addr(source));

        Ok(Self {
            id: DialogId::new(),
            state: DialogState::Initial,
            call_id: request.call_id().to_string(),
            local_uri: request.headers.to.uri.clone(),
            remote_uri: request.headers.from.uri.clone(),
            local_tag: Some(local_tag),
            remote_tag: Some(remote_tag.to_string()),
            local_cseq: 0,
            remote_cseq: request.cseq().seq,
            remote_target,
            route_set: request
                .headers
                .record_route
                .iter()
                .map(|r| r.uri.clone())
                .collect(),
            is_initiator: false,
            remote_addr: source,
            session: Session {
                local: None,
                remote: body(request.has_body(), &request.body),
            },
        })
    }

    /// Protocol identity, once both tags are known
    pub fn key(&self) -> Option<DialogKey> {
        Some(DialogKey::new(
            self.call_id.clone(),
            self.local_tag.clone()?,
            self.remote_tag.clone()?,
        ))
    }

    /// Takes the remote tag, route set and target from a response that
    /// creates or confirms the dialog (RFC 3261 Section 12.1.2)
    pub fn update_from_response(&mut self, response: &Response) {
        if self.remote_tag.is_none() {
            self.remote_tag = response.to_tag().map(str::to_string);
        }
        if !response.headers.record_route.is_empty() {
            self.route_set = response
                .headers
                .record_route
                .iter()
                .rev()
                .map(|r| r.uri.clone())
                .collect();
        }
        if let Some(contact) = &response.headers.contact {
            self.remote_target = contact.uri.clone();
        }
    }

    /// Accepts the CSeq of an in-dialog request from the peer.
    ///
    /// The number must exceed the last accepted one.
    pub fn update_remote_cseq(&mut self, seq: u32) -> DialogResult<()> {
        if self.remote_cseq != 0 && seq <= self.remote_cseq {
            return Err(DialogError::OrderingViolation {
                received: seq,
                last: self.remote_cseq,
            });
        }
        self.remote_cseq = seq;
        Ok(())
    }

    /// Reserves the next local CSeq number
    pub fn next_local_cseq(&mut self) -> u32 {
        self.local_cseq += 1;
        self.local_cseq
    }

    /// Builds a request inside the dialog (RFC 3261 Section 12.2.1.1).
    ///
    /// With a strict-routing first hop the Request-URI is that hop and the
    /// remote target goes to the end of the Route set.
    pub fn create_request(&self, method: Method, cseq: u32, via: Via) -> Request {
        let from = NameAddr::new(self.local_uri.clone());
        let from = match &self.local_tag {
            Some(tag) => from.with_tag(tag.clone()),
            None => from,
        };
        let to = NameAddr::new(self.remote_uri.clone());
        let to = match &self.remote_tag {
            Some(tag) => to.with_tag(tag.clone()),
            None => to,
        };

        let mut headers = Headers::new(from, to, self.call_id.clone(), CSeq::new(cseq, method.clone()));
        headers.via.push(via);

        let uri = match self.route_set.first() {
            Some(first) if !first.is_loose_route() => {
                headers.route = self.route_set[1..]
                    .iter()
                    .cloned()
                    .chain(std::iter::once(self.remote_target.clone()))
                    .map(NameAddr::new)
                    .collect();
                first.clone()
            }
            _ => {
                headers.route = self.route_set.iter().cloned().map(NameAddr::new).collect();
                self.remote_target.clone()
            }
        };

        Request {
            method,
            uri,
            headers,
            body: Bytes::new(),
        }
    }

    /// Address the next in-dialog request is sent to
    pub fn next_hop(&self) -> SocketAddr {
        self.route_set
            .first()
            .and_then(Uri::socket_addr)
            .or_else(|| self.remote_target.socket_addr())
            .unwrap_or(self.remote_addr)
    }
}

fn body(present: bool, body: &Bytes) -> Option<Bytes> {
    present.then(|| body.clone())
}
