//! Transaction identification (RFC 3261 Sections 17.1.3 and 17.2.3)

use std::fmt;

use sipstack_sip_core::{Method, Request, Response};

/// Uniquely identifies one transaction.
///
/// Client transactions are matched on branch plus CSeq method, since a
/// CANCEL shares its branch with the INVITE it cancels. Server transactions
/// additionally include the Via sent-by, and an ACK is keyed as the INVITE
/// it acknowledges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    /// Via branch parameter
    pub branch: String,
    /// Method of the transaction (never ACK)
    pub method: Method,
    /// Top Via sent-by, for server transactions only
    pub sent_by: Option<String>,
    /// True for server transactions
    pub is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, is_server: bool) -> Self {
        Self {
            branch: branch.into(),
            method,
            sent_by: None,
            is_server,
        }
    }

    /// Key of the client transaction that sent `request`
    pub fn for_client_request(request: &Request) -> Option<Self> {
        Some(Self::new(request.branch()?, request.method.clone(), false))
    }

    /// Key of the client transaction a received response belongs to
    pub fn for_response(response: &Response) -> Option<Self> {
        Some(Self::new(
            response.branch()?,
            response.cseq().method.clone(),
            false,
        ))
    }

    /// Key of the server transaction a received request belongs to
    pub fn for_server_request(request: &Request) -> Option<Self> {
        let via = request.headers.top_via()?;
        let method = match request.method {
            Method::Ack => Method::Invite,
            ref method => method.clone(),
        };
        Some(Self {
            branch: via.branch()?.to_string(),
            method,
            sent_by: Some(via.sent_by()),
            is_server: true,
        })
    }

    /// The same transaction seen with another method (CANCEL to INVITE)
    pub fn with_method(&self, method: Method) -> Self {
        Self {
            method,
            ..self.clone()
        }
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = if self.is_server { "server" } else { "client" };
        write!(f, "{}:{}:{}", self.branch, self.method, role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipstack_sip_core::builder::SimpleRequestBuilder;
    use sipstack_sip_core::{TransportType, Via};

    fn request(method: Method) -> Request {
        SimpleRequestBuilder::new(method, "sip:bob@192.0.2.2".parse().unwrap())
            .from("sip:alice@192.0.2.1".parse().unwrap(), Some("1"))
            .to("sip:bob@192.0.2.2".parse().unwrap(), None)
            .call_id("k1")
            .cseq(1)
            .via(Via::new(
                TransportType::Udp,
                "192.0.2.1:5060".parse().unwrap(),
                "z9hG4bKkey",
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_ack_matches_invite_server_transaction() {
        let invite = TransactionKey::for_server_request(&request(Method::Invite)).unwrap();
        let ack = TransactionKey::for_server_request(&request(Method::Ack)).unwrap();
        assert_eq!(invite, ack);
        assert_eq!(invite.sent_by.as_deref(), Some("192.0.2.1:5060"));
    }

    #[test]
    fn test_cancel_is_a_separate_transaction() {
        let invite = TransactionKey::for_client_request(&request(Method::Invite)).unwrap();
        let cancel = TransactionKey::for_client_request(&request(Method::Cancel)).unwrap();
        assert_ne!(invite, cancel);
        assert_eq!(cancel.with_method(Method::Invite), invite);
        assert_eq!(invite.to_string(), "z9hG4bKkey:INVITE:client");
    }
}
