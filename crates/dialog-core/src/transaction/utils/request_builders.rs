//! Requests the transaction layer generates on its own (RFC 3261 Sections 9.1 and 17.1.1.3)

use sipstack_sip_core::{CSeq, Headers, Method, Request, Response};

use crate::transaction::error::{Result, TransactionError};

/// Create the ACK for a non-2xx final response to `invite`.
///
/// The ACK reuses the INVITE's Request-URI, top Via (and so its branch),
/// From, Call-ID, CSeq number and Route set; the To header is taken from
/// the response so that it carries the remote tag.
pub fn create_ack_from_invite(invite: &Request, response: &Response) -> Result<Request> {
    let via = invite
        .headers
        .top_via()
        .cloned()
        .ok_or_else(|| TransactionError::InvalidMessage("INVITE without Via".into()))?;

    let mut headers = Headers::new(
        invite.headers.from.clone(),
        response.headers.to.clone(),
        invite.headers.call_id.clone(),
        CSeq::new(invite.cseq().seq, Method::Ack),
    );
    headers.via.push(via);
    headers.max_forwards = invite.headers.max_forwards;
    headers.route = invite.headers.route.clone();
    headers.user_agent = invite.headers.user_agent.clone();

    Ok(Request {
        method: Method::Ack,
        uri: invite.uri.clone(),
        headers,
        body: Default::default(),
    })
}

/// Create a CANCEL for a pending `invite`.
///
/// CANCEL shares the INVITE's branch, so it is matched to the same server
/// transaction at the peer, and carries the INVITE's CSeq number.
pub fn create_cancel(invite: &Request) -> Result<Request> {
    if invite.method != Method::Invite {
        return Err(TransactionError::InvalidMessage(format!(
            "cannot CANCEL a {} request",
            invite.method
        )));
    }
    let via = invite
        .headers
        .top_via()
        .cloned()
        .ok_or_else(|| TransactionError::InvalidMessage("INVITE without Via".into()))?;

    let mut headers = Headers::new(
        invite.headers.from.clone(),
        invite.headers.to.clone(),
        invite.headers.call_id.clone(),
        CSeq::new(invite.cseq().seq, Method::Cancel),
    );
    headers.via.push(via);
    headers.max_forwards = invite.headers.max_forwards;
    headers.route = invite.headers.route.clone();
    headers.user_agent = invite.headers.user_agent.clone();

    Ok(Request {
        method: Method::Cancel,
        uri: invite.uri.clone(),
        headers,
        body: Default::default(),
    })
}
