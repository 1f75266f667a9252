//! Dialog events
//!
//! Each protocol happening on a dialog is one variant of [`DialogEvent`],
//! delivered in order on the channel returned by
//! [`DialogManager::new`](crate::manager::DialogManager::new).

use bytes::Bytes;
use sipstack_sip_core::{Method, Request, Response, StatusCode};

use crate::dialog::{DialogId, DialogState};

/// Why a dialog-level request did not succeed.
///
/// `Rejected` is an answer from the peer; the other variants mean no usable
/// answer arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogFailure {
    /// A 3xx-6xx final response
    Rejected { status: StatusCode, reason: String },
    /// The client transaction timed out
    Timeout,
    /// The transport could not deliver the request or response
    Transport(String),
    /// Our 2xx to INVITE was never acknowledged
    AckTimeout,
}

impl DialogFailure {
    pub(crate) fn rejected(response: &Response) -> Self {
        DialogFailure::Rejected {
            status: response.status,
            reason: response.reason.clone(),
        }
    }
}

/// Dialog lifecycle and in-dialog traffic
#[derive(Debug, Clone)]
pub enum DialogEvent {
    /// New INVITE; answer it with `ring`, `accept`, `reject` or `respond`
    IncomingInvite {
        dialog_id: DialogId,
        request: Request,
    },

    /// re-INVITE from the peer, waiting for `respond`
    ReInvite {
        dialog_id: DialogId,
        request: Request,
    },

    /// UPDATE from the peer, waiting for `respond`
    Update {
        dialog_id: DialogId,
        request: Request,
    },

    /// Any other in-dialog request (INFO, MESSAGE, NOTIFY, ...), already answered 200
    Request {
        dialog_id: DialogId,
        method: Method,
        request: Request,
    },

    ProvisionalResponse {
        dialog_id: DialogId,
        response: Response,
    },

    /// A 1xx sent with `Require: 100rel`
    ReliableProvisionalResponse {
        dialog_id: DialogId,
        response: Response,
    },

    /// PRACK received for our reliable 1xx
    ReliableProvisionalConfirmed { dialog_id: DialogId, rseq: u32 },

    /// No PRACK arrived for our reliable 1xx. The INVITE transaction is
    /// still running; the application decides whether to give up.
    ReliableProvisionalTimeout { dialog_id: DialogId, rseq: u32 },

    /// 2xx to our INVITE. When `needs_answer` is set the 2xx carried an
    /// offer and the ACK waits for `confirm_2xx_with_answer`.
    SuccessResponse {
        dialog_id: DialogId,
        response: Response,
        needs_answer: bool,
    },

    /// The INVITE failed
    Failure {
        dialog_id: DialogId,
        failure: DialogFailure,
    },

    /// ACK for our 2xx
    AckReceived {
        dialog_id: DialogId,
        body: Option<Bytes>,
    },

    /// The peer cancelled its pending INVITE
    CancelReceived { dialog_id: DialogId },

    ByeReceived { dialog_id: DialogId },

    /// Our BYE finished; `status` is `None` when no response arrived
    ByeCompleted {
        dialog_id: DialogId,
        status: Option<StatusCode>,
    },

    /// re-INVITE or UPDATE accepted; the session has been updated
    ModificationCompleted {
        dialog_id: DialogId,
        method: Method,
        response: Response,
    },

    /// re-INVITE or UPDATE failed; the session is unchanged
    ModificationFailed {
        dialog_id: DialogId,
        method: Method,
        failure: DialogFailure,
    },

    /// Final response to a request sent with `request`
    ResponseReceived {
        dialog_id: DialogId,
        method: Method,
        response: Response,
    },

    /// A request sent with `request` got no final response
    RequestFailed {
        dialog_id: DialogId,
        method: Method,
        failure: DialogFailure,
    },

    StateChanged {
        dialog_id: DialogId,
        old_state: DialogState,
        new_state: DialogState,
    },

    /// Last event of a dialog
    Terminated { dialog_id: DialogId, reason: String },
}

impl DialogEvent {
    pub fn dialog_id(&self) -> DialogId {
        match self {
            DialogEvent::IncomingInvite { dialog_id, .. }
            | DialogEvent::ReInvite { dialog_id, .. }
            | DialogEvent::Update { dialog_id, .. }
            | DialogEvent::Request { dialog_id, .. }
            | DialogEvent::ProvisionalResponse { dialog_id, .. }
            | DialogEvent::ReliableProvisionalResponse { dialog_id, .. }
            | DialogEvent::ReliableProvisionalConfirmed { dialog_id, .. }
            | DialogEvent::ReliableProvisionalTimeout { dialog_id, .. }
            | DialogEvent::SuccessResponse { dialog_id, .. }
            | DialogEvent::Failure { dialog_id, .. }
            | DialogEvent::AckReceived { dialog_id, .. }
            | DialogEvent::CancelReceived { dialog_id }
            | DialogEvent::ByeReceived { dialog_id }
            | DialogEvent::ByeCompleted { dialog_id, .. }
            | DialogEvent::ModificationCompleted { dialog_id, .. }
            | DialogEvent::ModificationFailed { dialog_id, .. }
            | DialogEvent::ResponseReceived { dialog_id, .. }
            | DialogEvent::RequestFailed { dialog_id, .. }
            | DialogEvent::StateChanged { dialog_id, .. }
            | DialogEvent::Terminated { dialog_id, .. } => *dialog_id,
        }
    }
}
