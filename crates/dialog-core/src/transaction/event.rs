use std::net::SocketAddr;

use sipstack_sip_core::{Request, Response};

use super::{TransactionKey, TransactionState};

/// Events delivered from the transaction layer to its user.
///
/// Exactly one of `Timeout`, `TransportError` or a final response is
/// reported per client transaction; `Terminated` always comes last.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// A request that created a new server transaction
    NewRequest {
        transaction_id: TransactionKey,
        request: Request,
        source: SocketAddr,
    },

    /// An ACK that matched no server transaction (ACK for a 2xx)
    AckReceived { request: Request, source: SocketAddr },

    /// A CANCEL matched a pending INVITE server transaction and was answered 200
    CancelReceived {
        /// The INVITE server transaction being cancelled
        transaction_id: TransactionKey,
        request: Request,
        source: SocketAddr,
    },

    ProvisionalResponse {
        transaction_id: TransactionKey,
        response: Response,
        source: SocketAddr,
    },

    /// A 2xx, including retransmissions of a 2xx to INVITE
    SuccessResponse {
        transaction_id: TransactionKey,
        response: Response,
        source: SocketAddr,
    },

    /// A 3xx-6xx
    FailureResponse {
        transaction_id: TransactionKey,
        response: Response,
        source: SocketAddr,
    },

    StateChanged {
        transaction_id: TransactionKey,
        previous_state: TransactionState,
        new_state: TransactionState,
    },

    /// No final response within Timer B or F
    Timeout { transaction_id: TransactionKey },

    /// The transport failed, or an INVITE server transaction never got its ACK
    TransportError {
        transaction_id: TransactionKey,
        error: String,
    },

    Terminated { transaction_id: TransactionKey },
}

impl TransactionEvent {
    /// The transaction the event concerns, if any
    pub fn transaction_id(&self) -> Option<&TransactionKey> {
        match self {
            TransactionEvent::AckReceived { .. } => None,
            TransactionEvent::NewRequest { transaction_id, .. }
            | TransactionEvent::CancelReceived { transaction_id, .. }
            | TransactionEvent::ProvisionalResponse { transaction_id, .. }
            | TransactionEvent::SuccessResponse { transaction_id, .. }
            | TransactionEvent::FailureResponse { transaction_id, .. }
            | TransactionEvent::StateChanged { transaction_id, .. }
            | TransactionEvent::Timeout { transaction_id }
            | TransactionEvent::TransportError { transaction_id, .. }
            | TransactionEvent::Terminated { transaction_id } => Some(transaction_id),
        }
    }
}
