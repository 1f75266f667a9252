use thiserror::Error;

use crate::dialog::{DialogId, DialogState};
use crate::transaction::TransactionError;

/// Result type for dialog operations
pub type DialogResult<T> = Result<T, DialogError>;

/// Errors returned by [`crate::manager::DialogManager`]
#[derive(Error, Debug)]
pub enum DialogError {
    #[error("Dialog not found: {0}")]
    NotFound(DialogId),

    /// The operation does not apply in the dialog's current state
    #[error("Invalid state {state} for {operation} on dialog {id}")]
    InvalidState {
        id: DialogId,
        state: DialogState,
        operation: &'static str,
    },

    /// An in-dialog request whose CSeq does not exceed the last accepted one
    #[error("CSeq {received} is not above last accepted CSeq {last}")]
    OrderingViolation { received: u32, last: u32 },

    /// A re-INVITE or UPDATE is already in progress on this dialog
    #[error("Session modification already pending on dialog {0}")]
    ModificationPending(DialogId),

    /// The peer did not advertise an extension the operation needs
    #[error("Peer does not support {0}")]
    ExtensionNotSupported(&'static str),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Transport error: {0}")]
    Transport(#[from] sipstack_sip_transport::Error),

    #[error("Message error: {0}")]
    Message(#[from] sipstack_sip_core::Error),

    /// The dialog manager has been shut down
    #[error("Dialog manager closed")]
    Closed,
}

impl DialogError {
    pub(crate) fn invalid_state(id: DialogId, state: DialogState, operation: &'static str) -> Self {
        DialogError::InvalidState {
            id,
            state,
            operation,
        }
    }
}
