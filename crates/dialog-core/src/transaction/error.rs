use thiserror::Error;

use super::{TransactionKey, TransactionState};

/// Result type for transaction layer operations
pub type Result<T> = std::result::Result<T, TransactionError>;

/// Errors returned by [`super::TransactionManager`]
#[derive(Error, Debug)]
pub enum TransactionError {
    /// No active transaction with this key
    #[error("Transaction not found: {0}")]
    NotFound(TransactionKey),

    /// Another active transaction already uses this key
    #[error("Transaction already exists: {0}")]
    KeyConflict(TransactionKey),

    /// The operation is not allowed in the current state
    #[error("Invalid state {state} for {operation} on {key}")]
    InvalidState {
        key: TransactionKey,
        state: TransactionState,
        operation: &'static str,
    },

    /// The message cannot start or continue a transaction
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The transport refused the message
    #[error("Transport error: {0}")]
    Transport(#[from] sipstack_sip_transport::Error),

    /// The manager has been shut down
    #[error("Transaction manager closed")]
    Closed,
}
