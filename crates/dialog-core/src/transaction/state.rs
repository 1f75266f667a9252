use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use sipstack_sip_core::Method;

/// The four transaction types of RFC 3261 Section 17
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TransactionKind {
    pub fn for_method(method: &Method, is_server: bool) -> Self {
        match (method.is_invite(), is_server) {
            (true, false) => TransactionKind::InviteClient,
            (false, false) => TransactionKind::NonInviteClient,
            (true, true) => TransactionKind::InviteServer,
            (false, true) => TransactionKind::NonInviteServer,
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(
            self,
            TransactionKind::InviteServer | TransactionKind::NonInviteServer
        )
    }

    /// State a freshly created transaction of this kind starts in
    pub fn initial_state(&self) -> TransactionState {
        match self {
            TransactionKind::InviteClient => TransactionState::Calling,
            TransactionKind::NonInviteClient | TransactionKind::NonInviteServer => {
                TransactionState::Trying
            }
            TransactionKind::InviteServer => TransactionState::Proceeding,
        }
    }
}

/// Transaction states across all four state machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionState {
    /// INVITE client, request sent
    Calling,
    /// Non-INVITE, request sent or received
    Trying,
    Proceeding,
    Completed,
    /// INVITE server, ACK received
    Confirmed,
    Terminated,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransactionState::Calling,
            1 => TransactionState::Trying,
            2 => TransactionState::Proceeding,
            3 => TransactionState::Completed,
            4 => TransactionState::Confirmed,
            _ => TransactionState::Terminated,
        }
    }

    /// Whether `kind` may move from `self` to `next`
    pub fn can_transition_to(self, kind: TransactionKind, next: TransactionState) -> bool {
        use TransactionState::*;
        if next == Terminated {
            return self != Terminated;
        }
        match kind {
            TransactionKind::InviteClient => matches!(
                (self, next),
                (Calling, Proceeding) | (Calling, Completed) | (Proceeding, Completed)
            ),
            TransactionKind::NonInviteClient | TransactionKind::NonInviteServer => matches!(
                (self, next),
                (Trying, Proceeding) | (Trying, Completed) | (Proceeding, Completed)
            ),
            TransactionKind::InviteServer => {
                matches!((self, next), (Proceeding, Completed) | (Completed, Confirmed))
            }
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Transaction state readable without going through the transaction task
#[derive(Debug)]
pub struct AtomicTransactionState(AtomicU8);

impl AtomicTransactionState {
    pub fn new(state: TransactionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> TransactionState {
        TransactionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Stores `state` and returns the previous one
    pub fn set(&self, state: TransactionState) -> TransactionState {
        TransactionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use TransactionState::*;
        let kind = TransactionKind::InviteServer;
        assert!(Proceeding.can_transition_to(kind, Completed));
        assert!(Completed.can_transition_to(kind, Confirmed));
        assert!(!Confirmed.can_transition_to(kind, Completed));
        assert!(Proceeding.can_transition_to(kind, Terminated));
        assert!(!Terminated.can_transition_to(kind, Terminated));
        assert!(!Completed.can_transition_to(TransactionKind::InviteClient, Proceeding));
    }

    #[test]
    fn test_atomic_state() {
        let state = AtomicTransactionState::new(TransactionState::Calling);
        assert_eq!(state.set(TransactionState::Proceeding), TransactionState::Calling);
        assert_eq!(state.get(), TransactionState::Proceeding);
        assert_eq!(
            TransactionKind::for_method(&Method::Invite, true).initial_state(),
            TransactionState::Proceeding
        );
    }
}
