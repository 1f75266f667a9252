//! # Transaction state machines
//!
//! Each of the four RFC 3261 transaction types is a plain state machine that
//! reacts to inputs (messages, TU responses, timer expiry, transport errors)
//! by updating its state and returning a list of [`Action`]s. The machines
//! perform no I/O and never sleep; the runner executes the actions, which
//! keeps every transition testable without sockets or a clock.

mod client_invite;
mod client_non_invite;
mod server_invite;
mod server_non_invite;

pub use client_invite::ClientInviteLogic;
pub use client_non_invite::ClientNonInviteLogic;
pub use server_invite::ServerInviteLogic;
pub use server_non_invite::ServerNonInviteLogic;

use std::time::Duration;

use sipstack_sip_core::{Message, Request, Response};

use super::{TimerSettings, TimerType, TransactionKind, TransactionState};

/// Work requested by a state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a message to the transaction's destination
    Transmit(Message),
    /// Arm (or re-arm) a timer
    Schedule(TimerType, Duration),
    /// Disarm a timer
    Cancel(TimerType),
    /// Hand a response to the TU
    Deliver(Response),
    /// Timer B or F fired
    Timeout,
    /// Report a transport failure (or missing ACK) to the TU
    TransportFailure(String),
}

/// Behaviour shared by the four transaction state machines
pub trait TransactionLogic: Send + 'static {
    fn kind(&self) -> TransactionKind;

    fn state(&self) -> TransactionState;

    /// The request that created the transaction
    fn request(&self) -> &Request;

    /// Actions to run when the transaction is created
    fn on_start(&mut self) -> Vec<Action>;

    /// A message matched to this transaction arrived
    fn on_message(&mut self, message: Message) -> Vec<Action>;

    /// The TU sends a response; `None` when the state does not allow it
    fn on_send_response(&mut self, _response: Response) -> Option<Vec<Action>> {
        None
    }

    fn on_timer(&mut self, timer: TimerType) -> Vec<Action>;

    /// Sending failed; every transaction type terminates
    fn on_transport_error(&mut self, error: String) -> Vec<Action>;

    /// Forced termination without waiting out the timers
    fn on_abort(&mut self) -> Vec<Action>;
}

/// Creates the state machine for a new transaction
pub fn create_logic(
    kind: TransactionKind,
    request: Request,
    timers: TimerSettings,
    reliable: bool,
) -> Box<dyn TransactionLogic> {
    match kind {
        TransactionKind::InviteClient => Box::new(ClientInviteLogic::new(request, timers, reliable)),
        TransactionKind::NonInviteClient => {
            Box::new(ClientNonInviteLogic::new(request, timers, reliable))
        }
        TransactionKind::InviteServer => Box::new(ServerInviteLogic::new(request, timers, reliable)),
        TransactionKind::NonInviteServer => {
            Box::new(ServerNonInviteLogic::new(request, timers, reliable))
        }
    }
}

/// Moves to Terminated unless already there
fn terminate(state: &mut TransactionState) -> bool {
    if *state == TransactionState::Terminated {
        return false;
    }
    *state = TransactionState::Terminated;
    true
}

#[cfg(test)]
pub(crate) fn transmitted(actions: &[Action]) -> usize {
    actions
        .iter()
        .filter(|a| matches!(a, Action::Transmit(_)))
        .count()
}
