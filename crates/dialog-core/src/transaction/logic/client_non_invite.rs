//! Non-INVITE client transaction (RFC 3261 Section 17.1.2)

use std::time::Duration;

use sipstack_sip_core::{Message, Request};

use super::{terminate, Action, TransactionLogic};
use crate::transaction::{TimerSettings, TimerType, TransactionKind, TransactionState};

#[derive(Debug)]
pub struct ClientNonInviteLogic {
    request: Request,
    timers: TimerSettings,
    reliable: bool,
    state: TransactionState,
    interval_e: Duration,
}

impl ClientNonInviteLogic {
    pub fn new(request: Request, timers: TimerSettings, reliable: bool) -> Self {
        let interval_e = timers.t1;
        Self {
            request,
            timers,
            reliable,
            state: TransactionState::Trying,
            interval_e,
        }
    }
}

impl TransactionLogic for ClientNonInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteClient
    }

    fn state(&self) -> TransactionState {
        self.state
    }

    fn request(&self) -> &Request {
        &self.request
    }

    fn on_start(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::Transmit(self.request.clone().into())];
        if !self.reliable {
            actions.push(Action::Schedule(TimerType::E, self.interval_e));
        }
        actions.push(Action::Schedule(
            TimerType::F,
            self.timers.transaction_timeout(),
        ));
        actions
    }

    fn on_message(&mut self, message: Message) -> Vec<Action> {
        let Message::Response(response) = message else {
            return Vec::new();
        };
        if !matches!(
            self.state,
            TransactionState::Trying | TransactionState::Proceeding
        ) {
            // Retransmitted responses are absorbed in Completed
            return Vec::new();
        }

        if response.status.is_provisional() {
            self.state = TransactionState::Proceeding;
            return vec![Action::Deliver(response)];
        }

        self.state = TransactionState::Completed;
        vec![
            Action::Cancel(TimerType::E),
            Action::Cancel(TimerType::F),
            Action::Deliver(response),
            Action::Schedule(TimerType::K, self.timers.wait_time_k(self.reliable)),
        ]
    }

    fn on_timer(&mut self, timer: TimerType) -> Vec<Action> {
        match (timer, self.state) {
            (TimerType::E, TransactionState::Trying) => {
                self.interval_e = self.timers.next_interval(self.interval_e);
                vec![
                    Action::Transmit(self.request.clone().into()),
                    Action::Schedule(TimerType::E, self.interval_e),
                ]
            }
            (TimerType::E, TransactionState::Proceeding) => {
                self.interval_e = self.timers.t2;
                vec![
                    Action::Transmit(self.request.clone().into()),
                    Action::Schedule(TimerType::E, self.interval_e),
                ]
            }
            (TimerType::F, TransactionState::Trying | TransactionState::Proceeding) => {
                self.state = TransactionState::Terminated;
                vec![Action::Timeout]
            }
            (TimerType::K, TransactionState::Completed) => {
                self.state = TransactionState::Terminated;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_transport_error(&mut self, error: String) -> Vec<Action> {
        if terminate(&mut self.state) {
            vec![Action::TransportFailure(error)]
        } else {
            Vec::new()
        }
    }

    fn on_abort(&mut self) -> Vec<Action> {
        terminate(&mut self.state);
        Vec::new()
    }
}
