//! INVITE client transaction (RFC 3261 Section 17.1.1)

use std::time::Duration;

use sipstack_sip_core::{Message, Request, Response};
use tracing::warn;

use super::{terminate, Action, TransactionLogic};
use crate::transaction::utils::create_ack_from_invite;
use crate::transaction::{TimerSettings, TimerType, TransactionKind, TransactionState};

#[derive(Debug)]
pub struct ClientInviteLogic {
    request: Request,
    timers: TimerSettings,
    reliable: bool,
    state: TransactionState,
    interval_a: Duration,
    /// ACK generated for a non-2xx final response, resent on its retransmissions
    ack: Option<Request>,
}

impl ClientInviteLogic {
    pub fn new(request: Request, timers: TimerSettings, reliable: bool) -> Self {
        let interval_a = timers.t1;
        Self {
            request,
            timers,
            reliable,
            state: TransactionState::Calling,
            interval_a,
            ack: None,
        }
    }

    fn on_response(&mut self, response: Response) -> Vec<Action> {
        let status = response.status;
        match self.state {
            TransactionState::Calling | TransactionState::Proceeding => {
                let mut actions = Vec::new();
                if self.state == TransactionState::Calling {
                    actions.push(Action::Cancel(TimerType::A));
                }
                if status.is_provisional() {
                    self.state = TransactionState::Proceeding;
                    actions.push(Action::Deliver(response));
                    return actions;
                }

                self.state = TransactionState::Completed;
                actions.push(Action::Cancel(TimerType::B));
                if !status.is_success() {
                    match create_ack_from_invite(&self.request, &response) {
                        Ok(ack) => {
                            actions.push(Action::Transmit(ack.clone().into()));
                            self.ack = Some(ack);
                        }
                        Err(e) => warn!(error = %e, "Could not build ACK"),
                    }
                }
                actions.push(Action::Deliver(response));
                actions.push(Action::Schedule(
                    TimerType::D,
                    self.timers.wait_time_d(self.reliable),
                ));
                actions
            }
            TransactionState::Completed => {
                if status.is_success() {
                    // 2xx retransmissions go up so the dialog can re-ACK
                    vec![Action::Deliver(response)]
                } else if status.is_final() {
                    self.ack
                        .as_ref()
                        .map(|ack| vec![Action::Transmit(ack.clone().into())])
                        .unwrap_or_default()
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }
}

impl TransactionLogic for ClientInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteClient
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
            actions.push(Action::Schedule(TimerType::A, self.interval_a));
        }
        actions.push(Action::Schedule(
            TimerType::B,
            self.timers.transaction_timeout(),
        ));
        actions
    }

    fn on_message(&mut self, message: Message) -> Vec<Action> {
        match message {
            Message::Response(response) => self.on_response(response),
            Message::Request(_) => Vec::new(),
        }
    }

    fn on_timer(&mut self, timer: TimerType) -> Vec<Action> {
        match (timer, self.state) {
            (TimerType::A, TransactionState::Calling) => {
                self.interval_a = self.timers.next_invite_interval(self.interval_a);
                vec![
                    Action::Transmit(self.request.clone().into()),
                    Action::Schedule(TimerType::A, self.interval_a),
                ]
            }
            (TimerType::B, TransactionState::Calling | TransactionState::Proceeding) => {
                self.state = TransactionState::Terminated;
                vec![Action::Timeout]
            }
            (TimerType::D, TransactionState::Completed) => {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::logic::transmitted;
    use crate::transaction::utils::test_support::create_test_request;
    use sipstack_sip_core::builder::SimpleResponseBuilder;
    use sipstack_sip_core::{Method, StatusCode, TransportType};

    fn logic(reliable: bool) -> ClientInviteLogic {
        let transport = if reliable {
            TransportType::Tcp
        } else {
            TransportType::Udp
        };
        ClientInviteLogic::new(
            create_test_request(Method::Invite, transport),
            TimerSettings::default(),
            reliable,
        )
    }

    fn response(logic: &ClientInviteLogic, status: StatusCode) -> Message {
        SimpleResponseBuilder::response_from_request(&logic.request, status)
            .to_tag("as83kd9bs")
            .build()
            .into()
    }

    #[test]
    fn test_retransmission_schedule() {
        let mut logic = logic(false);
        let start = logic.on_start();
        assert_eq!(transmitted(&start), 1);
        assert!(start.contains(&Action::Schedule(TimerType::A, Duration::from_millis(500))));
        assert!(start.contains(&Action::Schedule(TimerType::B, Duration::from_secs(32))));

        let actions = logic.on_timer(TimerType::A);
        assert_eq!(transmitted(&actions), 1);
        assert!(actions.contains(&Action::Schedule(TimerType::A, Duration::from_secs(1))));

        assert_eq!(logic.on_timer(TimerType::B), vec![Action::Timeout]);
        assert_eq!(logic.state(), TransactionState::Terminated);
        assert!(logic.on_timer(TimerType::A).is_empty());
    }

    #[test]
    fn test_reliable_transport_has_no_timer_a() {
        let mut logic = logic(true);
        let start = logic.on_start();
        assert!(!start
            .iter()
            .any(|a| matches!(a, Action::Schedule(TimerType::A, _))));
    }

    #[test]
    fn test_provisional_then_failure_generates_ack() {
        let mut logic = logic(false);
        logic.on_start();

        let ringing = logic.on_message(response(&logic, StatusCode::Ringing));
        assert_eq!(logic.state(), TransactionState::Proceeding);
        assert!(ringing.contains(&Action::Cancel(TimerType::A)));
        assert!(!ringing.contains(&Action::Cancel(TimerType::B)));

        let busy = logic.on_message(response(&logic, StatusCode::BusyHere));
        assert_eq!(logic.state(), TransactionState::Completed);
        assert_eq!(transmitted(&busy), 1);
        assert!(busy.contains(&Action::Schedule(TimerType::D, Duration::from_secs(32))));
        let ack = busy.iter().find_map(|a| match a {
            Action::Transmit(Message::Request(ack)) => Some(ack.clone()),
            _ => None,
        });
        assert_eq!(ack.unwrap().to_tag(), Some("as83kd9bs"));

        // A retransmitted final response is answered with the same ACK, not delivered
        let again = logic.on_message(response(&logic, StatusCode::BusyHere));
        assert_eq!(again.len(), 1);
        assert_eq!(transmitted(&again), 1);

        assert!(logic.on_timer(TimerType::D).is_empty());
        assert_eq!(logic.state(), TransactionState::Terminated);
    }

    #[test]
    fn test_success_is_delivered_again_while_completed() {
        let mut logic = logic(false);
        logic.on_start();
        let ok = logic.on_message(response(&logic, StatusCode::Ok));
        assert_eq!(transmitted(&ok), 0);
        assert_eq!(logic.state(), TransactionState::Completed);

        let again = logic.on_message(response(&logic, StatusCode::Ok));
        assert!(matches!(again.as_slice(), [Action::Deliver(_)]));
    }

    #[test]
    fn test_transport_error_reported_once() {
        let mut logic = logic(false);
        logic.on_start();
        assert_eq!(
            logic.on_transport_error("unreachable".into()),
            vec![Action::TransportFailure("unreachable".into())]
        );
        assert!(logic.on_transport_error("again".into()).is_empty());
    }
}
