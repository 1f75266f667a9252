//! INVITE server transaction (RFC 3261 Section 17.2.1)

use std::time::Duration;

use sipstack_sip_core::{Message, Method, Request, Response};

use super::{terminate, Action, TransactionLogic};
use crate::transaction::utils::create_trying_response;
use crate::transaction::{TimerSettings, TimerType, TransactionKind, TransactionState};

#[derive(Debug)]
pub struct ServerInviteLogic {
    request: Request,
    timers: TimerSettings,
    reliable: bool,
    state: TransactionState,
    last_response: Option<Response>,
    interval_g: Duration,
}

impl ServerInviteLogic {
    pub fn new(request: Request, timers: TimerSettings, reliable: bool) -> Self {
        let interval_g = timers.t1;
        Self {
            request,
            timers,
            reliable,
            state: TransactionState::Proceeding,
            last_response: None,
            interval_g,
        }
    }

    fn retransmit_last(&self) -> Vec<Action> {
        self.last_response
            .as_ref()
            .map(|response| vec![Action::Transmit(response.clone().into())])
            .unwrap_or_default()
    }
}

impl TransactionLogic for ServerInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteServer
    }

    fn state(&self) -> TransactionState {
        self.state
    }

    fn request(&self) -> &Request {
        &self.request
    }

    fn on_start(&mut self) -> Vec<Action> {
        vec![Action::Schedule(TimerType::Trying, self.timers.timer_100)]
    }

    fn on_message(&mut self, message: Message) -> Vec<Action> {
        let Message::Request(request) = message else {
            return Vec::new();
        };
        match (request.method, self.state) {
            (Method::Invite, TransactionState::Proceeding | TransactionState::Completed) => {
                self.retransmit_last()
            }
            (Method::Ack, TransactionState::Completed) => {
                self.state = TransactionState::Confirmed;
                vec![
                    Action::Cancel(TimerType::G),
                    Action::Cancel(TimerType::H),
                    Action::Schedule(TimerType::I, self.timers.wait_time_i(self.reliable)),
                ]
            }
            _ => Vec::new(),
        }
    }

    fn on_send_response(&mut self, response: Response) -> Option<Vec<Action>> {
        if self.state != TransactionState::Proceeding {
            return None;
        }
        let status = response.status;
        let mut actions = vec![
            Action::Cancel(TimerType::Trying),
            Action::Transmit(response.clone().into()),
        ];

        if status.is_provisional() {
            self.last_response = Some(response);
        } else if status.is_success() {
            // 2xx retransmission belongs to the TU from here on
            self.state = TransactionState::Terminated;
        } else {
            self.state = TransactionState::Completed;
            self.last_response = Some(response);
            if !self.reliable {
                actions.push(Action::Schedule(TimerType::G, self.interval_g));
            }
            actions.push(Action::Schedule(
                TimerType::H,
                self.timers.transaction_timeout(),
            ));
        }
        Some(actions)
    }

    fn on_timer(&mut self, timer: TimerType) -> Vec<Action> {
        match (timer, self.state) {
            (TimerType::Trying, TransactionState::Proceeding) if self.last_response.is_none() => {
                let trying = create_trying_response(&self.request);
                self.last_response = Some(trying.clone());
                vec![Action::Transmit(trying.into())]
            }
            (TimerType::G, TransactionState::Completed) => {
                self.interval_g = self.timers.next_interval(self.interval_g);
                let mut actions = self.retransmit_last();
                actions.push(Action::Schedule(TimerType::G, self.interval_g));
                actions
            }
            (TimerType::H, TransactionState::Completed) => {
                self.state = TransactionState::Terminated;
                vec![Action::TransportFailure(
                    "no ACK received for final response".into(),
                )]
            }
            (TimerType::I, TransactionState::Confirmed) => {
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
    use sipstack_sip_core::{StatusCode, TransportType};

    fn logic() -> ServerInviteLogic {
        ServerInviteLogic::new(
            create_test_request(Method::Invite, TransportType::Udp),
            TimerSettings::default(),
            false,
        )
    }

    fn respond(logic: &mut ServerInviteLogic, status: StatusCode) -> Option<Vec<Action>> {
        let response = SimpleResponseBuilder::response_from_request(&logic.request, status)
            .to_tag("1928301774")
            .build();
        logic.on_send_response(response)
    }

    #[test]
    fn test_automatic_trying() {
        let mut logic = logic();
        assert_eq!(
            logic.on_start(),
            vec![Action::Schedule(TimerType::Trying, Duration::from_millis(200))]
        );
        let actions = logic.on_timer(TimerType::Trying);
        match actions.as_slice() {
            [Action::Transmit(Message::Response(r))] => assert_eq!(r.status, StatusCode::Trying),
            other => panic!("unexpected {:?}", other),
        }
        // The duplicate INVITE is answered with the stored 100
        let dup = logic.on_message(logic.request.clone().into());
        assert_eq!(transmitted(&dup), 1);
    }

    #[test]
    fn test_provisional_suppresses_trying() {
        let mut logic = logic();
        logic.on_start();
        let actions = respond(&mut logic, StatusCode::Ringing).unwrap();
        assert!(actions.contains(&Action::Cancel(TimerType::Trying)));
        assert!(logic.on_timer(TimerType::Trying).is_empty());
        assert_eq!(logic.state(), TransactionState::Proceeding);
    }

    #[test]
    fn test_failure_retransmits_until_ack() {
        let mut logic = logic();
        logic.on_start();
        let actions = respond(&mut logic, StatusCode::BusyHere).unwrap();
        assert_eq!(logic.state(), TransactionState::Completed);
        assert!(actions.contains(&Action::Schedule(TimerType::G, Duration::from_millis(500))));
        assert!(actions.contains(&Action::Schedule(TimerType::H, Duration::from_secs(32))));

        assert_eq!(transmitted(&logic.on_timer(TimerType::G)), 1);
        assert_eq!(transmitted(&logic.on_message(logic.request.clone().into())), 1);
        assert!(respond(&mut logic, StatusCode::Ok).is_none());

        let mut ack = logic.request.clone();
        ack.method = Method::Ack;
        let confirmed = logic.on_message(ack.into());
        assert_eq!(logic.state(), TransactionState::Confirmed);
        assert!(confirmed.contains(&Action::Cancel(TimerType::G)));
        assert_eq!(transmitted(&logic.on_timer(TimerType::G)), 0);

        logic.on_timer(TimerType::I);
        assert_eq!(logic.state(), TransactionState::Terminated);
    }

    #[test]
    fn test_timer_h_reports_missing_ack() {
        let mut logic = logic();
        logic.on_start();
        respond(&mut logic, StatusCode::Decline);
        let actions = logic.on_timer(TimerType::H);
        assert!(matches!(actions.as_slice(), [Action::TransportFailure(_)]));
        assert_eq!(logic.state(), TransactionState::Terminated);
    }

    #[test]
    fn test_success_terminates() {
        let mut logic = logic();
        logic.on_start();
        let actions = respond(&mut logic, StatusCode::Ok).unwrap();
        assert_eq!(transmitted(&actions), 1);
        assert_eq!(logic.state(), TransactionState::Terminated);
    }
}
