//! Non-INVITE server transaction (RFC 3261 Section 17.2.2)

use sipstack_sip_core::{Message, Request, Response};

use super::{terminate, Action, TransactionLogic};
use crate::transaction::{TimerSettings, TimerType, TransactionKind, TransactionState};

#[derive(Debug)]
pub struct ServerNonInviteLogic {
    request: Request,
    timers: TimerSettings,
    reliable: bool,
    state: TransactionState,
    last_response: Option<Response>,
}

impl ServerNonInviteLogic {
    pub fn new(request: Request, timers: TimerSettings, reliable: bool) -> Self {
        Self {
            request,
            timers,
            reliable,
            state: TransactionState::Trying,
            last_response: None,
        }
    }
}

impl TransactionLogic for ServerNonInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteServer
    }

    fn state(&self) -> TransactionState {
        self.state
    }

    fn request(&self) -> &Request {
        &self.request
    }

    fn on_start(&mut self) -> Vec<Action> {
        Vec::new()
    }

    fn on_message(&mut self, message: Message) -> Vec<Action> {
        if !message.is_request() {
            return Vec::new();
        }
        // Duplicates in Trying are absorbed; later ones get the last response
        match (&self.last_response, self.state) {
            (Some(last), TransactionState::Proceeding | TransactionState::Completed) => {
                vec![Action::Transmit(last.clone().into())]
            }
            _ => Vec::new(),
        }
    }

    fn on_send_response(&mut self, response: Response) -> Option<Vec<Action>> {
        if !matches!(
            self.state,
            TransactionState::Trying | TransactionState::Proceeding
        ) {
            return None;
        }
        let mut actions = vec![Action::Transmit(response.clone().into())];
        if response.status.is_provisional() {
            self.state = TransactionState::Proceeding;
        } else {
            self.state = TransactionState::Completed;
            actions.push(Action::Schedule(
                TimerType::J,
                self.timers.wait_time_j(self.reliable),
            ));
        }
        self.last_response = Some(response);
        Some(actions)
    }

    fn on_timer(&mut self, timer: TimerType) -> Vec<Action> {
        if timer == TimerType::J && self.state == TransactionState::Completed {
            self.state = TransactionState::Terminated;
        }
        Vec::new()
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
    use std::time::Duration;

    #[test]
    fn test_duplicates_get_the_stored_response() {
        let request = create_test_request(Method::Bye, TransportType::Udp);
        let mut logic = ServerNonInviteLogic::new(request.clone(), TimerSettings::default(), false);
        logic.on_start();

        assert!(logic.on_message(request.clone().into()).is_empty());

        let ok = SimpleResponseBuilder::response_from_request(&request, StatusCode::Ok).build();
        let actions = logic.on_send_response(ok).unwrap();
        assert!(actions.contains(&Action::Schedule(TimerType::J, Duration::from_secs(32))));
        assert_eq!(logic.state(), TransactionState::Completed);

        for _ in 0..3 {
            assert_eq!(transmitted(&logic.on_message(request.clone().into())), 1);
        }
        let again = SimpleResponseBuilder::response_from_request(&request, StatusCode::Ok).build();
        assert!(logic.on_send_response(again).is_none());

        logic.on_timer(TimerType::J);
        assert_eq!(logic.state(), TransactionState::Terminated);
    }

    #[test]
    fn test_reliable_timer_j_is_zero() {
        let request = create_test_request(Method::Options, TransportType::Tcp);
        let mut logic = ServerNonInviteLogic::new(request.clone(), TimerSettings::default(), true);
        let ok = SimpleResponseBuilder::response_from_request(&request, StatusCode::Ok).build();
        let actions = logic.on_send_response(ok).unwrap();
        assert!(actions.contains(&Action::Schedule(TimerType::J, Duration::ZERO)));
    }
}
