//! # Transaction Runner
//!
//! The event loop that drives one transaction. Every transaction runs as its
//! own task which owns the state machine and processes [`Command`]s from a
//! single queue, so the transitions of one transaction never interleave while
//! different transactions proceed in parallel.
//!
//! For each command the runner asks the state machine what to do and then
//! executes the returned [`Action`]s in order: messages are handed to the
//! transport, timers are armed as sleeping tasks that post a
//! [`Command::Timer`] back into the queue, and responses or failures are
//! reported to the TU. A transport error while executing an action is fed
//! back into the state machine, which terminates the transaction.
//!
//! The new state is published before the step's actions run: a TU reacting
//! to a delivered response sees the state that response caused. When the
//! state machine reaches Terminated the runner cancels all timers, removes
//! the transaction from the table and emits
//! [`TransactionEvent::Terminated`] as the transaction's last event.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sipstack_sip_core::Response;
use sipstack_sip_transport::Transport;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::transaction::error::{Result, TransactionError};
use crate::transaction::logic::{Action, TransactionLogic};
use crate::transaction::manager::types::{Command, TransactionHandle};
use crate::transaction::{
    AtomicTransactionState, TimerType, TransactionEvent, TransactionKey, TransactionState,
};

/// Everything a transaction task needs besides its state machine
pub(crate) struct TransactionContext {
    pub key: TransactionKey,
    pub state: Arc<AtomicTransactionState>,
    pub destination: SocketAddr,
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedSender<TransactionEvent>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub table: Arc<DashMap<TransactionKey, TransactionHandle>>,
}

/// Armed timers by type, with a generation counter so that a timer which
/// already posted its command before being cancelled is ignored
#[derive(Default)]
struct TimerHandles {
    armed: HashMap<TimerType, (u64, JoinHandle<()>)>,
    generation: u64,
}

impl TimerHandles {
    fn schedule(&mut self, timer: TimerType, after: Duration, cmd_tx: &mpsc::Sender<Command>) {
        self.generation += 1;
        let generation = self.generation;
        let tx = cmd_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Command::Timer(timer, generation)).await;
        });
        if let Some((_, previous)) = self.armed.insert(timer, (generation, handle)) {
            previous.abort();
        }
    }

    fn cancel(&mut self, timer: TimerType) {
        if let Some((_, handle)) = self.armed.remove(&timer) {
            handle.abort();
        }
    }

    /// True if `generation` is the live arming of `timer`; consumes it
    fn fire(&mut self, timer: TimerType, generation: u64) -> bool {
        match self.armed.get(&timer) {
            Some((armed, _)) if *armed == generation => {
                self.armed.remove(&timer);
                true
            }
            _ => false,
        }
    }

    fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.armed.drain() {
            handle.abort();
        }
    }
}

/// Run the event loop of one transaction.
///
/// `started` receives the result of executing the state machine's start
/// actions, which for client transactions includes the first transmission.
pub(crate) async fn run_transaction_loop(
    ctx: TransactionContext,
    mut logic: Box<dyn TransactionLogic>,
    mut cmd_rx: mpsc::Receiver<Command>,
    started: Option<oneshot::Sender<Result<()>>>,
) {
    let mut timers = TimerHandles::default();
    let mut source = ctx.destination;
    debug!(id = %ctx.key, state = ?logic.state(), "Transaction loop starting");

    let actions = logic.on_start();
    publish_state(&ctx, logic.as_ref());
    let result = execute(&ctx, logic.as_mut(), &mut timers, actions, source).await;
    let terminated = after_step(&ctx, logic.as_ref(), &mut timers);
    if let Some(started) = started {
        let _ = started.send(result);
    }

    if !terminated {
        while let Some(command) = cmd_rx.recv().await {
            trace!(id = %ctx.key, ?command, "Transaction received command");
            let mut reply = None;
            let actions = match command {
                Command::ProcessMessage(message, from) => {
                    source = from;
                    logic.on_message(message)
                }
                Command::SendResponse(response, tx) => {
                    match logic.on_send_response(response) {
                        Some(actions) => {
                            reply = Some(tx);
                            actions
                        }
                        None => {
                            let _ = tx.send(Err(TransactionError::InvalidState {
                                key: ctx.key.clone(),
                                state: logic.state(),
                                operation: "send_response",
                            }));
                            continue;
                        }
                    }
                }
                Command::Timer(timer, generation) => {
                    if !timers.fire(timer, generation) {
                        trace!(id = %ctx.key, %timer, "Ignoring stale timer");
                        continue;
                    }
                    trace!(id = %ctx.key, %timer, "Timer fired");
                    logic.on_timer(timer)
                }
                Command::Abort => {
                    debug!(id = %ctx.key, "Transaction aborted");
                    logic.on_abort()
                }
            };

            publish_state(&ctx, logic.as_ref());
            let result = execute(&ctx, logic.as_mut(), &mut timers, actions, source).await;
            let terminated = after_step(&ctx, logic.as_ref(), &mut timers);
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
            if terminated {
                break;
            }
        }
    }

    timers.cancel_all();
    debug!(id = %ctx.key, "Transaction loop ended");
}

/// Executes actions until the queue is empty. Returns the first transport
/// error, which has already been fed back into the state machine.
async fn execute(
    ctx: &TransactionContext,
    logic: &mut dyn TransactionLogic,
    timers: &mut TimerHandles,
    actions: Vec<Action>,
    source: SocketAddr,
) -> Result<()> {
    let mut queue: VecDeque<Action> = actions.into();
    let mut first_error = None;

    while let Some(action) = queue.pop_front() {
        match action {
            Action::Transmit(message) => {
                debug!(id = %ctx.key, message = %message.summary(), dest = %ctx.destination, "Sending");
                if let Err(e) = ctx.transport.send_message(message, ctx.destination).await {
                    warn!(id = %ctx.key, error = %e, "Transport error");
                    queue.extend(logic.on_transport_error(e.to_string()));
                    if first_error.is_none() {
                        first_error = Some(TransactionError::Transport(e));
                    }
                }
            }
            Action::Schedule(timer, after) => timers.schedule(timer, after, &ctx.cmd_tx),
            Action::Cancel(timer) => timers.cancel(timer),
            Action::Deliver(response) => deliver(ctx, response, source),
            Action::Timeout => {
                debug!(id = %ctx.key, "Transaction timed out");
                emit(
                    ctx,
                    TransactionEvent::Timeout {
                        transaction_id: ctx.key.clone(),
                    },
                );
            }
            Action::TransportFailure(error) => emit(
                ctx,
                TransactionEvent::TransportError {
                    transaction_id: ctx.key.clone(),
                    error,
                },
            ),
        }
    }

    first_error.map_or(Ok(()), Err)
}

fn deliver(ctx: &TransactionContext, response: Response, source: SocketAddr) {
    let transaction_id = ctx.key.clone();
    let event = if response.status.is_provisional() {
        TransactionEvent::ProvisionalResponse {
            transaction_id,
            response,
            source,
        }
    } else if response.status.is_success() {
        TransactionEvent::SuccessResponse {
            transaction_id,
            response,
            source,
        }
    } else {
        TransactionEvent::FailureResponse {
            transaction_id,
            response,
            source,
        }
    };
    emit(ctx, event);
}

/// Stores the state machine's current state in the shared handle and
/// reports the change, if any
fn publish_state(ctx: &TransactionContext, logic: &dyn TransactionLogic) -> TransactionState {
    let new_state = logic.state();
    let previous_state = ctx.state.set(new_state);
    if previous_state != new_state {
        debug_assert!(
            previous_state.can_transition_to(logic.kind(), new_state),
            "invalid transition {:?} -> {:?}",
            previous_state,
            new_state
        );
        debug!(id = %ctx.key, "State {:?} -> {:?}", previous_state, new_state);
        emit(
            ctx,
            TransactionEvent::StateChanged {
                transaction_id: ctx.key.clone(),
                previous_state,
                new_state,
            },
        );
    }
    new_state
}

/// Publishes any state change caused while executing the step's actions
/// and cleans up after termination. Returns true once the transaction is
/// terminated.
fn after_step(
    ctx: &TransactionContext,
    logic: &dyn TransactionLogic,
    timers: &mut TimerHandles,
) -> bool {
    if publish_state(ctx, logic) != TransactionState::Terminated {
        return false;
    }
    timers.cancel_all();
    ctx.table
        .remove_if(&ctx.key, |_, handle| Arc::ptr_eq(&handle.state, &ctx.state));
    emit(
        ctx,
        TransactionEvent::Terminated {
            transaction_id: ctx.key.clone(),
        },
    );
    true
}

fn emit(ctx: &TransactionContext, event: TransactionEvent) {
    if ctx.events.send(event).is_err() {
        trace!(id = %ctx.key, "Transaction event receiver dropped");
    }
}
