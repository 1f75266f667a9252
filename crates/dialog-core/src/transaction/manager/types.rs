//! Types shared by the transaction manager and the transaction tasks

use std::net::SocketAddr;
use std::sync::Arc;

use sipstack_sip_core::{Message, Request, Response};
use tokio::sync::{mpsc, oneshot};

use crate::transaction::error::Result;
use crate::transaction::{AtomicTransactionState, TimerType, TransactionKind};

/// Commands processed by a transaction task, one at a time
#[derive(Debug)]
pub(crate) enum Command {
    /// A message matched to the transaction
    ProcessMessage(Message, SocketAddr),
    /// The TU sends a response through a server transaction
    SendResponse(Response, oneshot::Sender<Result<()>>),
    /// A timer armed with the given generation fired
    Timer(TimerType, u64),
    /// Terminate immediately
    Abort,
}

/// Table entry for an active transaction
#[derive(Debug, Clone)]
pub(crate) struct TransactionHandle {
    pub kind: TransactionKind,
    pub state: Arc<AtomicTransactionState>,
    pub cmd_tx: mpsc::Sender<Command>,
    /// The request that created the transaction
    pub request: Arc<Request>,
    /// Where requests (client) or responses (server) are sent
    pub destination: SocketAddr,
}
