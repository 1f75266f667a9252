//! # Transaction Manager
//!
//! Owns the table of active transactions and routes every inbound message to
//! the transaction it belongs to (RFC 3261 Section 17.1.3 and 17.2.3) before
//! anything else looks at it:
//!
//! - a response matching no client transaction is discarded
//! - a retransmitted request goes to its server transaction, which answers it
//!   with the last response instead of bothering the TU again
//! - a new request creates a server transaction and is reported once as
//!   [`TransactionEvent::NewRequest`]
//! - an ACK for a 2xx matches nothing and is passed up as
//!   [`TransactionEvent::AckReceived`]
//! - a CANCEL is answered here (200, or 481 without a pending INVITE) and
//!   reported as [`TransactionEvent::CancelReceived`]
//!
//! Each transaction runs in its own task (see the runner module);
//! the table is a [`DashMap`] so lookups and inserts for unrelated
//! transactions do not contend on a global lock.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sipstack_dialog_core::transaction::{TransactionConfig, TransactionManager};
//! use sipstack_sip_transport::{Transport, TransportConfig, TransportManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (transport, transport_rx) = TransportManager::new(TransportConfig::default());
//! transport.bind_udp("0.0.0.0:5060".parse()?).await?;
//! let transport: Arc<dyn Transport> = Arc::new(transport);
//!
//! let (manager, mut events) =
//!     TransactionManager::new(transport, transport_rx, TransactionConfig::default());
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub(crate) mod types;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use sipstack_sip_core::{Message, Method, Request, Response, StatusCode};
use sipstack_sip_transport::{Transport, TransportEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use self::types::{Command, TransactionHandle};
use super::error::{Result, TransactionError};
use super::logic::create_logic;
use super::runner::{run_transaction_loop, TransactionContext};
use super::utils::{create_cancel, create_response};
use super::{
    AtomicTransactionState, TransactionConfig, TransactionEvent, TransactionKey, TransactionKind,
    TransactionState,
};

struct ManagerInner {
    transport: Arc<dyn Transport>,
    config: TransactionConfig,
    transactions: Arc<DashMap<TransactionKey, TransactionHandle>>,
    events_tx: mpsc::UnboundedSender<TransactionEvent>,
    closed: AtomicBool,
    transport_task: Mutex<Option<JoinHandle<()>>>,
}

/// Creates, looks up and drives SIP transactions.
///
/// Cheap to clone; all clones share the same transaction table.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.inner.transactions.len())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl TransactionManager {
    /// Creates a manager fed by the transport's event channel
    pub fn new(
        transport: Arc<dyn Transport>,
        mut transport_rx: mpsc::Receiver<TransportEvent>,
        config: TransactionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransactionEvent>) {
        let (manager, events) = Self::with_transport(transport, config);

        let weak = Arc::downgrade(&manager.inner);
        let task = tokio::spawn(async move {
            while let Some(event) = transport_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                let manager = TransactionManager { inner };
                match event {
                    TransportEvent::MessageReceived {
                        message, source, ..
                    } => manager.handle_message(message, source).await,
                    TransportEvent::Closed => {
                        debug!("Transport closed, stopping transport loop");
                        break;
                    }
                    TransportEvent::Error { error } => warn!(error = %error, "Transport error"),
                    other => trace!(event = ?other, "Transport event"),
                }
            }
        });
        *manager.inner.transport_task.lock() = Some(task);

        (manager, events)
    }

    /// Creates a manager without a transport event loop; inbound messages
    /// are fed in with [`Self::handle_message`]
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        config: TransactionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransactionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(ManagerInner {
                transport,
                config,
                transactions: Arc::new(DashMap::new()),
                events_tx,
                closed: AtomicBool::new(false),
                transport_task: Mutex::new(None),
            }),
        };
        (manager, events_rx)
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.clone()
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.inner.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(TransactionError::Closed)
        } else {
            Ok(())
        }
    }

    /// Starts a client transaction for `request` and sends it to `destination`.
    ///
    /// Returns once the first transmission has been handed to the transport;
    /// a failure there is returned as an error and also reported as
    /// [`TransactionEvent::TransportError`].
    pub async fn send_request(
        &self,
        request: Request,
        destination: SocketAddr,
    ) -> Result<TransactionKey> {
        self.ensure_open()?;
        if request.method == Method::Ack {
            return Err(TransactionError::InvalidMessage(
                "ACK does not create a transaction".into(),
            ));
        }
        let key = TransactionKey::for_client_request(&request)
            .ok_or_else(|| TransactionError::InvalidMessage("request without branch".into()))?;
        let kind = TransactionKind::for_method(&request.method, false);

        let (started_tx, started_rx) = oneshot::channel();
        self.spawn_transaction(key.clone(), kind, request, destination, Some(started_tx))?;
        match started_rx.await {
            Ok(result) => result.map(|_| key),
            Err(_) => Err(TransactionError::Closed),
        }
    }

    /// Sends `response` through the server transaction `key`
    pub async fn send_response(&self, key: &TransactionKey, response: Response) -> Result<()> {
        self.ensure_open()?;
        let cmd_tx = self
            .inner
            .transactions
            .get(key)
            .map(|handle| handle.cmd_tx.clone())
            .ok_or_else(|| TransactionError::NotFound(key.clone()))?;
        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(Command::SendResponse(response, tx))
            .await
            .map_err(|_| TransactionError::NotFound(key.clone()))?;
        rx.await.map_err(|_| TransactionError::NotFound(key.clone()))?
    }

    /// Sends an ACK for a 2xx, which is not part of any transaction
    pub async fn send_ack(&self, ack: Request, destination: SocketAddr) -> Result<()> {
        self.ensure_open()?;
        debug!(dest = %destination, call_id = %ack.call_id(), "Sending ACK for 2xx");
        self.inner
            .transport
            .send_message(ack.into(), destination)
            .await?;
        Ok(())
    }

    /// Cancels a pending INVITE client transaction.
    ///
    /// Only allowed once a provisional response arrived (Proceeding); the
    /// CANCEL runs as its own non-INVITE client transaction whose key is
    /// returned.
    pub async fn cancel(&self, invite: &TransactionKey) -> Result<TransactionKey> {
        self.ensure_open()?;
        let handle = self
            .inner
            .transactions
            .get(invite)
            .map(|handle| handle.clone())
            .ok_or_else(|| TransactionError::NotFound(invite.clone()))?;
        let state = handle.state.get();
        if handle.kind != TransactionKind::InviteClient || state != TransactionState::Proceeding {
            return Err(TransactionError::InvalidState {
                key: invite.clone(),
                state,
                operation: "cancel",
            });
        }
        let cancel = create_cancel(&handle.request)?;
        info!(id = %invite, "Cancelling INVITE");
        self.send_request(cancel, handle.destination).await
    }

    /// Terminates a transaction without waiting for its timers
    pub async fn abort(&self, key: &TransactionKey) -> Result<()> {
        let cmd_tx = self
            .inner
            .transactions
            .get(key)
            .map(|handle| handle.cmd_tx.clone())
            .ok_or_else(|| TransactionError::NotFound(key.clone()))?;
        cmd_tx
            .send(Command::Abort)
            .await
            .map_err(|_| TransactionError::NotFound(key.clone()))
    }

    /// Routes an inbound message to its transaction
    pub async fn handle_message(&self, message: Message, source: SocketAddr) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        match message {
            Message::Request(request) => self.handle_request(request, source).await,
            Message::Response(response) => self.handle_response(response, source).await,
        }
    }

    async fn handle_response(&self, response: Response, source: SocketAddr) {
        let Some(key) = TransactionKey::for_response(&response) else {
            debug!(source = %source, "Discarding response without branch");
            return;
        };
        let cmd_tx = self
            .inner
            .transactions
            .get(&key)
            .map(|handle| handle.cmd_tx.clone());
        match cmd_tx {
            Some(cmd_tx) => {
                let _ = cmd_tx
                    .send(Command::ProcessMessage(response.into(), source))
                    .await;
            }
            None => debug!(id = %key, status = %response.status, "Discarding unmatched response"),
        }
    }

    async fn handle_request(&self, request: Request, source: SocketAddr) {
        let Some(key) = TransactionKey::for_server_request(&request) else {
            warn!(source = %source, method = %request.method, "Discarding request without branch");
            return;
        };

        let existing = self
            .inner
            .transactions
            .get(&key)
            .map(|handle| (handle.cmd_tx.clone(), handle.state.get()));

        if request.method == Method::Ack {
            match existing {
                Some((cmd_tx, TransactionState::Completed | TransactionState::Confirmed)) => {
                    let _ = cmd_tx
                        .send(Command::ProcessMessage(request.into(), source))
                        .await;
                }
                _ => {
                    debug!(call_id = %request.call_id(), "ACK outside a transaction");
                    self.emit(TransactionEvent::AckReceived { request, source });
                }
            }
            return;
        }

        if let Some((cmd_tx, _)) = existing {
            trace!(id = %key, "Retransmitted request");
            let _ = cmd_tx
                .send(Command::ProcessMessage(request.into(), source))
                .await;
            return;
        }

        let kind = TransactionKind::for_method(&request.method, true);
        if request.method == Method::Cancel {
            self.handle_cancel(key, kind, request, source).await;
            return;
        }

        match self.spawn_transaction(key.clone(), kind, request.clone(), source, None) {
            Ok(()) => {
                debug!(id = %key, source = %source, "New server transaction");
                self.emit(TransactionEvent::NewRequest {
                    transaction_id: key,
                    request,
                    source,
                });
            }
            // Lost a race against the same retransmission
            Err(TransactionError::KeyConflict(key)) => {
                trace!(id = %key, "Server transaction created concurrently");
            }
            Err(e) => warn!(error = %e, "Could not create server transaction"),
        }
    }

    async fn handle_cancel(
        &self,
        key: TransactionKey,
        kind: TransactionKind,
        request: Request,
        source: SocketAddr,
    ) {
        if let Err(e) = self.spawn_transaction(key.clone(), kind, request.clone(), source, None) {
            trace!(id = %key, error = %e, "CANCEL transaction not created");
            return;
        }

        let invite_key = key.with_method(Method::Invite);
        let pending = self
            .inner
            .transactions
            .get(&invite_key)
            .map(|handle| handle.state.get() == TransactionState::Proceeding)
            .unwrap_or(false);

        let status = if pending {
            StatusCode::Ok
        } else {
            StatusCode::CallOrTransactionDoesNotExist
        };
        let response = create_response(&request, status);
        if let Err(e) = self.send_response(&key, response).await {
            warn!(id = %key, error = %e, "Could not answer CANCEL");
            return;
        }

        if pending {
            info!(id = %invite_key, "INVITE cancelled by peer");
            self.emit(TransactionEvent::CancelReceived {
                transaction_id: invite_key,
                request,
                source,
            });
        }
    }

    fn spawn_transaction(
        &self,
        key: TransactionKey,
        kind: TransactionKind,
        request: Request,
        destination: SocketAddr,
        started: Option<oneshot::Sender<Result<()>>>,
    ) -> Result<()> {
        let reliable = request
            .headers
            .top_via()
            .map(|via| via.transport.is_reliable())
            .unwrap_or(false);
        let state = Arc::new(AtomicTransactionState::new(kind.initial_state()));
        let (cmd_tx, cmd_rx) = mpsc::channel(self.inner.config.channel_capacity);

        match self.inner.transactions.entry(key.clone()) {
            Entry::Occupied(_) => return Err(TransactionError::KeyConflict(key)),
            Entry::Vacant(slot) => {
                slot.insert(TransactionHandle {
                    kind,
                    state: state.clone(),
                    cmd_tx: cmd_tx.clone(),
                    request: Arc::new(request.clone()),
                    destination,
                });
            }
        }

        let logic = create_logic(kind, request, self.inner.config.timers.clone(), reliable);
        let ctx = TransactionContext {
            key,
            state,
            destination,
            transport: self.inner.transport.clone(),
            events: self.inner.events_tx.clone(),
            cmd_tx,
            table: self.inner.transactions.clone(),
        };
        tokio::spawn(run_transaction_loop(ctx, logic, cmd_rx, started));
        Ok(())
    }

    fn emit(&self, event: TransactionEvent) {
        if self.inner.events_tx.send(event).is_err() {
            trace!("Transaction event receiver dropped");
        }
    }

    /// Current state, or `None` once the transaction is gone
    pub fn state(&self, key: &TransactionKey) -> Option<TransactionState> {
        self.inner
            .transactions
            .get(key)
            .map(|handle| handle.state.get())
    }

    pub fn transaction_kind(&self, key: &TransactionKey) -> Option<TransactionKind> {
        self.inner.transactions.get(key).map(|handle| handle.kind)
    }

    /// The request that created the transaction
    pub fn original_request(&self, key: &TransactionKey) -> Option<Request> {
        self.inner
            .transactions
            .get(key)
            .map(|handle| handle.request.as_ref().clone())
    }

    pub fn active_transactions(&self) -> Vec<TransactionKey> {
        self.inner
            .transactions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Aborts all transactions and stops routing inbound messages
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(active = self.inner.transactions.len(), "Shutting down transaction manager");
        if let Some(task) = self.inner.transport_task.lock().take() {
            task.abort();
        }
        let senders: Vec<_> = self
            .inner
            .transactions
            .iter()
            .map(|entry| entry.value().cmd_tx.clone())
            .collect();
        for cmd_tx in senders {
            let _ = cmd_tx.send(Command::Abort).await;
        }
    }
}
