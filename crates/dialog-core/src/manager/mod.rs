//! # Dialog Manager
//!
//! Keeps the table of dialogs and turns transaction events into dialog
//! transitions (RFC 3261 Sections 12 to 15, RFC 3262, RFC 3311).
//!
//! The manager is split over several files, each adding an `impl` block:
//!
//! - `uac`: outgoing INVITE, CANCEL, PRACK and the 2xx/ACK exchange
//! - `uas`: incoming INVITE, provisional and final responses, PRACK, ACK
//! - `in_dialog`: re-INVITE, UPDATE, BYE and other in-dialog requests
//! - `timers`: reliable 1xx and 2xx retransmission
//!
//! ## Concurrency
//!
//! One dispatcher task reads the transaction event stream. Every dialog
//! sits behind its own async mutex, so work on one call never waits for
//! another. Requests are registered against their dialog before they are
//! sent, and the entry lock is held across the send; a response that races
//! the send therefore waits for the bookkeeping to finish. Application
//! events are only sent after the lock is released.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sipstack_dialog_core::transaction::{TransactionConfig, TransactionManager};
//! use sipstack_dialog_core::{DialogConfig, DialogEvent, DialogManager};
//! use sipstack_sip_core::StatusCode;
//! use sipstack_sip_transport::{Transport, TransportConfig, TransportManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let local = "192.0.2.1:5060".parse()?;
//! let (transport, transport_rx) = TransportManager::new(TransportConfig::default());
//! transport.bind_udp(local).await?;
//! let transport: Arc<dyn Transport> = Arc::new(transport);
//!
//! let (transactions, tx_events) =
//!     TransactionManager::new(transport, transport_rx, TransactionConfig::default());
//! let (dialogs, mut events) = DialogManager::new(transactions, tx_events, DialogConfig::new(local));
//!
//! while let Some(event) = events.recv().await {
//!     if let DialogEvent::IncomingInvite { dialog_id, .. } = event {
//!         dialogs.respond(dialog_id, StatusCode::BusyHere, None).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod entry;
mod in_dialog;
mod timers;
mod uac;
mod uas;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use sipstack_sip_core::builder::{generate_branch, generate_tag, SimpleResponseBuilder};
use sipstack_sip_core::{Method, NameAddr, Request, Response, StatusCode, Via, EXT_100REL};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use self::entry::{DialogEntry, Purpose};
use crate::config::DialogConfig;
use crate::dialog::{Dialog, DialogId, DialogKey, DialogState, Session};
use crate::errors::{DialogError, DialogResult};
use crate::events::{DialogEvent, DialogFailure};
use crate::transaction::{TransactionEvent, TransactionKey, TransactionManager};

pub(crate) struct DialogInner {
    transactions: TransactionManager,
    config: DialogConfig,
    dialogs: DashMap<DialogId, Arc<Mutex<DialogEntry>>>,
    by_key: DashMap<DialogKey, DialogId>,
    /// Call-ID and From tag of dialogs created by a received INVITE
    by_remote: DashMap<(String, String), DialogId>,
    by_transaction: DashMap<TransactionKey, (DialogId, Purpose)>,
    events_tx: mpsc::UnboundedSender<DialogEvent>,
    closed: AtomicBool,
    dispatcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Creates and drives SIP dialogs on top of a [`TransactionManager`].
///
/// Cheap to clone; all clones share the same dialogs.
#[derive(Clone)]
pub struct DialogManager {
    pub(crate) inner: Arc<DialogInner>,
}

impl std::fmt::Debug for DialogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogManager")
            .field("dialogs", &self.inner.dialogs.len())
            .field("local_address", &self.inner.config.local_address)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl DialogManager {
    /// Creates a manager consuming the transaction event stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        transactions: TransactionManager,
        mut transaction_events: mpsc::UnboundedReceiver<TransactionEvent>,
        config: DialogConfig,
    ) -> (Self, mpsc::UnboundedReceiver<DialogEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(DialogInner {
                transactions,
                config,
                dialogs: DashMap::new(),
                by_key: DashMap::new(),
                by_remote: DashMap::new(),
                by_transaction: DashMap::new(),
                events_tx,
                closed: AtomicBool::new(false),
                dispatcher: parking_lot::Mutex::new(None),
            }),
        };

        let weak = Arc::downgrade(&manager.inner);
        let task = tokio::spawn(async move {
            while let Some(event) = transaction_events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                DialogManager { inner }.handle_transaction_event(event).await;
            }
            debug!("Transaction event stream ended");
        });
        *manager.inner.dispatcher.lock() = Some(task);

        (manager, events_rx)
    }

    pub fn config(&self) -> &DialogConfig {
        &self.inner.config
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.inner.transactions
    }

    /// Snapshot of a dialog
    pub async fn dialog(&self, id: DialogId) -> DialogResult<Dialog> {
        let entry = self.entry(id)?;
        let entry = entry.lock().await;
        Ok(entry.dialog.clone())
    }

    pub async fn state(&self, id: DialogId) -> DialogResult<DialogState> {
        let entry = self.entry(id)?;
        let state = entry.lock().await.dialog.state;
        Ok(state)
    }

    /// Committed offer/answer bodies
    pub async fn session(&self, id: DialogId) -> DialogResult<Session> {
        let entry = self.entry(id)?;
        let session = entry.lock().await.dialog.session.clone();
        Ok(session)
    }

    /// Dialog for a Call-ID and tag pair, as seen from this side
    pub fn find_dialog(&self, key: &DialogKey) -> Option<DialogId> {
        self.inner.by_key.get(key).map(|id| *id)
    }

    /// Number of dialogs that have not terminated yet
    pub fn dialog_count(&self) -> usize {
        self.inner.dialogs.len()
    }

    /// Stops event processing, drops every dialog and shuts the transaction
    /// layer down
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(dialogs = self.inner.dialogs.len(), "Shutting down dialog manager");
        if let Some(task) = self.inner.dispatcher.lock().take() {
            task.abort();
        }
        let entries: Vec<_> = self
            .inner
            .dialogs
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for entry in entries {
            entry.lock().await.stop_timers();
        }
        self.inner.dialogs.clear();
        self.inner.by_key.clear();
        self.inner.by_remote.clear();
        self.inner.by_transaction.clear();
        self.inner.transactions.shutdown().await;
    }

    fn ensure_open(&self) -> DialogResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(DialogError::Closed)
        } else {
            Ok(())
        }
    }

    fn entry(&self, id: DialogId) -> DialogResult<Arc<Mutex<DialogEntry>>> {
        self.inner
            .dialogs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(DialogError::NotFound(id))
    }

    fn lookup(&self, key: &TransactionKey) -> Option<(DialogId, Purpose)> {
        self.inner
            .by_transaction
            .get(key)
            .map(|entry| entry.value().clone())
    }

    /// Still mapped; a failed send unregisters its transaction while the
    /// entry lock is held
    fn is_registered(&self, key: &TransactionKey) -> bool {
        self.inner.by_transaction.contains_key(key)
    }

    fn register_key(&self, dialog: &Dialog) {
        if let Some(key) = dialog.key() {
            self.inner.by_key.insert(key, dialog.id);
        }
    }

    fn remove_dialog(&self, id: DialogId) {
        if self.inner.dialogs.remove(&id).is_none() {
            return;
        }
        self.inner.by_key.retain(|_, dialog| *dialog != id);
        self.inner.by_remote.retain(|_, dialog| *dialog != id);
        self.inner.by_transaction.retain(|_, (dialog, _)| *dialog != id);
        debug!(dialog = %id, "Dialog removed");
    }

    /// Delivers events in order; a `Terminated` event drops the dialog
    fn emit(&self, events: Vec<DialogEvent>) {
        let mut terminated = None;
        for event in events {
            if let DialogEvent::Terminated { dialog_id, .. } = &event {
                terminated = Some(*dialog_id);
            }
            if self.inner.events_tx.send(event).is_err() {
                trace!("Dialog event receiver dropped");
            }
        }
        if let Some(id) = terminated {
            self.remove_dialog(id);
        }
    }

    fn via(&self) -> Via {
        Via::new(
            self.inner.config.transport,
            self.inner.config.local_address,
            generate_branch(),
        )
    }

    /// Request inside `dialog` with the headers every request from us carries
    fn in_dialog_request(
        &self,
        dialog: &Dialog,
        method: Method,
        cseq: u32,
        body: Option<Bytes>,
    ) -> Request {
        let config = &self.inner.config;
        let mut request = dialog.create_request(method.clone(), cseq, self.via());
        request.headers.max_forwards = Some(config.max_forwards);
        if matches!(method, Method::Invite | Method::Update) {
            request.headers.contact = Some(NameAddr::new(config.contact_uri()));
            request.headers.supported.push(EXT_100REL.to_string());
        }
        request.headers.user_agent = config.user_agent.clone();
        if let Some(body) = body.filter(|body| !body.is_empty()) {
            request.headers.content_type = Some(crate::dialog::SDP_CONTENT_TYPE.to_string());
            request.body = body;
        }
        request
    }

    /// Response sent by the dialog layer on behalf of a dialog
    fn dialog_response(
        &self,
        request: &Request,
        status: StatusCode,
        local_tag: &str,
        body: Option<&Bytes>,
    ) -> Response {
        let config = &self.inner.config;
        let mut builder = SimpleResponseBuilder::response_from_request(request, status);
        if status != StatusCode::Trying {
            builder = builder.to_tag(local_tag);
        }
        if !status.is_failure() && matches!(request.method, Method::Invite | Method::Update) {
            builder = builder.contact(config.contact_uri());
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(body) = body {
            builder = builder.body(crate::dialog::SDP_CONTENT_TYPE, body.clone());
        }
        builder.build()
    }

    /// Answers a request that will not reach the application
    async fn reply(&self, key: &TransactionKey, request: &Request, status: StatusCode) {
        let response = self.dialog_response(request, status, &generate_tag(), None);
        if let Err(e) = self.inner.transactions.send_response(key, response).await {
            warn!(id = %key, status = %status, error = %e, "Could not send response");
        }
    }

    /// Registers `purpose` for the request's transaction, then sends it.
    ///
    /// The caller holds the dialog's lock.
    async fn send_dialog_request(
        &self,
        id: DialogId,
        purpose: Purpose,
        request: Request,
        destination: SocketAddr,
    ) -> DialogResult<TransactionKey> {
        let key = TransactionKey::for_client_request(&request)
            .ok_or_else(|| DialogError::InvalidRequest("request without branch".into()))?;
        self.inner
            .by_transaction
            .insert(key.clone(), (id, purpose));
        debug!(dialog = %id, method = %request.method, dest = %destination, "Sending request");
        match self.inner.transactions.send_request(request, destination).await {
            Ok(key) => Ok(key),
            Err(e) => {
                self.inner.by_transaction.remove(&key);
                Err(e.into())
            }
        }
    }

    async fn handle_transaction_event(&self, event: TransactionEvent) {
        match event {
            TransactionEvent::NewRequest {
                transaction_id,
                request,
                source,
            } => self.handle_new_request(transaction_id, request, source).await,
            TransactionEvent::AckReceived { request, .. } => self.handle_ack(request).await,
            TransactionEvent::CancelReceived { transaction_id, .. } => {
                self.handle_cancel_received(transaction_id).await
            }
            TransactionEvent::ProvisionalResponse {
                transaction_id,
                response,
                ..
            }
            | TransactionEvent::SuccessResponse {
                transaction_id,
                response,
                ..
            }
            | TransactionEvent::FailureResponse {
                transaction_id,
                response,
                ..
            } => self.handle_response(transaction_id, response).await,
            TransactionEvent::Timeout { transaction_id } => {
                self.handle_client_failure(transaction_id, DialogFailure::Timeout)
                    .await
            }
            TransactionEvent::TransportError {
                transaction_id,
                error,
            } => {
                self.handle_client_failure(transaction_id, DialogFailure::Transport(error))
                    .await
            }
            TransactionEvent::Terminated { transaction_id } => {
                self.inner.by_transaction.remove(&transaction_id);
            }
            TransactionEvent::StateChanged { .. } => {}
        }
    }

    async fn handle_response(&self, key: TransactionKey, response: Response) {
        let Some((id, purpose)) = self.lookup(&key) else {
            trace!(id = %key, status = %response.status, "Response for no dialog");
            return;
        };
        match purpose {
            Purpose::Invite => self.on_invite_response(id, key, response).await,
            Purpose::Modification(method) => {
                self.on_modification_response(id, key, method, response)
                    .await
            }
            Purpose::Bye => self.on_bye_response(id, key, response).await,
            Purpose::Request(method) => self.on_request_response(id, key, method, response).await,
            Purpose::Prack if response.status.is_failure() => {
                warn!(dialog = %id, status = %response.status, "PRACK rejected");
            }
            Purpose::Prack | Purpose::Cancel | Purpose::InviteServer => {
                trace!(dialog = %id, status = %response.status, "Response ignored");
            }
        }
    }

    /// Timeout or transport failure of one of our transactions
    async fn handle_client_failure(&self, key: TransactionKey, failure: DialogFailure) {
        let Some((id, purpose)) = self.lookup(&key) else {
            return;
        };
        let Ok(entry) = self.entry(id) else { return };
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            if !self.is_registered(&key) || entry.dialog.state.is_terminated() {
                return;
            }
            match purpose {
                Purpose::Invite => {
                    if entry.answered {
                        return;
                    }
                    entry.answered = true;
                    warn!(dialog = %id, failure = ?failure, "INVITE failed");
                    events.push(DialogEvent::Failure {
                        dialog_id: id,
                        failure: failure.clone(),
                    });
                    let reason = match failure {
                        DialogFailure::Timeout => "INVITE timed out",
                        _ => "INVITE could not be delivered",
                    };
                    entry.terminate(reason, &mut events);
                }
                Purpose::Modification(method) => {
                    let current = entry
                        .modification
                        .as_ref()
                        .map_or(false, |pending| pending.transaction == key);
                    if current {
                        entry.modification = None;
                        warn!(dialog = %id, method = %method, "Session modification failed");
                        events.push(DialogEvent::ModificationFailed {
                            dialog_id: id,
                            method,
                            failure,
                        });
                    }
                }
                Purpose::Bye => {
                    events.push(DialogEvent::ByeCompleted {
                        dialog_id: id,
                        status: None,
                    });
                    entry.terminate("BYE got no response", &mut events);
                }
                Purpose::Request(method) => {
                    events.push(DialogEvent::RequestFailed {
                        dialog_id: id,
                        method,
                        failure,
                    });
                }
                Purpose::InviteServer => {
                    warn!(dialog = %id, failure = ?failure, "INVITE server transaction failed");
                }
                Purpose::Prack | Purpose::Cancel => {
                    debug!(dialog = %id, failure = ?failure, "Transaction failed");
                }
            }
        }
        self.emit(events);
    }
}
