//! Callee side of the INVITE dialog

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use sipstack_sip_core::builder::generate_tag;
use sipstack_sip_core::{Method, Request, Response, StatusCode, Via, EXT_100REL};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::entry::{DialogEntry, IncomingModification, Purpose, ReliableProvisional, UnackedSuccess};
use super::DialogManager;
use crate::dialog::{Dialog, DialogId, DialogKey, DialogState};
use crate::errors::{DialogError, DialogResult};
use crate::events::DialogEvent;
use crate::transaction::TransactionKey;

impl DialogManager {
    /// Sends 180 Ringing, reliably (RFC 3262) when `reliable` is set
    pub async fn ring(&self, id: DialogId, reliable: bool) -> DialogResult<()> {
        self.ensure_open()?;
        let entry = self.entry(id)?;
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            let reliable = reliable || entry.peer_requires_100rel;
            self.send_provisional(&mut entry, StatusCode::Ringing, None, reliable, &mut events)
                .await?;
        }
        self.emit(events);
        Ok(())
    }

    /// Answers the incoming INVITE with 200 OK
    pub async fn accept(&self, id: DialogId, answer: Option<Bytes>) -> DialogResult<()> {
        self.ensure_open()?;
        let entry = self.entry(id)?;
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            self.send_success(&mut entry, StatusCode::Ok, answer, &mut events)
                .await?;
        }
        self.emit(events);
        Ok(())
    }

    /// Rejects the incoming INVITE with a 3xx-6xx status
    pub async fn reject(&self, id: DialogId, status: StatusCode) -> DialogResult<()> {
        self.ensure_open()?;
        if !status.is_failure() {
            return Err(DialogError::InvalidRequest(format!(
                "{} is not a rejection status",
                status
            )));
        }
        let entry = self.entry(id)?;
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            self.send_rejection(&mut entry, status, &mut events).await?;
        }
        self.emit(events);
        Ok(())
    }

    /// Answers whatever request of the peer is waiting for us.
    ///
    /// A pending re-INVITE or UPDATE is answered first; otherwise the
    /// response goes to the initial INVITE. A 1xx to the initial INVITE is
    /// sent reliably when the peer requires 100rel, or supports it and the
    /// response carries a body.
    pub async fn respond(
        &self,
        id: DialogId,
        status: StatusCode,
        body: Option<Bytes>,
    ) -> DialogResult<()> {
        self.ensure_open()?;
        let entry = self.entry(id)?;
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            if let Some(incoming) = entry.incoming_modification.take() {
                self.respond_modification(&mut entry, incoming, status, body)
                    .await?;
            } else if !entry.dialog.is_initiator && !entry.answered {
                if status.is_provisional() {
                    let reliable = entry.peer_requires_100rel
                        || (entry.peer_supports_100rel && body.is_some());
                    self.send_provisional(&mut entry, status, body, reliable, &mut events)
                        .await?;
                } else if status.is_success() {
                    self.send_success(&mut entry, status, body, &mut events)
                        .await?;
                } else {
                    self.send_rejection(&mut entry, status, &mut events).await?;
                }
            } else {
                return Err(DialogError::invalid_state(id, entry.dialog.state, "respond"));
            }
        }
        self.emit(events);
        Ok(())
    }

    fn ensure_uas_pending(&self, entry: &DialogEntry, operation: &'static str) -> DialogResult<TransactionKey> {
        let dialog = &entry.dialog;
        if dialog.is_initiator || entry.answered || !dialog.state.is_pending() {
            return Err(DialogError::invalid_state(dialog.id, dialog.state, operation));
        }
        entry
            .invite_tx
            .clone()
            .ok_or_else(|| DialogError::invalid_state(dialog.id, dialog.state, operation))
    }

    async fn send_provisional(
        &self,
        entry: &mut DialogEntry,
        status: StatusCode,
        body: Option<Bytes>,
        reliable: bool,
        events: &mut Vec<DialogEvent>,
    ) -> DialogResult<()> {
        let transaction = self.ensure_uas_pending(entry, "provisional response")?;
        let id = entry.dialog.id;
        let reliable = reliable && status != StatusCode::Trying;
        if reliable && !entry.peer_supports_100rel {
            return Err(DialogError::ExtensionNotSupported(EXT_100REL));
        }
        if reliable && entry.outstanding_provisional.is_some() {
            return Err(DialogError::invalid_state(
                id,
                entry.dialog.state,
                "reliable provisional while another is unacknowledged",
            ));
        }

        let mut response = self.dialog_response(&entry.invite, status, &entry.local_tag(), body.as_ref());
        let rseq = entry.next_rseq;
        if reliable {
            response.headers.rseq = Some(rseq);
            response.headers.require.push(EXT_100REL.to_string());
        }
        self.inner
            .transactions
            .send_response(&transaction, response.clone())
            .await?;

        if status != StatusCode::Trying {
            entry.transition(DialogState::Early, events);
        }
        if let Some(body) = body {
            entry.dialog.session.local = Some(body);
        }
        if reliable {
            entry.next_rseq += 1;
            let timer = self.spawn_provisional_retransmit(
                id,
                transaction,
                response,
                rseq,
                transport_is_reliable(&entry.invite),
            );
            entry.outstanding_provisional = Some(ReliableProvisional { rseq, timer });
            debug!(dialog = %id, status = %status, rseq, "Reliable provisional response sent");
        } else {
            debug!(dialog = %id, status = %status, "Provisional response sent");
        }
        Ok(())
    }

    async fn send_success(
        &self,
        entry: &mut DialogEntry,
        status: StatusCode,
        answer: Option<Bytes>,
        events: &mut Vec<DialogEvent>,
    ) -> DialogResult<()> {
        let transaction = self.ensure_uas_pending(entry, "accept")?;
        let id = entry.dialog.id;
        let response = self.dialog_response(&entry.invite, status, &entry.local_tag(), answer.as_ref());
        self.inner
            .transactions
            .send_response(&transaction, response.clone())
            .await?;

        entry.answered = true;
        if let Some(pending) = entry.outstanding_provisional.take() {
            pending.timer.abort();
        }
        if let Some(answer) = answer {
            entry.dialog.session.local = Some(answer);
        }
        entry.transition(DialogState::Confirmed, events);
        info!(dialog = %id, status = %status, "Call accepted");

        let invite = entry.invite.clone();
        self.start_success_retransmit(entry, &invite, response);
        Ok(())
    }

    async fn send_rejection(
        &self,
        entry: &mut DialogEntry,
        status: StatusCode,
        events: &mut Vec<DialogEvent>,
    ) -> DialogResult<()> {
        let transaction = self.ensure_uas_pending(entry, "reject")?;
        let response = self.dialog_response(&entry.invite, status, &entry.local_tag(), None);
        self.inner
            .transactions
            .send_response(&transaction, response)
            .await?;
        entry.answered = true;
        info!(dialog = %entry.dialog.id, status = %status, "Call rejected");
        entry.terminate(format!("rejected with {}", status.as_u16()), events);
        Ok(())
    }

    /// Starts retransmitting a 2xx to INVITE until its ACK arrives
    pub(super) fn start_success_retransmit(
        &self,
        entry: &mut DialogEntry,
        request: &Request,
        response: Response,
    ) {
        if let Some(previous) = entry.unacked_success.take() {
            previous.timer.abort();
        }
        let cseq = request.cseq().seq;
        let destination = request
            .headers
            .top_via()
            .and_then(Via::response_addr)
            .unwrap_or(entry.dialog.remote_addr);
        let timer = self.spawn_success_retransmit(
            entry.dialog.id,
            cseq,
            response,
            destination,
            transport_is_reliable(request),
        );
        entry.unacked_success = Some(UnackedSuccess { cseq, timer });
    }

    async fn respond_modification(
        &self,
        entry: &mut DialogEntry,
        incoming: IncomingModification,
        status: StatusCode,
        body: Option<Bytes>,
    ) -> DialogResult<()> {
        let id = entry.dialog.id;
        let response =
            self.dialog_response(&incoming.request, status, &entry.local_tag(), body.as_ref());
        if let Err(e) = self
            .inner
            .transactions
            .send_response(&incoming.transaction, response.clone())
            .await
        {
            entry.incoming_modification = Some(incoming);
            return Err(e.into());
        }

        if status.is_provisional() {
            entry.incoming_modification = Some(incoming);
            return Ok(());
        }
        if status.is_success() {
            let request = &incoming.request;
            if request.has_body() {
                entry.dialog.session.remote = Some(request.body.clone());
            }
            if let Some(body) = body {
                entry.dialog.session.local = Some(body);
            }
            if let Some(contact) = &request.headers.contact {
                entry.dialog.remote_target = contact.uri.clone();
            }
            if incoming.method == Method::Invite {
                self.start_success_retransmit(entry, request, response);
            }
            info!(dialog = %id, method = %incoming.method, "Session modification accepted");
        } else {
            info!(dialog = %id, method = %incoming.method, status = %status, "Session modification refused");
        }
        Ok(())
    }

    pub(super) async fn handle_new_request(
        &self,
        key: TransactionKey,
        request: Request,
        source: SocketAddr,
    ) {
        if request.to_tag().is_some() {
            self.handle_in_dialog_request(key, request).await;
            return;
        }
        match request.method {
            Method::Invite => self.handle_initial_invite(key, request, source).await,
            Method::Options => self.reply(&key, &request, StatusCode::Ok).await,
            Method::Bye | Method::Prack | Method::Update | Method::Info | Method::Notify => {
                debug!(method = %request.method, "Dialog request without To tag");
                self.reply(&key, &request, StatusCode::CallOrTransactionDoesNotExist)
                    .await
            }
            _ => {
                debug!(method = %request.method, "Unsupported request");
                self.reply(&key, &request, StatusCode::NotImplemented).await
            }
        }
    }

    async fn handle_initial_invite(&self, key: TransactionKey, request: Request, source: SocketAddr) {
        let Some(from_tag) = request.from_tag().map(str::to_string) else {
            self.reply(&key, &request, StatusCode::BadRequest).await;
            return;
        };
        let remote = (request.call_id().to_string(), from_tag);
        let existing = self.inner.by_remote.get(&remote).map(|id| *id);
        if let Some(existing) = existing {
            // After a 2xx the server transaction is gone, so a late
            // retransmission of the INVITE shows up as a new request
            if let Ok(entry) = self.entry(existing) {
                if entry.lock().await.invite.branch() == request.branch() {
                    trace!(dialog = %existing, "INVITE retransmission after 2xx");
                    let _ = self.inner.transactions.abort(&key).await;
                    return;
                }
            }
            debug!(call_id = %remote.0, "Merged INVITE");
            self.reply(&key, &request, StatusCode::LoopDetected).await;
            return;
        }

        let dialog = match Dialog::from_incoming_invite(&request, generate_tag(), source) {
            Ok(dialog) => dialog,
            Err(e) => {
                warn!(error = %e, "Could not create dialog");
                self.reply(&key, &request, StatusCode::BadRequest).await;
                return;
            }
        };
        let id = dialog.id;
        self.register_key(&dialog);
        let mut entry = DialogEntry::new(dialog, request.clone());
        entry.invite_tx = Some(key.clone());
        self.inner
            .dialogs
            .insert(id, Arc::new(Mutex::new(entry)));
        self.inner.by_remote.insert(remote, id);
        self.inner
            .by_transaction
            .insert(key, (id, Purpose::InviteServer));

        info!(dialog = %id, source = %source, call_id = %request.call_id(), "Incoming INVITE");
        self.emit(vec![DialogEvent::IncomingInvite {
            dialog_id: id,
            request,
        }]);
    }

    pub(super) async fn handle_cancel_received(&self, invite_key: TransactionKey) {
        let Some((id, Purpose::InviteServer)) = self.lookup(&invite_key) else {
            return;
        };
        let Ok(entry) = self.entry(id) else { return };
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            if entry.answered || entry.dialog.state.is_terminated() {
                debug!(dialog = %id, "CANCEL after final response");
                return;
            }
            let response =
                self.dialog_response(&entry.invite, StatusCode::RequestTerminated, &entry.local_tag(), None);
            if let Err(e) = self
                .inner
                .transactions
                .send_response(&invite_key, response)
                .await
            {
                warn!(dialog = %id, error = %e, "Could not send 487");
            }
            entry.answered = true;
            info!(dialog = %id, "Call cancelled by peer");
            events.push(DialogEvent::CancelReceived { dialog_id: id });
            entry.terminate("cancelled by peer", &mut events);
        }
        self.emit(events);
    }

    pub(super) async fn handle_ack(&self, request: Request) {
        let Some(key) = DialogKey::for_incoming(&request) else {
            debug!("ACK without tags");
            return;
        };
        let Some(id) = self.find_dialog(&key) else {
            debug!(call_id = %key.call_id, "ACK matches no dialog");
            return;
        };
        let Ok(entry) = self.entry(id) else { return };
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            match entry.unacked_success.take() {
                Some(pending) if pending.cseq == request.cseq().seq => {
                    pending.timer.abort();
                    let body = request.has_body().then(|| request.body.clone());
                    if let Some(body) = &body {
                        entry.dialog.session.remote = Some(body.clone());
                    }
                    debug!(dialog = %id, "ACK received");
                    events.push(DialogEvent::AckReceived {
                        dialog_id: id,
                        body,
                    });
                }
                other => {
                    entry.unacked_success = other;
                    trace!(dialog = %id, "ACK retransmission");
                }
            }
        }
        self.emit(events);
    }

    /// PRACK for our reliable 1xx (RFC 3262 Section 3)
    pub(super) async fn on_prack_received(
        &self,
        entry: &mut DialogEntry,
        key: &TransactionKey,
        request: &Request,
        events: &mut Vec<DialogEvent>,
    ) {
        let id = entry.dialog.id;
        let invite_cseq = entry.invite.cseq().seq;
        let matched = match (&entry.outstanding_provisional, &request.headers.rack) {
            (Some(pending), Some(rack)) => {
                rack.rseq == pending.rseq && rack.cseq == invite_cseq && rack.method == Method::Invite
            }
            _ => false,
        };
        if !matched {
            debug!(dialog = %id, "PRACK matches no reliable provisional response");
            self.reply(key, request, StatusCode::CallOrTransactionDoesNotExist)
                .await;
            return;
        }
        let Some(pending) = entry.outstanding_provisional.take() else {
            return;
        };
        pending.timer.abort();
        if request.has_body() {
            entry.dialog.session.remote = Some(request.body.clone());
        }
        self.reply(key, request, StatusCode::Ok).await;
        debug!(dialog = %id, rseq = pending.rseq, "Reliable provisional response confirmed");
        events.push(DialogEvent::ReliableProvisionalConfirmed {
            dialog_id: id,
            rseq: pending.rseq,
        });
    }
}

fn transport_is_reliable(request: &Request) -> bool {
    request
        .headers
        .top_via()
        .map(|via| via.transport.is_reliable())
        .unwrap_or(false)
}
