//! Requests inside an established or early dialog

use bytes::Bytes;
use sipstack_sip_core::{Method, Request, Response, StatusCode};
use tracing::{debug, info, trace, warn};

use super::entry::{DialogEntry, IncomingModification, PendingModification, Purpose};
use super::DialogManager;
use crate::dialog::{DialogId, DialogKey, DialogState};
use crate::errors::{DialogError, DialogResult};
use crate::events::{DialogEvent, DialogFailure};
use crate::transaction::TransactionKey;

impl DialogManager {
    /// Sends a re-INVITE with a new offer.
    ///
    /// The session is only updated when the re-INVITE succeeds; any other
    /// outcome leaves the dialog exactly as it was.
    pub async fn reinvite(&self, id: DialogId, offer: Option<Bytes>) -> DialogResult<()> {
        self.start_modification(id, Method::Invite, offer).await
    }

    /// Sends an UPDATE (RFC 3311) with a new offer; usable in early dialogs
    pub async fn update(&self, id: DialogId, offer: Option<Bytes>) -> DialogResult<()> {
        self.start_modification(id, Method::Update, offer).await
    }

    /// Sends any other in-dialog request, e.g. INFO or MESSAGE.
    ///
    /// `body` is a content type and payload. The final response is
    /// reported as [`DialogEvent::ResponseReceived`].
    pub async fn request(
        &self,
        id: DialogId,
        method: Method,
        body: Option<(String, Bytes)>,
    ) -> DialogResult<()> {
        self.ensure_open()?;
        if matches!(
            method,
            Method::Invite | Method::Ack | Method::Cancel | Method::Bye | Method::Prack | Method::Update
        ) {
            return Err(DialogError::InvalidRequest(format!(
                "{} has its own operation",
                method
            )));
        }
        let entry = self.entry(id)?;
        let mut entry = entry.lock().await;
        if !matches!(entry.dialog.state, DialogState::Early | DialogState::Confirmed) {
            return Err(DialogError::invalid_state(id, entry.dialog.state, "request"));
        }
        let cseq = entry.dialog.next_local_cseq();
        let mut request = self.in_dialog_request(&entry.dialog, method.clone(), cseq, None);
        if let Some((content_type, body)) = body {
            request.headers.content_type = Some(content_type);
            request.body = body;
        }
        let destination = entry.dialog.next_hop();
        self.send_dialog_request(id, Purpose::Request(method), request, destination)
            .await?;
        Ok(())
    }

    /// Hangs up a confirmed dialog.
    ///
    /// The dialog terminates once the BYE transaction finishes, whatever
    /// its outcome.
    pub async fn bye(&self, id: DialogId) -> DialogResult<()> {
        self.ensure_open()?;
        let entry = self.entry(id)?;
        let mut events = Vec::new();
        let result = {
            let mut entry = entry.lock().await;
            if entry.bye_tx.is_some() || entry.dialog.state != DialogState::Confirmed {
                return Err(DialogError::invalid_state(id, entry.dialog.state, "bye"));
            }
            self.send_bye(&mut entry, &mut events).await
        };
        self.emit(events);
        result
    }

    /// Sends BYE; when it cannot be sent the dialog ends right away
    pub(super) async fn send_bye(
        &self,
        entry: &mut DialogEntry,
        events: &mut Vec<DialogEvent>,
    ) -> DialogResult<()> {
        let id = entry.dialog.id;
        entry.stop_timers();
        entry.awaiting_answer = false;
        let cseq = entry.dialog.next_local_cseq();
        let request = self.in_dialog_request(&entry.dialog, Method::Bye, cseq, None);
        let destination = entry.dialog.next_hop();
        match self
            .send_dialog_request(id, Purpose::Bye, request, destination)
            .await
        {
            Ok(key) => {
                info!(dialog = %id, "BYE sent");
                entry.bye_tx = Some(key);
                Ok(())
            }
            Err(e) => {
                warn!(dialog = %id, error = %e, "Could not send BYE");
                events.push(DialogEvent::ByeCompleted {
                    dialog_id: id,
                    status: None,
                });
                entry.terminate("BYE could not be sent", events);
                Err(e)
            }
        }
    }

    async fn start_modification(
        &self,
        id: DialogId,
        method: Method,
        offer: Option<Bytes>,
    ) -> DialogResult<()> {
        self.ensure_open()?;
        let entry = self.entry(id)?;
        let mut entry = entry.lock().await;
        let state = entry.dialog.state;
        let allowed = match method {
            Method::Invite => state == DialogState::Confirmed && entry.bye_tx.is_none(),
            _ => matches!(state, DialogState::Early | DialogState::Confirmed) && entry.bye_tx.is_none(),
        };
        if !allowed {
            return Err(DialogError::invalid_state(id, state, "session modification"));
        }
        if entry.modification.is_some() || entry.incoming_modification.is_some() {
            return Err(DialogError::ModificationPending(id));
        }

        let cseq = entry.dialog.next_local_cseq();
        let request = self.in_dialog_request(&entry.dialog, method.clone(), cseq, offer.clone());
        let destination = entry.dialog.next_hop();
        let transaction = self
            .send_dialog_request(id, Purpose::Modification(method.clone()), request, destination)
            .await?;
        debug!(dialog = %id, method = %method, cseq, "Session modification sent");
        entry.modification = Some(PendingModification {
            transaction,
            offer,
            cseq,
        });
        Ok(())
    }

    pub(super) async fn on_modification_response(
        &self,
        id: DialogId,
        key: TransactionKey,
        method: Method,
        response: Response,
    ) {
        let Ok(entry) = self.entry(id) else { return };
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            if !self.is_registered(&key) || entry.dialog.state.is_terminated() {
                return;
            }
            let current = entry
                .modification
                .as_ref()
                .map_or(false, |pending| pending.transaction == key);
            if !current {
                if method == Method::Invite && response.status.is_success() {
                    self.resend_ack(&entry, response.cseq().seq).await;
                }
                return;
            }
            if response.status.is_provisional() {
                trace!(dialog = %id, status = %response.status, "Provisional response to modification");
                return;
            }
            let Some(pending) = entry.modification.take() else {
                return;
            };

            if response.status.is_success() {
                if let Some(offer) = pending.offer {
                    entry.dialog.session.local = Some(offer);
                }
                if response.has_body() {
                    entry.dialog.session.remote = Some(response.body.clone());
                }
                if let Some(contact) = &response.headers.contact {
                    entry.dialog.remote_target = contact.uri.clone();
                }
                if method == Method::Invite {
                    if let Err(e) = self.send_ack(&mut entry, pending.cseq, None).await {
                        warn!(dialog = %id, error = %e, "Could not ACK re-INVITE");
                    }
                }
                info!(dialog = %id, method = %method, "Session modification completed");
                events.push(DialogEvent::ModificationCompleted {
                    dialog_id: id,
                    method,
                    response,
                });
            } else {
                info!(dialog = %id, method = %method, status = %response.status, "Session modification rejected");
                events.push(DialogEvent::ModificationFailed {
                    dialog_id: id,
                    method,
                    failure: DialogFailure::rejected(&response),
                });
            }
        }
        self.emit(events);
    }

    pub(super) async fn on_bye_response(&self, id: DialogId, key: TransactionKey, response: Response) {
        if response.status.is_provisional() {
            return;
        }
        let Ok(entry) = self.entry(id) else { return };
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            if entry.bye_tx.as_ref() != Some(&key) {
                return;
            }
            debug!(dialog = %id, status = %response.status, "BYE completed");
            events.push(DialogEvent::ByeCompleted {
                dialog_id: id,
                status: Some(response.status),
            });
            entry.terminate("BYE", &mut events);
        }
        self.emit(events);
    }

    pub(super) async fn on_request_response(
        &self,
        id: DialogId,
        key: TransactionKey,
        method: Method,
        response: Response,
    ) {
        if response.status.is_provisional() || !self.is_registered(&key) {
            return;
        }
        self.emit(vec![DialogEvent::ResponseReceived {
            dialog_id: id,
            method,
            response,
        }]);
    }

    /// A request carrying a To tag
    pub(super) async fn handle_in_dialog_request(&self, key: TransactionKey, request: Request) {
        let dialog = DialogKey::for_incoming(&request).and_then(|dialog| self.find_dialog(&dialog));
        let Some(entry) = dialog.and_then(|id| self.entry(id).ok()) else {
            debug!(method = %request.method, call_id = %request.call_id(), "Request matches no dialog");
            self.reply(&key, &request, StatusCode::CallOrTransactionDoesNotExist)
                .await;
            return;
        };

        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            let id = entry.dialog.id;
            if entry.dialog.state.is_terminated() {
                self.reply(&key, &request, StatusCode::CallOrTransactionDoesNotExist)
                    .await;
                return;
            }

            let seq = request.cseq().seq;
            if let Err(e) = entry.dialog.update_remote_cseq(seq) {
                warn!(dialog = %id, method = %request.method, error = %e, "Out-of-order request");
                if self.inner.config.reject_out_of_order {
                    let mut response = self.dialog_response(
                        &request,
                        StatusCode::ServerInternalError,
                        &entry.local_tag(),
                        None,
                    );
                    response.reason = "CSeq Out Of Order".to_string();
                    if let Err(e) = self.inner.transactions.send_response(&key, response).await {
                        warn!(dialog = %id, error = %e, "Could not reject out-of-order request");
                    }
                } else if let Err(e) = self.inner.transactions.abort(&key).await {
                    trace!(dialog = %id, error = %e, "Could not drop out-of-order request");
                }
                return;
            }

            match request.method {
                Method::Bye => self.on_bye_received(&mut entry, &key, &request, &mut events).await,
                Method::Prack => {
                    self.on_prack_received(&mut entry, &key, &request, &mut events)
                        .await
                }
                Method::Invite | Method::Update => {
                    self.on_modification_received(&mut entry, key, request, &mut events)
                        .await
                }
                _ => {
                    self.reply(&key, &request, StatusCode::Ok).await;
                    events.push(DialogEvent::Request {
                        dialog_id: id,
                        method: request.method.clone(),
                        request,
                    });
                }
            }
        }
        self.emit(events);
    }

    async fn on_bye_received(
        &self,
        entry: &mut DialogEntry,
        key: &TransactionKey,
        request: &Request,
        events: &mut Vec<DialogEvent>,
    ) {
        let id = entry.dialog.id;
        self.reply(key, request, StatusCode::Ok).await;
        if !entry.dialog.is_initiator && !entry.answered {
            if let Some(invite_tx) = entry.invite_tx.clone() {
                let response = self.dialog_response(
                    &entry.invite,
                    StatusCode::RequestTerminated,
                    &entry.local_tag(),
                    None,
                );
                if let Err(e) = self.inner.transactions.send_response(&invite_tx, response).await {
                    debug!(dialog = %id, error = %e, "Could not terminate pending INVITE");
                }
            }
            entry.answered = true;
        }
        info!(dialog = %id, "BYE received");
        events.push(DialogEvent::ByeReceived { dialog_id: id });
        entry.terminate("BYE received", events);
    }

    async fn on_modification_received(
        &self,
        entry: &mut DialogEntry,
        key: TransactionKey,
        request: Request,
        events: &mut Vec<DialogEvent>,
    ) {
        let id = entry.dialog.id;
        let state_allows = match request.method {
            Method::Invite => entry.dialog.state == DialogState::Confirmed,
            _ => matches!(entry.dialog.state, DialogState::Early | DialogState::Confirmed),
        };
        let pending = entry.modification.is_some()
            || entry.incoming_modification.is_some()
            || entry.unacked_success.is_some();
        if !state_allows || pending || entry.bye_tx.is_some() {
            debug!(dialog = %id, method = %request.method, "Session modification glare");
            self.reply(&key, &request, StatusCode::RequestPending).await;
            return;
        }

        let method = request.method.clone();
        entry.incoming_modification = Some(IncomingModification {
            method: method.clone(),
            transaction: key,
            request: request.clone(),
        });
        let event = if method == Method::Invite {
            DialogEvent::ReInvite {
                dialog_id: id,
                request,
            }
        } else {
            DialogEvent::Update {
                dialog_id: id,
                request,
            }
        };
        events.push(event);
    }
}
