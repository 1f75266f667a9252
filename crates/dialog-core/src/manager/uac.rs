//! Caller side of the INVITE dialog

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use sipstack_sip_core::builder::{generate_call_id, generate_tag, SimpleRequestBuilder};
use sipstack_sip_core::{Method, RAck, Response, StatusCode, Uri, EXT_100REL};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use super::entry::{DialogEntry, Purpose};
use super::DialogManager;
use crate::dialog::{Dialog, DialogId, DialogState, SDP_CONTENT_TYPE};
use crate::errors::{DialogError, DialogResult};
use crate::events::{DialogEvent, DialogFailure};
use crate::transaction::{TransactionKey, TransactionState};

impl DialogManager {
    /// Sends an INVITE from `from` to `to` through `destination`.
    ///
    /// The new dialog starts in [`DialogState::Initial`]; its progress is
    /// reported on the event channel.
    pub async fn invite(
        &self,
        from: Uri,
        to: Uri,
        destination: SocketAddr,
        offer: Option<Bytes>,
    ) -> DialogResult<DialogId> {
        self.ensure_open()?;
        let config = &self.inner.config;
        let call_id = generate_call_id(&config.local_address.ip().to_string());
        let local_tag = generate_tag();
        let cseq = 1;

        let mut builder = SimpleRequestBuilder::new(Method::Invite, to.clone())
            .from(from.clone(), Some(local_tag.as_str()))
            .to(to.clone(), None)
            .call_id(call_id.clone())
            .cseq(cseq)
            .via(self.via())
            .max_forwards(config.max_forwards)
            .contact(config.contact_uri())
            .supported(EXT_100REL);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(offer) = &offer {
            builder = builder.body(SDP_CONTENT_TYPE, offer.clone());
        }
        let request = builder.build()?;

        let mut dialog = Dialog::new_outgoing(call_id, from, local_tag, to, cseq, destination);
        dialog.session.local = offer;
        let id = dialog.id;

        let entry = Arc::new(Mutex::new(DialogEntry::new(dialog, request.clone())));
        let mut guard = entry.lock().await;
        self.inner.dialogs.insert(id, entry.clone());

        match self
            .send_dialog_request(id, Purpose::Invite, request, destination)
            .await
        {
            Ok(key) => {
                info!(dialog = %id, dest = %destination, "INVITE sent");
                guard.invite_tx = Some(key);
                Ok(id)
            }
            Err(e) => {
                drop(guard);
                self.remove_dialog(id);
                Err(e)
            }
        }
    }

    /// Cancels our pending INVITE.
    ///
    /// Before any provisional response the CANCEL is held back and sent
    /// once the first one arrives (RFC 3261 Section 9.1). If the 2xx wins
    /// the race the dialog is confirmed, ACKed and, unless disabled in the
    /// config, hung up with a BYE.
    pub async fn cancel(&self, id: DialogId) -> DialogResult<()> {
        self.ensure_open()?;
        let entry = self.entry(id)?;
        let mut entry = entry.lock().await;
        if !entry.dialog.is_initiator || entry.answered || entry.dialog.state.is_terminated() {
            return Err(DialogError::invalid_state(id, entry.dialog.state, "cancel"));
        }
        if entry.cancel_requested {
            return Ok(());
        }
        entry.cancel_requested = true;

        let proceeding = entry
            .invite_tx
            .as_ref()
            .and_then(|key| self.inner.transactions.state(key))
            == Some(TransactionState::Proceeding);
        if proceeding {
            self.send_cancel(&mut entry).await
        } else {
            debug!(dialog = %id, "CANCEL deferred until a provisional response arrives");
            Ok(())
        }
    }

    /// Sends PRACK for the reliable provisional response waiting for one.
    ///
    /// Only needed with `auto_prack` disabled. `body` answers an offer the
    /// provisional response carried.
    pub async fn prack(&self, id: DialogId, body: Option<Bytes>) -> DialogResult<()> {
        self.ensure_open()?;
        let entry = self.entry(id)?;
        let mut entry = entry.lock().await;
        let Some(rseq) = entry.pending_prack.take() else {
            return Err(DialogError::invalid_state(id, entry.dialog.state, "prack"));
        };
        if let Err(e) = self.send_prack(&mut entry, rseq, body).await {
            entry.pending_prack = Some(rseq);
            return Err(e);
        }
        Ok(())
    }

    /// Sends the ACK carrying `answer` for a 2xx that carried an offer
    pub async fn confirm_2xx_with_answer(&self, id: DialogId, answer: Bytes) -> DialogResult<()> {
        self.ensure_open()?;
        let entry = self.entry(id)?;
        let mut entry = entry.lock().await;
        if !entry.awaiting_answer {
            return Err(DialogError::invalid_state(
                id,
                entry.dialog.state,
                "confirm_2xx_with_answer",
            ));
        }
        let cseq = entry.invite.cseq().seq;
        self.send_ack(&mut entry, cseq, Some(answer.clone())).await?;
        entry.dialog.session.local = Some(answer);
        entry.awaiting_answer = false;
        Ok(())
    }

    async fn send_cancel(&self, entry: &mut DialogEntry) -> DialogResult<()> {
        let id = entry.dialog.id;
        let invite_tx = entry
            .invite_tx
            .clone()
            .ok_or_else(|| DialogError::invalid_state(id, entry.dialog.state, "cancel"))?;
        let key = self.inner.transactions.cancel(&invite_tx).await?;
        self.inner.by_transaction.insert(key, (id, Purpose::Cancel));
        entry.cancel_sent = true;
        info!(dialog = %id, "CANCEL sent");
        Ok(())
    }

    async fn send_prack(
        &self,
        entry: &mut DialogEntry,
        rseq: u32,
        body: Option<Bytes>,
    ) -> DialogResult<()> {
        let id = entry.dialog.id;
        let cseq = entry.dialog.next_local_cseq();
        let mut request = self.in_dialog_request(&entry.dialog, Method::Prack, cseq, body.clone());
        request.headers.rack = Some(RAck {
            rseq,
            cseq: entry.invite.cseq().seq,
            method: Method::Invite,
        });
        let destination = entry.dialog.next_hop();
        self.send_dialog_request(id, Purpose::Prack, request, destination)
            .await?;
        if let Some(body) = body {
            entry.dialog.session.local = Some(body);
        }
        debug!(dialog = %id, rseq, "PRACK sent");
        Ok(())
    }

    /// ACK for a 2xx to the INVITE or re-INVITE with CSeq `cseq`
    pub(super) async fn send_ack(
        &self,
        entry: &mut DialogEntry,
        cseq: u32,
        body: Option<Bytes>,
    ) -> DialogResult<()> {
        let ack = self.in_dialog_request(&entry.dialog, Method::Ack, cseq, body);
        let destination = entry.dialog.next_hop();
        self.inner
            .transactions
            .send_ack(ack.clone(), destination)
            .await?;
        entry.last_ack = Some(ack);
        Ok(())
    }

    /// Re-sends our ACK when the 2xx it answered shows up again
    pub(super) async fn resend_ack(&self, entry: &DialogEntry, cseq: u32) {
        let Some(ack) = entry.last_ack.clone() else {
            return;
        };
        if ack.cseq().seq != cseq {
            return;
        }
        trace!(dialog = %entry.dialog.id, "2xx retransmitted, re-sending ACK");
        if let Err(e) = self
            .inner
            .transactions
            .send_ack(ack, entry.dialog.next_hop())
            .await
        {
            warn!(dialog = %entry.dialog.id, error = %e, "Could not re-send ACK");
        }
    }

    pub(super) async fn on_invite_response(
        &self,
        id: DialogId,
        key: TransactionKey,
        response: Response,
    ) {
        let Ok(entry) = self.entry(id) else { return };
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            if !self.is_registered(&key) || entry.dialog.state.is_terminated() {
                return;
            }
            let status = response.status;
            if status.is_provisional() {
                self.on_invite_provisional(&mut entry, &response, &mut events)
                    .await;
            } else if status.is_success() {
                self.on_invite_success(&mut entry, &response, &mut events)
                    .await;
            } else {
                on_invite_failure(&mut entry, &response, &mut events);
            }
        }
        self.emit(events);
    }

    async fn on_invite_provisional(
        &self,
        entry: &mut DialogEntry,
        response: &Response,
        events: &mut Vec<DialogEvent>,
    ) {
        let id = entry.dialog.id;
        if entry.answered {
            return;
        }
        if entry.cancel_requested && !entry.cancel_sent {
            if let Err(e) = self.send_cancel(entry).await {
                warn!(dialog = %id, error = %e, "Could not send deferred CANCEL");
            }
        }

        if let Some(tag) = response.to_tag() {
            match entry.dialog.remote_tag.as_deref() {
                Some(known) if known != tag => {
                    debug!(dialog = %id, tag, "Provisional response from another fork ignored");
                    return;
                }
                _ => {
                    entry.dialog.update_from_response(response);
                    self.register_key(&entry.dialog);
                    entry.transition(DialogState::Early, events);
                }
            }
        }

        if response.is_reliable_provisional() {
            let Some(rseq) = response.headers.rseq else {
                return;
            };
            if entry.last_rseq.map_or(false, |last| rseq <= last) {
                trace!(dialog = %id, rseq, "Reliable provisional retransmission");
                return;
            }
            entry.last_rseq = Some(rseq);
            if response.has_body() {
                entry.dialog.session.remote = Some(response.body.clone());
            }
            events.push(DialogEvent::ReliableProvisionalResponse {
                dialog_id: id,
                response: response.clone(),
            });
            if self.inner.config.auto_prack {
                if let Err(e) = self.send_prack(entry, rseq, None).await {
                    warn!(dialog = %id, rseq, error = %e, "Could not send PRACK");
                }
            } else {
                entry.pending_prack = Some(rseq);
            }
        } else if response.status != StatusCode::Trying {
            events.push(DialogEvent::ProvisionalResponse {
                dialog_id: id,
                response: response.clone(),
            });
        }
    }

    async fn on_invite_success(
        &self,
        entry: &mut DialogEntry,
        response: &Response,
        events: &mut Vec<DialogEvent>,
    ) {
        let id = entry.dialog.id;
        if entry.answered {
            self.resend_ack(entry, response.cseq().seq).await;
            return;
        }
        entry.answered = true;
        entry.pending_prack = None;
        entry.dialog.update_from_response(response);
        self.register_key(&entry.dialog);

        let needs_answer = entry.dialog.session.local.is_none() && response.has_body();
        if response.has_body() {
            entry.dialog.session.remote = Some(response.body.clone());
        }
        entry.transition(DialogState::Confirmed, events);
        info!(dialog = %id, status = %response.status, "Call answered");
        events.push(DialogEvent::SuccessResponse {
            dialog_id: id,
            response: response.clone(),
            needs_answer,
        });

        let cancelled = entry.cancel_requested;
        if needs_answer && !cancelled {
            entry.awaiting_answer = true;
        } else {
            let cseq = entry.invite.cseq().seq;
            if let Err(e) = self.send_ack(entry, cseq, None).await {
                warn!(dialog = %id, error = %e, "Could not send ACK");
            }
        }

        if cancelled {
            info!(dialog = %id, "2xx won the race against CANCEL");
            if self.inner.config.bye_after_cancel_race {
                if let Err(e) = self.send_bye(entry, events).await {
                    warn!(dialog = %id, error = %e, "Could not hang up after CANCEL race");
                }
            }
        }
    }
}

fn on_invite_failure(entry: &mut DialogEntry, response: &Response, events: &mut Vec<DialogEvent>) {
    if entry.answered {
        return;
    }
    entry.answered = true;
    entry.pending_prack = None;
    let id = entry.dialog.id;
    info!(dialog = %id, status = %response.status, "INVITE rejected");
    events.push(DialogEvent::Failure {
        dialog_id: id,
        failure: DialogFailure::rejected(response),
    });
    let reason = if response.status == StatusCode::RequestTerminated && entry.cancel_sent {
        "cancelled".to_string()
    } else {
        format!("rejected with {} {}", response.status.as_u16(), response.reason)
    };
    entry.terminate(reason, events);
}
