//! Per-dialog bookkeeping held behind the dialog's lock

use bytes::Bytes;
use sipstack_sip_core::{Method, Request};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::dialog::{Dialog, DialogState};
use crate::events::DialogEvent;
use crate::transaction::TransactionKey;

/// Role of a transaction within its dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Purpose {
    /// The INVITE that created the dialog, sent by us
    Invite,
    /// The INVITE that created the dialog, received from the peer
    InviteServer,
    Prack,
    Cancel,
    /// re-INVITE or UPDATE sent by us
    Modification(Method),
    Bye,
    /// Any other in-dialog request sent by us
    Request(Method),
}

/// A reliable 1xx we sent that has not been PRACKed yet
pub(crate) struct ReliableProvisional {
    pub rseq: u32,
    pub timer: JoinHandle<()>,
}

/// A 2xx to INVITE we sent that has not been ACKed yet
pub(crate) struct UnackedSuccess {
    pub cseq: u32,
    pub timer: JoinHandle<()>,
}

/// re-INVITE or UPDATE we sent, waiting for its final response
pub(crate) struct PendingModification {
    pub transaction: TransactionKey,
    pub offer: Option<Bytes>,
    pub cseq: u32,
}

/// re-INVITE or UPDATE received, waiting for the application to answer
pub(crate) struct IncomingModification {
    pub method: Method,
    pub transaction: TransactionKey,
    pub request: Request,
}

pub(crate) struct DialogEntry {
    pub dialog: Dialog,
    /// The INVITE that created the dialog
    pub invite: Request,
    pub invite_tx: Option<TransactionKey>,
    /// A final response to the initial INVITE was sent or received
    pub answered: bool,
    pub peer_supports_100rel: bool,
    pub peer_requires_100rel: bool,

    pub cancel_requested: bool,
    pub cancel_sent: bool,

    /// UAS: RSeq for the next reliable 1xx
    pub next_rseq: u32,
    /// UAC: highest RSeq seen
    pub last_rseq: Option<u32>,
    /// UAC: reliable 1xx waiting for an explicit `prack`
    pub pending_prack: Option<u32>,
    pub outstanding_provisional: Option<ReliableProvisional>,

    pub unacked_success: Option<UnackedSuccess>,
    /// UAC: last ACK sent for a 2xx, re-sent when the 2xx is retransmitted
    pub last_ack: Option<Request>,
    /// UAC: the 2xx carried an offer and the ACK waits for the answer
    pub awaiting_answer: bool,

    pub modification: Option<PendingModification>,
    pub incoming_modification: Option<IncomingModification>,
    pub bye_tx: Option<TransactionKey>,
}

impl DialogEntry {
    pub fn new(dialog: Dialog, invite: Request) -> Self {
        let peer_supports_100rel = invite.headers.supports(sipstack_sip_core::EXT_100REL);
        let peer_requires_100rel = invite.headers.requires(sipstack_sip_core::EXT_100REL);
        Self {
            dialog,
            invite,
            invite_tx: None,
            answered: false,
            peer_supports_100rel,
            peer_requires_100rel,
            cancel_requested: false,
            cancel_sent: false,
            next_rseq: rand::random::<u32>() % 0x7fff_ffff + 1,
            last_rseq: None,
            pending_prack: None,
            outstanding_provisional: None,
            unacked_success: None,
            last_ack: None,
            awaiting_answer: false,
            modification: None,
            incoming_modification: None,
            bye_tx: None,
        }
    }

    pub fn local_tag(&self) -> String {
        self.dialog.local_tag.clone().unwrap_or_default()
    }

    /// Moves the dialog forward; earlier or equal states are ignored
    pub fn transition(&mut self, new_state: DialogState, events: &mut Vec<DialogEvent>) {
        let old_state = self.dialog.state;
        if new_state <= old_state {
            return;
        }
        debug!(dialog = %self.dialog.id, from = %old_state, to = %new_state, "Dialog state changed");
        self.dialog.state = new_state;
        events.push(DialogEvent::StateChanged {
            dialog_id: self.dialog.id,
            old_state,
            new_state,
        });
    }

    pub fn terminate(&mut self, reason: impl Into<String>, events: &mut Vec<DialogEvent>) {
        if self.dialog.state.is_terminated() {
            return;
        }
        self.stop_timers();
        self.transition(DialogState::Terminated, events);
        events.push(DialogEvent::Terminated {
            dialog_id: self.dialog.id,
            reason: reason.into(),
        });
    }

    pub fn stop_timers(&mut self) {
        if let Some(pending) = self.outstanding_provisional.take() {
            pending.timer.abort();
        }
        if let Some(pending) = self.unacked_success.take() {
            pending.timer.abort();
        }
    }
}
