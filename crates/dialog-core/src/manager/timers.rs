//! Dialog-level retransmission timers.
//!
//! Two responses are retransmitted above the transaction layer:
//!
//! - a reliable provisional response until its PRACK arrives (RFC 3262
//!   Section 3: T1, doubling without cap)
//! - a 2xx to INVITE until its ACK arrives (RFC 3261 Section 13.3.1.4: T1,
//!   doubling up to T2)
//!
//! Both give up after 64·T1. Over reliable transports nothing is
//! retransmitted but the give-up timer still runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sipstack_sip_core::Response;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::DialogManager;
use crate::dialog::DialogId;
use crate::events::{DialogEvent, DialogFailure};
use crate::transaction::TransactionKey;

impl DialogManager {
    pub(super) fn spawn_provisional_retransmit(
        &self,
        id: DialogId,
        transaction: TransactionKey,
        response: Response,
        rseq: u32,
        reliable: bool,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let timers = self.inner.transactions.config().timers.clone();
        tokio::spawn(async move {
            let deadline = timers.transaction_timeout();
            let mut elapsed = Duration::ZERO;
            let mut interval = timers.t1;
            loop {
                let wait = interval.min(deadline - elapsed);
                tokio::time::sleep(wait).await;
                elapsed += wait;

                let Some(inner) = weak.upgrade() else { return };
                let manager = DialogManager { inner };
                if elapsed >= deadline {
                    manager.on_provisional_timeout(id, rseq).await;
                    return;
                }
                if !reliable {
                    trace!(dialog = %id, rseq, "Retransmitting reliable provisional response");
                    if let Err(e) = manager
                        .inner
                        .transactions
                        .send_response(&transaction, response.clone())
                        .await
                    {
                        debug!(dialog = %id, error = %e, "Stopped provisional retransmission");
                        return;
                    }
                }
                interval *= 2;
            }
        })
    }

    pub(super) fn spawn_success_retransmit(
        &self,
        id: DialogId,
        cseq: u32,
        response: Response,
        destination: SocketAddr,
        reliable: bool,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let timers = self.inner.transactions.config().timers.clone();
        tokio::spawn(async move {
            let deadline = timers.transaction_timeout();
            let mut elapsed = Duration::ZERO;
            let mut interval = timers.t1;
            loop {
                let wait = interval.min(deadline - elapsed);
                tokio::time::sleep(wait).await;
                elapsed += wait;

                let Some(inner) = weak.upgrade() else { return };
                let manager = DialogManager { inner };
                if elapsed >= deadline {
                    manager.on_ack_timeout(id, cseq).await;
                    return;
                }
                if !reliable {
                    trace!(dialog = %id, dest = %destination, "Retransmitting 2xx");
                    let transport = manager.inner.transactions.transport();
                    if let Err(e) = transport
                        .send_message(response.clone().into(), destination)
                        .await
                    {
                        debug!(dialog = %id, error = %e, "2xx retransmission failed");
                    }
                }
                interval = (interval * 2).min(timers.t2);
            }
        })
    }

    async fn on_provisional_timeout(&self, id: DialogId, rseq: u32) {
        let Ok(entry) = self.entry(id) else { return };
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            match entry.outstanding_provisional.take() {
                // Dropping our own handle detaches it; this task ends right after
                Some(pending) if pending.rseq == rseq => {
                    warn!(dialog = %id, rseq, "No PRACK for reliable provisional response");
                    events.push(DialogEvent::ReliableProvisionalTimeout { dialog_id: id, rseq });
                }
                other => entry.outstanding_provisional = other,
            }
        }
        self.emit(events);
    }

    async fn on_ack_timeout(&self, id: DialogId, cseq: u32) {
        let Ok(entry) = self.entry(id) else { return };
        let mut events = Vec::new();
        {
            let mut entry = entry.lock().await;
            match entry.unacked_success.take() {
                Some(pending) if pending.cseq == cseq => {
                    warn!(dialog = %id, cseq, "No ACK for 2xx, hanging up");
                    events.push(DialogEvent::Failure {
                        dialog_id: id,
                        failure: DialogFailure::AckTimeout,
                    });
                    if entry.bye_tx.is_none() && !entry.dialog.state.is_terminated() {
                        // send_bye reports its own failure
                        let _ = self.send_bye(&mut entry, &mut events).await;
                    }
                }
                other => entry.unacked_success = other,
            }
        }
        self.emit(events);
    }
}
