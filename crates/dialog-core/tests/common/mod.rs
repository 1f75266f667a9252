//! Shared test harness: an in-memory transport and a pair of linked
//! endpoints, each running the full transaction and dialog stack.

#![allow(dead_code)]

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use sipstack_dialog_core::transaction::{TransactionConfig, TransactionEvent, TransactionManager};
use sipstack_dialog_core::{DialogConfig, DialogEvent, DialogId, DialogManager};
use sipstack_sip_core::builder::{generate_branch, generate_call_id, SimpleRequestBuilder};
use sipstack_sip_core::{Message, Method, Request, Response, StatusCode, TransportType, Uri, Via};
use sipstack_sip_transport::{Error as TransportError, Transport, TransportEvent};

pub type DropRule = Box<dyn Fn(&Message) -> bool + Send + Sync>;

/// Records everything sent through it and, when linked, delivers it to the
/// peer's transport event channel.
#[derive(Clone)]
pub struct MockTransport {
    local_addr: SocketAddr,
    transport_type: TransportType,
    sent: Arc<Mutex<Vec<(Message, SocketAddr)>>>,
    peer: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    drop_rule: Arc<Mutex<Option<DropRule>>>,
    closed: Arc<AtomicBool>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("local_addr", &self.local_addr)
            .field("transport_type", &self.transport_type)
            .field("sent", &self.sent.lock().len())
            .finish()
    }
}

impl MockTransport {
    pub fn new(local_addr: SocketAddr, transport_type: TransportType) -> Self {
        Self {
            local_addr,
            transport_type,
            sent: Arc::new(Mutex::new(Vec::new())),
            peer: Arc::new(Mutex::new(None)),
            drop_rule: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Deliver sent messages into `peer`, as if over the network
    pub fn link(&self, peer: mpsc::Sender<TransportEvent>) {
        *self.peer.lock() = Some(peer);
    }

    /// Messages matching `rule` are recorded as sent but never delivered
    pub fn drop_when(&self, rule: impl Fn(&Message) -> bool + Send + Sync + 'static) {
        *self.drop_rule.lock() = Some(Box::new(rule));
    }

    pub fn sent(&self) -> Vec<(Message, SocketAddr)> {
        self.sent.lock().clone()
    }

    pub fn sent_requests(&self, method: Method) -> Vec<Request> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(message, _)| message.as_request())
            .filter(|request| request.method == method)
            .cloned()
            .collect()
    }

    /// Responses with `status` to requests of `method`
    pub fn sent_responses(&self, method: Method, status: StatusCode) -> Vec<Response> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(message, _)| message.as_response())
            .filter(|response| response.status == status && response.cseq().method == method)
            .cloned()
            .collect()
    }

    /// Puts a hand-built message on the wire
    pub async fn send_message_to(&self, message: Message, destination: SocketAddr) {
        Transport::send_message(self, message, destination)
            .await
            .unwrap();
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.local_addr)
    }

    async fn send_message(
        &self,
        message: Message,
        destination: SocketAddr,
    ) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::TransportClosed);
        }
        self.sent.lock().push((message.clone(), destination));

        let dropped = self
            .drop_rule
            .lock()
            .as_ref()
            .map_or(false, |rule| rule(&message));
        if dropped {
            return Ok(());
        }
        let peer = self.peer.lock().clone();
        if let Some(peer) = peer {
            let _ = peer
                .send(TransportEvent::MessageReceived {
                    message,
                    source: self.local_addr,
                    destination,
                    transport: self.transport_type,
                })
                .await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn supports_transport(&self, transport_type: TransportType) -> bool {
        transport_type == self.transport_type
    }
}

pub fn alice_addr() -> SocketAddr {
    "192.0.2.10:5060".parse().unwrap()
}

pub fn bob_addr() -> SocketAddr {
    "192.0.2.20:5060".parse().unwrap()
}

pub fn alice_uri() -> Uri {
    Uri::sip("example.com").with_user("alice")
}

pub fn bob_uri() -> Uri {
    Uri::sip("example.com").with_user("bob")
}

pub fn config(addr: SocketAddr, transport: TransportType) -> DialogConfig {
    DialogConfig::new(addr)
        .with_transport(transport)
        .with_user_agent("sipstack-test")
}

/// One side of a call
pub struct Endpoint {
    pub addr: SocketAddr,
    pub transport: MockTransport,
    pub transactions: TransactionManager,
    pub dialogs: DialogManager,
    pub events: mpsc::UnboundedReceiver<DialogEvent>,
}

impl Endpoint {
    /// Next dialog event; panics when nothing arrives within a minute
    pub async fn next_event(&mut self) -> DialogEvent {
        match tokio::time::timeout(Duration::from_secs(60), self.events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => panic!("{}: event channel closed", self.addr),
            Err(_) => panic!("{}: no dialog event", self.addr),
        }
    }

    /// Skips events until one matches
    pub async fn wait_for(&mut self, matches: impl Fn(&DialogEvent) -> bool) -> DialogEvent {
        self.collect_until(matches).await.pop().unwrap()
    }

    /// All events up to and including the first one that matches
    pub async fn collect_until(&mut self, matches: impl Fn(&DialogEvent) -> bool) -> Vec<DialogEvent> {
        let mut events = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = matches(&event);
            events.push(event);
            if done {
                return events;
            }
        }
    }

    /// Nothing is queued right now
    pub fn assert_no_event(&mut self) {
        if let Ok(event) = self.events.try_recv() {
            panic!("{}: unexpected event {:?}", self.addr, event);
        }
    }
}

/// Builds an endpoint whose transport events come from `rx`
fn endpoint(
    transport: MockTransport,
    rx: mpsc::Receiver<TransportEvent>,
    config: DialogConfig,
) -> Endpoint {
    let addr = config.local_address;
    let shared: Arc<dyn Transport> = Arc::new(transport.clone());
    let (transactions, tx_events) = TransactionManager::new(shared, rx, TransactionConfig::default());
    let (dialogs, events) = DialogManager::new(transactions.clone(), tx_events, config);
    Endpoint {
        addr,
        transport,
        transactions,
        dialogs,
        events,
    }
}

/// Alice and Bob with default configs, linked over `transport`
pub fn pair(transport: TransportType) -> (Endpoint, Endpoint) {
    pair_with(config(alice_addr(), transport), config(bob_addr(), transport))
}

pub fn pair_with(alice: DialogConfig, bob: DialogConfig) -> (Endpoint, Endpoint) {
    sipstack_infra_common::init_test_logging();
    let (alice_tx, alice_rx) = mpsc::channel(1000);
    let (bob_tx, bob_rx) = mpsc::channel(1000);

    let alice_transport = MockTransport::new(alice.local_address, alice.transport);
    alice_transport.link(bob_tx);
    let bob_transport = MockTransport::new(bob.local_address, bob.transport);
    bob_transport.link(alice_tx);

    (
        endpoint(alice_transport, alice_rx, alice),
        endpoint(bob_transport, bob_rx, bob),
    )
}

/// A transaction layer alone, fed by hand through `handle_message`
pub fn transaction_layer(
    transport_type: TransportType,
) -> (
    MockTransport,
    TransactionManager,
    mpsc::UnboundedReceiver<TransactionEvent>,
) {
    sipstack_infra_common::init_test_logging();
    let transport = MockTransport::new(alice_addr(), transport_type);
    let shared: Arc<dyn Transport> = Arc::new(transport.clone());
    let (manager, events) = TransactionManager::with_transport(shared, TransactionConfig::default());
    (transport, manager, events)
}

/// An out-of-dialog request from `from` at `source`
pub fn request_from(method: Method, source: SocketAddr, transport: TransportType) -> Request {
    SimpleRequestBuilder::new(method, Uri::from_socket_addr(alice_addr()))
        .from(bob_uri(), Some("8f3ke2"))
        .to(alice_uri(), None)
        .call_id(generate_call_id("192.0.2.20"))
        .cseq(1)
        .via(Via::new(transport, source, generate_branch()))
        .max_forwards(70)
        .build()
        .unwrap()
}

/// Lets every runnable task finish without moving the clock meaningfully
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub const OFFER: &[u8] = b"v=0\r\no=alice 2890844526 2890844526 IN IP4 192.0.2.10\r\ns=-\r\nm=audio 49170 RTP/AVP 0\r\n";
pub const ANSWER: &[u8] = b"v=0\r\no=bob 2808844564 2808844564 IN IP4 192.0.2.20\r\ns=-\r\nm=audio 3456 RTP/AVP 0\r\n";

/// Alice calls Bob with an offer and Bob answers; returns both dialog ids
/// once Bob has the ACK
pub async fn establish(alice: &mut Endpoint, bob: &mut Endpoint) -> (DialogId, DialogId) {
    let alice_id = alice
        .dialogs
        .invite(alice_uri(), bob_uri(), bob.addr, Some(Bytes::from_static(OFFER)))
        .await
        .unwrap();
    let bob_id = incoming_invite(bob).await;
    bob.dialogs
        .accept(bob_id, Some(Bytes::from_static(ANSWER)))
        .await
        .unwrap();
    alice
        .wait_for(|event| matches!(event, DialogEvent::SuccessResponse { .. }))
        .await;
    bob.wait_for(|event| matches!(event, DialogEvent::AckReceived { .. }))
        .await;
    (alice_id, bob_id)
}

pub async fn incoming_invite(endpoint: &mut Endpoint) -> DialogId {
    match endpoint
        .wait_for(|event| matches!(event, DialogEvent::IncomingInvite { .. }))
        .await
    {
        DialogEvent::IncomingInvite { dialog_id, .. } => dialog_id,
        _ => unreachable!(),
    }
}

pub fn is_terminated(event: &DialogEvent) -> bool {
    matches!(event, DialogEvent::Terminated { .. })
}
