//! Multiplexes the UDP, TCP and TLS transports of one stack instance.
//!
//! The manager picks the transport named by a message's top Via, applies
//! symmetric response routing (`received`/`rport`) and NAT bindings to the
//! destination, and merges all transport events into one channel. Inbound
//! requests update the [`AddressResolver`] before they are forwarded.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use sipstack_sip_core::{Message, Response, TransportType};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::resolver::{AddressResolver, BindingChange};
use crate::transport::{StreamTransport, Transport, TransportEvent, UdpTransport};

/// Manages multiple SIP transports and routes messages
#[derive(Clone)]
pub struct TransportManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: TransportConfig,
    transports: RwLock<HashMap<TransportType, Arc<dyn Transport>>>,
    resolver: Arc<AddressResolver>,
    events_tx: mpsc::Sender<TransportEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TransportManager {
    /// Creates an empty manager and the merged event channel
    pub fn new(config: TransportConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);
        let resolver = Arc::new(AddressResolver::new(config.binding_refresh));
        let manager = Self {
            inner: Arc::new(ManagerInner {
                config,
                transports: RwLock::new(HashMap::new()),
                resolver,
                events_tx,
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        };
        (manager, events_rx)
    }

    /// Registers a transport and starts forwarding its events
    pub fn add_transport(
        &self,
        transport_type: TransportType,
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        info!("Registered {} transport {:?}", transport_type, transport);
        self.inner
            .transports
            .write()
            .insert(transport_type, transport.clone());

        let mut tasks = self.inner.tasks.lock();
        tasks.push(self.spawn_event_forwarder(events));
        if transport_type == TransportType::Udp {
            if let Some(interval) = self.inner.config.keepalive_interval {
                tasks.push(self.inner.resolver.spawn_keepalive(interval, transport));
            }
        }
        Ok(())
    }

    /// Binds a UDP transport and registers it
    pub async fn bind_udp(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let (transport, events) =
            UdpTransport::bind(addr, Some(self.inner.config.channel_capacity)).await?;
        let local_addr = transport.local_addr()?;
        self.add_transport(TransportType::Udp, Arc::new(transport), events)?;
        Ok(local_addr)
    }

    /// Binds a TCP transport and registers it
    pub async fn bind_tcp(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let (transport, events) = StreamTransport::bind_tcp(addr, &self.inner.config).await?;
        let local_addr = transport.local_addr()?;
        self.add_transport(TransportType::Tcp, Arc::new(transport), events)?;
        Ok(local_addr)
    }

    /// Binds a TLS transport from `config.tls` and registers it
    pub async fn bind_tls(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let (transport, events) = StreamTransport::bind_tls(addr, &self.inner.config).await?;
        let local_addr = transport.local_addr()?;
        self.add_transport(TransportType::Tls, Arc::new(transport), events)?;
        Ok(local_addr)
    }

    /// NAT binding table shared by all transports
    pub fn resolver(&self) -> Arc<AddressResolver> {
        self.inner.resolver.clone()
    }

    /// Transport registered for the protocol
    pub fn transport(&self, transport_type: TransportType) -> Result<Arc<dyn Transport>> {
        self.inner
            .transports
            .read()
            .get(&transport_type)
            .cloned()
            .ok_or(Error::UnsupportedTransport(transport_type))
    }

    fn spawn_event_forwarder(&self, mut rx: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        let events_tx = self.inner.events_tx.clone();
        let resolver = self.inner.resolver.clone();

        tokio::spawn(async move {
            while let Some(mut event) = rx.recv().await {
                match &mut event {
                    // Transport-level Closed is replaced by the manager's own
                    TransportEvent::Closed => continue,
                    TransportEvent::MessageReceived {
                        message: Message::Request(request),
                        source,
                        ..
                    } => {
                        if let Some(via) = request.headers.top_via_mut() {
                            if let Some(advertised) = via.sent_by_addr() {
                                if let Some(change) = resolver.on_inbound_request(advertised, *source) {
                                    let notice = match change {
                                        BindingChange::Updated { advertised, observed } => {
                                            TransportEvent::BindingChanged {
                                                advertised,
                                                observed: Some(observed),
                                            }
                                        }
                                        BindingChange::Removed { advertised } => {
                                            TransportEvent::BindingChanged {
                                                advertised,
                                                observed: None,
                                            }
                                        }
                                    };
                                    if events_tx.send(notice).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            via.mark_received(*source);
                        }
                    }
                    _ => {}
                }
                if let Err(e) = events_tx.send(event).await {
                    error!("Failed to forward transport event: {}", e);
                    break;
                }
            }
            debug!("Transport event forwarder terminated");
        })
    }

    /// Where a response goes: a NAT binding for the Via sent-by wins, then
    /// the Via `received`/`rport` address, then the caller's destination
    fn response_destination(&self, response: &Response, fallback: SocketAddr) -> SocketAddr {
        let resolver = &self.inner.resolver;
        let Some(via) = response.headers.top_via() else {
            return resolver.resolve(fallback);
        };
        if let Some(advertised) = via.sent_by_addr() {
            if resolver.contains(advertised) {
                return resolver.resolve(advertised);
            }
        }
        resolver.resolve(via.response_addr().unwrap_or(fallback))
    }
}

#[async_trait::async_trait]
impl Transport for TransportManager {
    fn local_addr(&self) -> Result<SocketAddr> {
        let transports = self.inner.transports.read();
        transports
            .get(&TransportType::Udp)
            .or_else(|| transports.values().next())
            .ok_or(Error::UnsupportedTransport(TransportType::Udp))?
            .local_addr()
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let transport_type = message.transport().unwrap_or(TransportType::Udp);
        let transport = self.transport(transport_type)?;

        let target = match &message {
            Message::Response(response) => self.response_destination(response, destination),
            Message::Request(_) => self.inner.resolver.resolve(destination),
        };
        if target != destination {
            info!(from = %destination, to = %target, "destination rewritten");
        }
        transport.send_message(message, target).await
    }

    async fn send_keepalive(&self, destination: SocketAddr) -> Result<()> {
        self.transport(TransportType::Udp)?
            .send_keepalive(destination)
            .await
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        let transports: Vec<_> = self.inner.transports.write().drain().collect();
        for (transport_type, transport) in transports {
            if let Err(e) = transport.close().await {
                error!("Error closing {} transport: {}", transport_type, e);
            }
        }
        let _ = self.inner.events_tx.send(TransportEvent::Closed).await;
        info!("Transport manager closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn supports_transport(&self, transport_type: TransportType) -> bool {
        self.inner.transports.read().contains_key(&transport_type)
    }
}

impl fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<TransportType> = self.inner.transports.read().keys().copied().collect();
        write!(f, "TransportManager({:?})", kinds)
    }
}
