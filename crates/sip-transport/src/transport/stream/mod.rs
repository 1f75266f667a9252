//! Connection-oriented transports.
//!
//! TCP and TLS share one implementation: TLS only adds a handshake when a
//! connection is accepted or opened. Framing uses Content-Length via
//! [`sipstack_sip_core::frame_length`].

pub mod connection;
pub mod tls;

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, trace, warn};

use sipstack_sip_core::{Message, TransportType};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::transport::{Transport, TransportEvent};

pub use connection::StreamConnection;
use connection::BoxedStream;
pub use tls::{PemSource, TlsConfig};

struct TlsContext {
    acceptor: TlsAcceptor,
    connector: TlsConnector,
    config: TlsConfig,
}

/// TCP or TLS transport for SIP messages
#[derive(Clone)]
pub struct StreamTransport {
    inner: Arc<StreamTransportInner>,
}

struct StreamTransportInner {
    kind: TransportType,
    local_addr: SocketAddr,
    closed: AtomicBool,
    pool: Arc<ConnectionPool<StreamConnection>>,
    events_tx: mpsc::Sender<TransportEvent>,
    tls: Option<TlsContext>,
    /// Accept loop and idle sweep
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamTransport {
    /// Binds a TCP transport
    pub async fn bind_tcp(
        addr: SocketAddr,
        config: &TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        Self::bind(addr, TransportType::Tcp, None, config).await
    }

    /// Binds a TLS transport using `config.tls`
    pub async fn bind_tls(
        addr: SocketAddr,
        config: &TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let tls = config
            .tls
            .as_ref()
            .ok_or_else(|| Error::TlsConfig("no TLS configuration supplied".to_string()))?;
        let context = TlsContext {
            acceptor: TlsAcceptor::from(tls.server_config()?),
            connector: TlsConnector::from(tls.client_config()?),
            config: tls.clone(),
        };
        Self::bind(addr, TransportType::Tls, Some(context), config).await
    }

    async fn bind(
        addr: SocketAddr,
        kind: TransportType,
        tls: Option<TlsContext>,
        config: &TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::BindFailed(addr, e))?;
        let local_addr = listener.local_addr()?;
        info!("SIP {} transport bound to {}", kind, local_addr);

        let transport = StreamTransport {
            inner: Arc::new(StreamTransportInner {
                kind,
                local_addr,
                closed: AtomicBool::new(false),
                pool: Arc::new(ConnectionPool::new(config.max_connections, config.idle_timeout)),
                events_tx,
                tls,
                tasks: Mutex::new(Vec::new()),
            }),
        };

        let weak = Arc::downgrade(&transport.inner);
        let sweep_period = (config.idle_timeout / 2).max(Duration::from_secs(1));
        *transport.inner.tasks.lock() = vec![
            tokio::spawn(accept_loop(weak.clone(), listener)),
            tokio::spawn(idle_sweep(weak, sweep_period)),
        ];

        Ok((transport, events_rx))
    }

    /// Pool holding this transport's connections
    pub fn pool(&self) -> &ConnectionPool<StreamConnection> {
        &self.inner.pool
    }

    /// Closes pooled connections idle past the configured timeout
    pub fn evict_idle(&self) -> usize {
        self.inner.pool.evict_idle()
    }

    async fn connect(&self, destination: SocketAddr) -> Result<Arc<StreamConnection>> {
        let inner = &self.inner;
        let tcp = TcpStream::connect(destination)
            .await
            .map_err(|e| Error::ConnectFailed(destination, e))?;
        let local_addr = tcp.local_addr()?;

        let stream: BoxedStream = match &inner.tls {
            Some(tls) => {
                let server_name = tls.config.server_name_for(destination)?;
                let stream = tls
                    .connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| Error::TlsHandshakeFailed(destination, e.to_string()))?;
                Box::new(stream)
            }
            None => Box::new(tcp),
        };
        debug!(peer = %destination, "{} connection established", inner.kind);

        Ok(StreamConnection::start(
            stream,
            inner.kind,
            destination,
            local_addr,
            inner.events_tx.clone(),
            inner.pool.clone(),
        ))
    }
}

/// Closes pooled connections that outlived the idle timeout
async fn idle_sweep(inner: Weak<StreamTransportInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        let evicted = inner.pool.evict_idle();
        if evicted > 0 {
            debug!("{} idle sweep closed {} connection(s)", inner.kind, evicted);
        } else {
            trace!("{} idle sweep found nothing to close", inner.kind);
        }
    }
}

async fn accept_loop(inner: Weak<StreamTransportInner>, listener: TcpListener) {
    loop {
        let accepted = listener.accept().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        let (tcp, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("{} accept failed: {}", inner.kind, e);
                continue;
            }
        };
        // Handshakes run off the accept loop so a slow peer cannot stall it
        tokio::spawn(register_inbound(inner, tcp, peer));
    }
}

async fn register_inbound(inner: Arc<StreamTransportInner>, tcp: TcpStream, peer: SocketAddr) {
    let stream: BoxedStream = match &inner.tls {
        Some(tls) => match tls.acceptor.accept(tcp).await {
            Ok(stream) => Box::new(stream),
            Err(e) => {
                warn!(peer = %peer, "TLS handshake failed: {}", e);
                return;
            }
        },
        None => Box::new(tcp),
    };
    if inner.closed.load(Ordering::SeqCst) {
        return;
    }
    info!(peer = %peer, "accepted {} connection", inner.kind);

    let _ = inner
        .events_tx
        .send(TransportEvent::IncomingConnection {
            transport: inner.kind,
            remote: peer,
            local: inner.local_addr,
        })
        .await;

    StreamConnection::start(
        stream,
        inner.kind,
        peer,
        inner.local_addr,
        inner.events_tx.clone(),
        inner.pool.clone(),
    );
}

#[async_trait::async_trait]
impl Transport for StreamTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let key = (self.inner.kind, destination);
        let connection = self
            .inner
            .pool
            .get_or_connect(key, || self.connect(destination))
            .await?;

        let bytes = message.to_bytes();
        debug!(peer = %destination, "{} sending {} ({} bytes)", self.inner.kind, message.summary(), bytes.len());
        if let Err(e) = connection.send(&bytes).await {
            self.inner.pool.remove_connection(&key, &connection);
            connection.close();
            return Err(e);
        }
        Ok(())
    }

    async fn send_keepalive(&self, destination: SocketAddr) -> Result<()> {
        // Only refresh connections that already exist
        match self.inner.pool.get(&(self.inner.kind, destination)) {
            Some(connection) => connection.send_ping().await,
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for handle in self.inner.tasks.lock().drain(..) {
            handle.abort();
        }
        self.inner.pool.close_all();
        let _ = self.inner.events_tx.send(TransportEvent::Closed).await;
        info!("{} transport {} closed", self.inner.kind, self.inner.local_addr);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn supports_transport(&self, transport_type: TransportType) -> bool {
        transport_type == self.inner.kind
    }
}

impl fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamTransport({}, {})", self.inner.kind, self.inner.local_addr)
    }
}
