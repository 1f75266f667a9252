use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use sipstack_sip_core::{Message, TransportType};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, MAX_MESSAGE_SIZE};

// Default channel capacity
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// UDP transport for SIP messages
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Creates a new UDP transport bound to the specified address
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::BindFailed(addr, e))?;
        let local_addr = socket.local_addr()?;
        info!("SIP UDP transport bound to {}", local_addr);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket: Arc::new(socket),
                local_addr,
                closed: AtomicBool::new(false),
                events_tx,
                receive_task: Mutex::new(None),
            }),
        };

        let handle = transport.spawn_receive_loop();
        *transport.inner.receive_task.lock() = Some(handle);

        Ok((transport, events_rx))
    }

    // Spawns a task to receive packets from the UDP socket
    fn spawn_receive_loop(&self) -> JoinHandle<()> {
        let socket = self.inner.socket.clone();
        let events_tx = self.inner.events_tx.clone();
        let local_addr = self.inner.local_addr;

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_MESSAGE_SIZE];
            loop {
                let (len, src) = match socket.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!("Error receiving UDP packet: {}", e);
                        let event = TransportEvent::Error {
                            error: format!("Error receiving packet: {}", e),
                        };
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                let packet = &buffer[..len];
                // Empty or CRLF-only datagrams are NAT keep-alives
                if packet.iter().all(|b| matches!(b, b'\r' | b'\n' | b' ')) {
                    trace!(peer = %src, "keep-alive datagram");
                    continue;
                }

                match sipstack_sip_core::parse_message(packet) {
                    Ok(message) => {
                        debug!(peer = %src, "UDP received {}", message.summary());
                        let event = TransportEvent::MessageReceived {
                            message,
                            source: src,
                            destination: local_addr,
                            transport: TransportType::Udp,
                        };
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(peer = %src, "Error parsing SIP message: {}", e);
                        let event = TransportEvent::Error {
                            error: format!("Error parsing SIP message from {}: {}", src, e),
                        };
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("UDP receive loop terminated");
        })
    }

    async fn send_bytes(&self, bytes: &[u8], destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        self.inner
            .socket
            .send_to(bytes, destination)
            .await
            .map_err(|e| Error::SendFailed(destination, e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        let bytes = message.to_bytes();
        debug!(peer = %destination, "UDP sending {} ({} bytes)", message.summary(), bytes.len());
        self.send_bytes(&bytes, destination).await
    }

    async fn send_keepalive(&self, destination: SocketAddr) -> Result<()> {
        trace!(peer = %destination, "UDP keep-alive");
        self.send_bytes(&[], destination).await
    }

    async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(handle) = self.inner.receive_task.lock().take() {
            handle.abort();
        }
        let _ = self.inner.events_tx.send(TransportEvent::Closed).await;
        info!("UDP transport {} closed", self.inner.local_addr);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UdpTransport({})", self.inner.local_addr)
    }
}
