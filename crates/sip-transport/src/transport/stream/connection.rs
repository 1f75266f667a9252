use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use sipstack_sip_core::{frame_length, parse_message, TransportType};

use crate::error::{Error, Result};
use crate::pool::{ConnectionPool, PoolKey, PooledConnection};
use crate::transport::{TransportEvent, MAX_MESSAGE_SIZE};

/// Byte stream a connection runs over (plain TCP or TLS)
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub(crate) type BoxedStream = Box<dyn AsyncStream>;

// Double CRLF ping from RFC 5626
const KEEPALIVE_PING: &[u8] = b"\r\n\r\n";

/// One pooled TCP or TLS connection
pub struct StreamConnection {
    key: PoolKey,
    local_addr: SocketAddr,
    writer: Mutex<WriteHalf<BoxedStream>>,
    closed: AtomicBool,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl StreamConnection {
    /// Wraps an established stream, pools it and starts its read loop
    pub(crate) fn start(
        stream: BoxedStream,
        transport: TransportType,
        peer: SocketAddr,
        local_addr: SocketAddr,
        events_tx: mpsc::Sender<TransportEvent>,
        pool: Arc<ConnectionPool<StreamConnection>>,
    ) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        let connection = Arc::new(Self {
            key: (transport, peer),
            local_addr,
            writer: Mutex::new(write_half),
            closed: AtomicBool::new(false),
            reader: parking_lot::Mutex::new(None),
        });
        // Pooled before the first read so replies find this connection
        pool.register(connection.key, connection.clone());
        let handle = tokio::spawn(read_loop(connection.clone(), read_half, events_tx, pool));
        *connection.reader.lock() = Some(handle);
        connection
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.key.1
    }

    pub fn transport(&self) -> TransportType {
        self.key.0
    }

    /// Writes raw bytes to the peer
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let mut writer = self.writer.lock().await;
        let result = match writer.write_all(bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            self.closed.store(true, Ordering::SeqCst);
            Error::SendFailed(self.key.1, e)
        })?;
        trace!(peer = %self.key.1, "sent {} bytes", bytes.len());
        Ok(())
    }

    pub(crate) async fn send_ping(&self) -> Result<()> {
        self.send(KEEPALIVE_PING).await
    }
}

impl PooledConnection for StreamConnection {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn read_loop(
    connection: Arc<StreamConnection>,
    mut reader: ReadHalf<BoxedStream>,
    events_tx: mpsc::Sender<TransportEvent>,
    pool: Arc<ConnectionPool<StreamConnection>>,
) {
    let (transport, peer) = connection.key;
    let mut buffer = BytesMut::with_capacity(8192);

    'read: loop {
        match reader.read_buf(&mut buffer).await {
            Ok(0) => {
                debug!(peer = %peer, "{} connection closed by peer", transport);
                break;
            }
            Ok(n) => trace!(peer = %peer, "read {} bytes", n),
            Err(e) => {
                debug!(peer = %peer, "{} read error: {}", transport, e);
                break;
            }
        }

        loop {
            // CRLF keep-alives between messages
            while matches!(buffer.first(), Some(b'\r' | b'\n')) {
                buffer.advance(1);
            }
            let length = match frame_length(&buffer) {
                Ok(Some(length)) => length,
                Ok(None) => {
                    if buffer.len() > MAX_MESSAGE_SIZE {
                        warn!(peer = %peer, size = buffer.len(), "message exceeds size limit, closing connection");
                        break 'read;
                    }
                    break;
                }
                Err(e) => {
                    warn!(peer = %peer, "unrecoverable framing error: {}", e);
                    break 'read;
                }
            };
            let frame = buffer.split_to(length);
            match parse_message(&frame) {
                Ok(message) => {
                    debug!(peer = %peer, "{} received {}", transport, message.summary());
                    let event = TransportEvent::MessageReceived {
                        message,
                        source: peer,
                        destination: connection.local_addr,
                        transport,
                    };
                    if events_tx.send(event).await.is_err() {
                        break 'read;
                    }
                }
                Err(e) => warn!(peer = %peer, "Failed to parse SIP message: {}", e),
            }
        }
    }

    connection.closed.store(true, Ordering::SeqCst);
    if pool.remove_connection(&connection.key, &connection) {
        let _ = events_tx
            .send(TransportEvent::ConnectionClosed {
                transport,
                remote: peer,
            })
            .await;
    }
}
