use std::fmt;
use std::net::SocketAddr;

use sipstack_sip_core::{Message, TransportType};

use crate::error::Result;

pub mod stream;
pub mod udp;

pub use stream::StreamTransport;
pub use udp::UdpTransport;

/// Largest message accepted from the network
pub const MAX_MESSAGE_SIZE: usize = 65535;

/// Events emitted by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A SIP message was received
    MessageReceived {
        /// The SIP message
        message: Message,
        /// The remote address that sent the message
        source: SocketAddr,
        /// The local address that received the message
        destination: SocketAddr,
        /// Protocol the message arrived over
        transport: TransportType,
    },

    /// A stream transport accepted a connection
    IncomingConnection {
        transport: TransportType,
        remote: SocketAddr,
        local: SocketAddr,
    },

    /// A pooled connection ended (peer close or read error)
    ConnectionClosed {
        transport: TransportType,
        remote: SocketAddr,
    },

    /// A NAT binding was created, changed or removed (`observed: None`)
    BindingChanged {
        advertised: SocketAddr,
        observed: Option<SocketAddr>,
    },

    /// Error occurred in the transport
    Error {
        /// Error description
        error: String,
    },

    /// Transport has been closed
    Closed,
}

/// Represents a transport layer for SIP messages.
///
/// UDP, TCP and TLS share this interface; TLS is the TCP transport with a
/// handshake on connection setup.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Returns the local address this transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Sends a SIP message to the specified destination
    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()>;

    /// Sends a keep-alive towards a peer to hold its NAT mapping open
    async fn send_keepalive(&self, _destination: SocketAddr) -> Result<()> {
        Ok(())
    }

    /// Closes the transport
    async fn close(&self) -> Result<()>;

    /// Checks if the transport is closed
    fn is_closed(&self) -> bool;

    /// Check if a specific transport type is supported
    fn supports_transport(&self, transport_type: TransportType) -> bool {
        transport_type == TransportType::Udp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug)]
    struct MockTransport {
        closed: AtomicBool,
        local_addr: SocketAddr,
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        fn local_addr(&self) -> Result<SocketAddr> {
            Ok(self.local_addr)
        }

        async fn send_message(&self, _message: Message, _destination: SocketAddr) -> Result<()> {
            if self.closed.load(Ordering::Relaxed) {
                return Err(crate::error::Error::TransportClosed);
            }
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::Relaxed)
        }
    }

    #[tokio::test]
    async fn test_trait_defaults() {
        let transport = MockTransport {
            closed: AtomicBool::new(false),
            local_addr: "127.0.0.1:5060".parse().unwrap(),
        };
        assert!(transport.supports_transport(TransportType::Udp));
        assert!(!transport.supports_transport(TransportType::Tls));
        assert!(transport.send_keepalive("127.0.0.1:5070".parse().unwrap()).await.is_ok());

        transport.close().await.unwrap();
        assert!(transport.is_closed());
    }
}
