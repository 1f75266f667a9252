//! SIP transport layer for the sipstack stack
//!
//! This crate provides the UDP, TCP and TLS transports, the connection pool
//! shared by the stream transports, and the NAT address resolver that maps
//! a peer's advertised Via address to the address its packets come from.

pub mod config;
pub mod error;
pub mod manager;
pub mod pool;
pub mod resolver;
pub mod transport;

// Re-export commonly used types and functions
pub use config::TransportConfig;
pub use error::{Error, Result};
pub use manager::TransportManager;
pub use pool::{ConnectionPool, PoolKey, PooledConnection};
pub use resolver::{AddressBinding, AddressResolver, BindingChange};
pub use transport::stream::{PemSource, StreamConnection, TlsConfig};
pub use transport::{StreamTransport, Transport, TransportEvent, UdpTransport};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}

/// Bind a TCP transport to the specified address
pub async fn bind_tcp(
    addr: std::net::SocketAddr,
) -> Result<(StreamTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    StreamTransport::bind_tcp(addr, &TransportConfig::default()).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        bind_tcp, bind_udp, AddressResolver, Error, Result, StreamTransport, TlsConfig, Transport,
        TransportConfig, TransportEvent, TransportManager, UdpTransport,
    };
}
