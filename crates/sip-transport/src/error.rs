use std::io;
use std::net::SocketAddr;

use sipstack_sip_core::TransportType;
use thiserror::Error;

/// Result type for SIP transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for SIP transport operations
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to bind to the specified address
    #[error("Failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, io::Error),

    /// Failed to connect to the specified address
    #[error("Failed to connect to {0}: {1}")]
    ConnectFailed(SocketAddr, io::Error),

    /// TCP connected but the TLS handshake did not complete
    #[error("TLS handshake with {0} failed: {1}")]
    TlsHandshakeFailed(SocketAddr, String),

    /// Failed to send message to the specified address
    #[error("Failed to send message to {0}: {1}")]
    SendFailed(SocketAddr, io::Error),

    /// Transport is closed
    #[error("Transport closed")]
    TransportClosed,

    /// No transport registered for the protocol
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(TransportType),

    /// Certificates, keys or trust roots could not be loaded
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Errors raised while establishing a connection, before any byte was sent
    pub fn is_connect_error(&self) -> bool {
        matches!(self, Error::ConnectFailed(..) | Error::TlsHandshakeFailed(..))
    }

    /// Returns true if the error is related to TLS
    pub fn is_tls_error(&self) -> bool {
        matches!(self, Error::TlsHandshakeFailed(..) | Error::TlsConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categorization() {
        let addr: SocketAddr = "127.0.0.1:5061".parse().unwrap();

        let handshake = Error::TlsHandshakeFailed(addr, "bad certificate".to_string());
        assert!(handshake.is_connect_error());
        assert!(handshake.is_tls_error());

        let send = Error::SendFailed(addr, io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(!send.is_connect_error());
        assert!(!send.is_tls_error());

        assert!(!Error::TransportClosed.is_connect_error());
    }
}
