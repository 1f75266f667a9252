//! Transport protocol tokens shared by Via headers, URIs and the transport layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Wire protocol a SIP message travels over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportType {
    /// Unreliable datagram transport
    Udp,
    /// Reliable stream transport
    Tcp,
    /// TCP with a TLS handshake before first use
    Tls,
}

impl TransportType {
    /// Reliable transports suppress request/response retransmissions
    pub fn is_reliable(&self) -> bool {
        matches!(self, TransportType::Tcp | TransportType::Tls)
    }

    /// Connection-oriented transports share the connection pool
    pub fn is_stream(&self) -> bool {
        self.is_reliable()
    }

    /// Well-known port (RFC 3261 Section 19.1.2)
    pub fn default_port(&self) -> u16 {
        match self {
            TransportType::Udp | TransportType::Tcp => 5060,
            TransportType::Tls => 5061,
        }
    }

    /// Token used in Via headers
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Udp => "UDP",
            TransportType::Tcp => "TCP",
            TransportType::Tls => "TLS",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UDP" => Ok(TransportType::Udp),
            "TCP" => Ok(TransportType::Tcp),
            "TLS" => Ok(TransportType::Tls),
            _ => Err(Error::InvalidTransport(s.to_string())),
        }
    }
}
