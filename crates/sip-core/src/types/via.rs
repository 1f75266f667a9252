//! # Via header
//!
//! The Via header records the path a request took and carries the branch
//! parameter used for transaction matching. The `received` and `rport`
//! parameters (RFC 3261 Section 18.2.1, RFC 3581) tell a responder where a
//! request really came from when the sender sits behind a NAT.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::uri::{parse_host_port, parse_params};
use crate::types::TransportType;

/// Magic cookie that prefixes every RFC 3261 branch
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// A single Via header value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    pub transport: TransportType,
    pub host: String,
    pub port: Option<u16>,
    pub branch: Option<String>,
    /// `received=` parameter added by the receiver of a request
    pub received: Option<String>,
    /// `rport` parameter: `Some(None)` when requested, `Some(Some(p))` once filled in
    pub rport: Option<Option<u16>>,
    /// Any other parameters
    pub params: Vec<(String, Option<String>)>,
}

impl Via {
    /// Via for a locally originated request, asking for symmetric response routing
    pub fn new(transport: TransportType, sent_by: SocketAddr, branch: impl Into<String>) -> Self {
        let host = match sent_by.ip() {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{}]", ip),
        };
        Self {
            transport,
            host,
            port: Some(sent_by.port()),
            branch: Some(branch.into()),
            received: None,
            rport: Some(None),
            params: Vec::new(),
        }
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// `host[:port]` exactly as advertised
    pub fn sent_by(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Advertised address, if the sent-by host is an IP literal
    pub fn sent_by_addr(&self) -> Option<SocketAddr> {
        let ip = parse_ip(&self.host)?;
        Some(SocketAddr::new(
            ip,
            self.port.unwrap_or_else(|| self.transport.default_port()),
        ))
    }

    /// Where responses to this hop should be sent.
    ///
    /// Prefers `received` over the sent-by host and a filled-in `rport`
    /// over the sent-by port.
    pub fn response_addr(&self) -> Option<SocketAddr> {
        let host = self.received.as_deref().unwrap_or(&self.host);
        let ip = parse_ip(host)?;
        let port = match self.rport {
            Some(Some(port)) => port,
            _ => self.port.unwrap_or_else(|| self.transport.default_port()),
        };
        Some(SocketAddr::new(ip, port))
    }

    /// Records the observed source of the request this Via arrived in
    pub fn mark_received(&mut self, source: SocketAddr) {
        let advertised_ip = parse_ip(&self.host);
        if advertised_ip != Some(source.ip()) {
            self.received = Some(source.ip().to_string());
        }
        if self.rport.is_some() {
            self.rport = Some(Some(source.port()));
        }
    }
}

fn parse_ip(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[').trim_end_matches(']').parse().ok()
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by())?;
        if let Some(branch) = &self.branch {
            write!(f, ";branch={}", branch)?;
        }
        if let Some(received) = &self.received {
            write!(f, ";received={}", received)?;
        }
        match self.rport {
            Some(Some(port)) => write!(f, ";rport={}", port)?,
            Some(None) => f.write_str(";rport")?,
            None => {}
        }
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{}={}", name, value)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::invalid_header("Via", s);

        let (protocol, rest) = s.split_once(char::is_whitespace).ok_or_else(invalid)?;
        let mut parts = protocol.split('/').map(str::trim);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some("2.0"), Some(_)) if name.eq_ignore_ascii_case("SIP") => {}
            _ => return Err(invalid()),
        }
        let transport: TransportType = protocol
            .rsplit('/')
            .next()
            .ok_or_else(invalid)?
            .trim()
            .parse()?;

        let (sent_by, params) = match rest.split_once(';') {
            Some((sent_by, params)) => (sent_by, parse_params(params)),
            None => (rest, Vec::new()),
        };
        let (host, port) = parse_host_port(sent_by).map_err(|_| invalid())?;

        let mut via = Via {
            transport,
            host,
            port,
            branch: None,
            received: None,
            rport: None,
            params: Vec::new(),
        };
        for (name, value) in params {
            match name.to_ascii_lowercase().as_str() {
                "branch" => via.branch = value,
                "received" => via.received = value,
                "rport" => {
                    let port = match value {
                        Some(v) => Some(v.parse::<u16>().map_err(|_| invalid())?),
                        None => None,
                    };
                    via.rport = Some(port);
                }
                _ => via.params.push((name, value)),
            }
        }
        Ok(via)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_via() {
        let via: Via = "SIP/2.0/UDP 10.0.0.5:5062;branch=z9hG4bK776asdhds;rport"
            .parse()
            .unwrap();
        assert_eq!(via.transport, TransportType::Udp);
        assert_eq!(via.branch(), Some("z9hG4bK776asdhds"));
        assert_eq!(via.rport, Some(None));
        assert_eq!(via.sent_by_addr(), Some("10.0.0.5:5062".parse().unwrap()));
    }

    #[test]
    fn test_response_addr_uses_received_and_rport() {
        let mut via: Via = "SIP/2.0/UDP 10.0.0.5:5062;branch=z9hG4bK1;rport"
            .parse()
            .unwrap();
        via.mark_received("203.0.113.7:40000".parse().unwrap());
        assert_eq!(via.received.as_deref(), Some("203.0.113.7"));
        assert_eq!(via.response_addr(), Some("203.0.113.7:40000".parse().unwrap()));
        assert_eq!(
            via.to_string(),
            "SIP/2.0/UDP 10.0.0.5:5062;branch=z9hG4bK1;received=203.0.113.7;rport=40000"
        );
    }

    #[test]
    fn test_response_addr_without_rport() {
        let via: Via = "SIP/2.0/TCP 192.0.2.1;branch=z9hG4bKx;received=198.51.100.2"
            .parse()
            .unwrap();
        assert_eq!(via.response_addr(), Some("198.51.100.2:5060".parse().unwrap()));
    }

    #[test]
    fn test_invalid_via() {
        assert!("SIP/2.0/SCTP host".parse::<Via>().is_err());
        assert!("garbage".parse::<Via>().is_err());
    }
}
