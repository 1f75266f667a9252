//! # SIP URIs
//!
//! A reduced `sip:`/`sips:` URI model (RFC 3261 Section 19.1): user part,
//! host, optional port and `;name[=value]` parameters. Header components
//! (`?name=value`) are not modelled.
//!
//! ```rust
//! use sipstack_sip_core::{Uri, TransportType};
//!
//! let uri: Uri = "sip:alice@192.0.2.10:5070;transport=tcp".parse().unwrap();
//! assert_eq!(uri.user.as_deref(), Some("alice"));
//! assert_eq!(uri.transport(), Some(TransportType::Tcp));
//! assert_eq!(uri.socket_addr().unwrap().port(), 5070);
//! ```

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::TransportType;

/// URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    Sip,
    Sips,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Sip => "sip",
            Scheme::Sips => "sips",
        }
    }
}

/// A SIP or SIPS URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    /// URI parameters in order of appearance
    pub params: Vec<(String, Option<String>)>,
}

impl Uri {
    /// `sip:<host>`
    pub fn sip(host: impl Into<String>) -> Self {
        Self {
            scheme: Scheme::Sip,
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
        }
    }

    /// `sip:<ip>:<port>` for a socket address
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        let host = match addr.ip() {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{}]", ip),
        };
        Self::sip(host).with_port(addr.port())
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.params.push((name.into(), value));
        self
    }

    /// Value of a URI parameter; `Some(None)` for a flag parameter
    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_deref())
    }

    /// Transport requested by the `transport=` parameter, if any
    pub fn transport(&self) -> Option<TransportType> {
        match self.param("transport") {
            Some(Some(value)) => value.parse().ok(),
            _ => None,
        }
    }

    /// True for a `;lr` loose-routing URI
    pub fn is_loose_route(&self) -> bool {
        self.param("lr").is_some()
    }

    /// Host and port as a socket address when the host is an IP literal.
    ///
    /// The port defaults to the well-known port of the URI transport
    /// (5061 for `sips:`).
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let ip: IpAddr = host.parse().ok()?;
        let port = self.port.unwrap_or_else(|| match self.scheme {
            Scheme::Sips => TransportType::Tls.default_port(),
            Scheme::Sip => self.transport().unwrap_or(TransportType::Udp).default_port(),
        });
        Some(SocketAddr::new(ip, port))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme.as_str())?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
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

pub(crate) fn parse_params(input: &str) -> Vec<(String, Option<String>)> {
    input
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((name, value)) => (name.trim().to_string(), Some(value.trim().to_string())),
            None => (p.to_string(), None),
        })
        .collect()
}

/// Splits `host[:port]`, accepting bracketed IPv6 references
pub(crate) fn parse_host_port(input: &str) -> Result<(String, Option<u16>)> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidUri("empty host".to_string()));
    }
    let (host, port) = if input.starts_with('[') {
        let end = input
            .find(']')
            .ok_or_else(|| Error::InvalidUri(input.to_string()))?;
        let rest = &input[end + 1..];
        let port = match rest.strip_prefix(':') {
            Some(p) => Some(p),
            None if rest.is_empty() => None,
            None => return Err(Error::InvalidUri(input.to_string())),
        };
        (&input[..=end], port)
    } else {
        match input.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (input, None),
        }
    };
    let port = match port {
        Some(p) => Some(
            p.parse::<u16>()
                .map_err(|_| Error::InvalidUri(format!("bad port in '{}'", input)))?,
        ),
        None => None,
    };
    Ok((host.to_string(), port))
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (scheme, rest) = if let Some(rest) = strip_prefix_ignore_case(s, "sips:") {
            (Scheme::Sips, rest)
        } else if let Some(rest) = strip_prefix_ignore_case(s, "sip:") {
            (Scheme::Sip, rest)
        } else {
            return Err(Error::InvalidUri(s.to_string()));
        };

        // Header components are not part of the model
        let rest = rest.split('?').next().unwrap_or_default();
        let (user, host_part) = match rest.rsplit_once('@') {
            Some((user, host)) if !user.is_empty() => (Some(user.to_string()), host),
            Some(_) => return Err(Error::InvalidUri(s.to_string())),
            None => (None, rest),
        };
        let (host_port, params) = match host_part.split_once(';') {
            Some((hp, params)) => (hp, parse_params(params)),
            None => (host_part, Vec::new()),
        };
        let (host, port) = parse_host_port(host_port)?;

        Ok(Uri {
            scheme,
            user,
            host,
            port,
            params,
        })
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    match s.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => s.get(prefix.len()..),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_uri() {
        let uri: Uri = "sip:bob@example.com:5080;transport=tls;lr".parse().unwrap();
        assert_eq!(uri.scheme, Scheme::Sip);
        assert_eq!(uri.user.as_deref(), Some("bob"));
        assert_eq!(uri.host, "example.com");
        assert_eq!(uri.port, Some(5080));
        assert_eq!(uri.transport(), Some(TransportType::Tls));
        assert!(uri.is_loose_route());
        assert_eq!(uri.to_string(), "sip:bob@example.com:5080;transport=tls;lr");
    }

    #[test]
    fn test_socket_addr_defaults() {
        let uri: Uri = "sips:10.0.0.1".parse().unwrap();
        assert_eq!(uri.socket_addr(), Some("10.0.0.1:5061".parse().unwrap()));

        let uri: Uri = "sip:carol@atlanta.example.com".parse().unwrap();
        assert_eq!(uri.socket_addr(), None);
    }

    #[test]
    fn test_ipv6_host() {
        let uri: Uri = "sip:[::1]:5062".parse().unwrap();
        assert_eq!(uri.socket_addr(), Some("[::1]:5062".parse().unwrap()));
        let addr: SocketAddr = "[::1]:5062".parse().unwrap();
        assert_eq!(Uri::from_socket_addr(addr).to_string(), "sip:[::1]:5062");
    }

    #[test]
    fn test_invalid_uris() {
        assert!("tel:+15551234".parse::<Uri>().is_err());
        assert!("sip:".parse::<Uri>().is_err());
        assert!("sip:host:notaport".parse::<Uri>().is_err());
    }
}
