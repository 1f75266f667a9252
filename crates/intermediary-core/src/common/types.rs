//! Common types used throughout the intermediary-core library

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipstack_sip_core::Uri;

use super::errors::{IntermediaryError, Result};

/// Port used when a next hop does not name one
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// Prefix spellings that select the default rule
pub const DEFAULT_PREFIXES: [&str; 2] = ["*", "default"];

/// Where matching requests are forwarded: `host[:port]`.
///
/// The host is kept as written; name resolution happens in the transport
/// layer when the request is actually sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NextHop {
    pub host: String,
    pub port: u16,
}

impl NextHop {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NextHop {
    type Err = IntermediaryError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || IntermediaryError::InvalidNextHop(s.to_string());
        let s = s.trim();

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            // [v6]:port
            let (host, rest) = rest.split_once(']').ok_or_else(invalid)?;
            match rest {
                "" => (host, None),
                _ => (host, Some(rest.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match s.rsplit_once(':') {
                // IPv6 literals need brackets
                Some((host, _)) if host.contains(':') => return Err(invalid()),
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c == '@') {
            return Err(invalid());
        }
        let port = match port {
            Some(port) => match port.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => return Err(invalid()),
            },
            None => DEFAULT_SIP_PORT,
        };
        Ok(NextHop::new(host, port))
    }
}

impl TryFrom<String> for NextHop {
    type Error = IntermediaryError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NextHop> for String {
    fn from(hop: NextHop) -> Self {
        hop.to_string()
    }
}

/// What a rule matches on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleKey {
    /// The user part of the destination starts with this prefix
    Prefix(String),
    /// The destination host equals this domain, ignoring case
    Domain(String),
    /// Anything no other rule claimed
    Default,
}

/// A match key and the next hop it routes to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyingRule {
    pub key: RuleKey,
    pub next_hop: NextHop,
}

impl ProxyingRule {
    /// A prefix rule; `*` and `default` make it the default rule
    pub fn prefix(prefix: impl Into<String>, next_hop: NextHop) -> Self {
        let prefix = prefix.into();
        let key = if DEFAULT_PREFIXES
            .iter()
            .any(|default| prefix.eq_ignore_ascii_case(default))
        {
            RuleKey::Default
        } else {
            RuleKey::Prefix(prefix)
        };
        Self { key, next_hop }
    }

    pub fn domain(domain: impl Into<String>, next_hop: NextHop) -> Self {
        Self {
            key: RuleKey::Domain(domain.into()),
            next_hop,
        }
    }

    pub fn default_rule(next_hop: NextHop) -> Self {
        Self {
            key: RuleKey::Default,
            next_hop,
        }
    }

    pub fn is_default(&self) -> bool {
        self.key == RuleKey::Default
    }

    /// Whether this rule applies to `uri`, ignoring precedence between rules
    pub fn matches(&self, uri: &Uri) -> bool {
        match &self.key {
            RuleKey::Prefix(prefix) => uri
                .user
                .as_deref()
                .map_or(false, |user| user.starts_with(prefix.as_str())),
            RuleKey::Domain(domain) => uri.host.eq_ignore_ascii_case(domain),
            RuleKey::Default => true,
        }
    }

    /// The URI a request for `uri` is forwarded to: the next hop's host and
    /// port with the original user part and scheme
    pub fn next_hop_uri(&self, uri: &Uri) -> Uri {
        let host = if self.next_hop.host.contains(':') {
            format!("[{}]", self.next_hop.host)
        } else {
            self.next_hop.host.clone()
        };
        let mut target = Uri::sip(host).with_port(self.next_hop.port);
        target.scheme = uri.scheme;
        target.user = uri.user.clone();
        target
    }
}

impl fmt::Display for ProxyingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            RuleKey::Prefix(prefix) => write!(f, "{{prefix={},nexthop={}}}", prefix, self.next_hop),
            RuleKey::Domain(domain) => write!(f, "{{domain={},nexthop={}}}", domain, self.next_hop),
            RuleKey::Default => write!(f, "{{prefix=*,nexthop={}}}", self.next_hop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_hop_parsing() {
        assert_eq!(
            "127.0.0.2:7002".parse::<NextHop>().unwrap(),
            NextHop::new("127.0.0.2", 7002)
        );
        assert_eq!(
            "proxy.example.net".parse::<NextHop>().unwrap(),
            NextHop::new("proxy.example.net", DEFAULT_SIP_PORT)
        );
        let v6 = "[2001:db8::1]:5080".parse::<NextHop>().unwrap();
        assert_eq!(v6, NextHop::new("2001:db8::1", 5080));
        assert_eq!(v6.to_string(), "[2001:db8::1]:5080");

        for bad in ["", ":5060", "host:", "host:0", "host:70000", "a@b:5060", "[::1]5060"] {
            assert!(bad.parse::<NextHop>().is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_star_prefix_is_default() {
        let hop = NextHop::new("10.0.0.1", 5060);
        assert!(ProxyingRule::prefix("*", hop.clone()).is_default());
        assert!(ProxyingRule::prefix("DEFAULT", hop.clone()).is_default());
        assert!(!ProxyingRule::prefix("0123", hop).is_default());
    }

    #[test]
    fn test_rule_matching() {
        let uri: Uri = "sip:01234567@example.com".parse().unwrap();
        let hop = NextHop::new("127.0.0.2", 7002);

        assert!(ProxyingRule::prefix("0123", hop.clone()).matches(&uri));
        assert!(!ProxyingRule::prefix("0124", hop.clone()).matches(&uri));
        assert!(ProxyingRule::domain("EXAMPLE.com", hop.clone()).matches(&uri));
        assert!(!ProxyingRule::domain("example.org", hop.clone()).matches(&uri));

        let no_user: Uri = "sip:example.com".parse().unwrap();
        assert!(!ProxyingRule::prefix("0", hop.clone()).matches(&no_user));
        assert!(ProxyingRule::default_rule(hop).matches(&no_user));
    }

    #[test]
    fn test_next_hop_uri_keeps_user() {
        let rule = ProxyingRule::prefix("0123", NextHop::new("127.0.0.2", 7002));
        let uri: Uri = "sip:01234567@example.com;transport=tcp".parse().unwrap();
        assert_eq!(rule.next_hop_uri(&uri).to_string(), "sip:01234567@127.0.0.2:7002");
    }

    #[test]
    fn test_next_hop_serde() {
        let hop: NextHop = serde_json::from_str("\"proxy.example.net:5070\"").unwrap();
        assert_eq!(hop, NextHop::new("proxy.example.net", 5070));
        assert_eq!(serde_json::to_string(&hop).unwrap(), "\"proxy.example.net:5070\"");
        assert!(serde_json::from_str::<NextHop>("\"proxy:x\"").is_err());
    }
}
