//! Static next-hop routing for a proxy
//!
//! A [`RuleSet`] maps a destination URI to the URI of the next hop:
//!
//! 1. the prefix rule with the longest prefix of the user part,
//! 2. else the first domain rule naming the host,
//! 3. else the default rule, if there is one.
//!
//! The set is read-only once built and can be shared freely between tasks.

mod parser;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sipstack_sip_core::Uri;
use tracing::{debug, trace};

use crate::common::errors::{IntermediaryError, Result};
use crate::common::types::{NextHop, ProxyingRule, RuleKey};

/// Anything that can pick the next hop for a request URI
pub trait RoutingEngine: Send + Sync {
    /// `None` means no route
    fn next_hop(&self, uri: &Uri) -> Option<Uri>;
}

/// One rule as it appears in configuration files.
///
/// Exactly one of `prefix` and `domain` must be set; `*` in either makes
/// the default rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub nexthop: String,
}

impl fmt::Display for RuleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        if let Some(prefix) = &self.prefix {
            write!(f, "prefix={},", prefix)?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "domain={},", domain)?;
        }
        write!(f, "nexthop={}}}", self.nexthop)
    }
}

impl TryFrom<RuleConfig> for ProxyingRule {
    type Error = IntermediaryError;

    fn try_from(config: RuleConfig) -> Result<Self> {
        let invalid = |reason: &str| IntermediaryError::InvalidRule {
            rule: config.to_string(),
            reason: reason.to_string(),
        };
        let next_hop: NextHop = config.nexthop.parse()?;
        match (&config.prefix, &config.domain) {
            (Some(_), Some(_)) => Err(invalid("both prefix and domain given")),
            (None, None) => Err(invalid("neither prefix nor domain given")),
            (Some(prefix), None) if prefix.is_empty() => Err(invalid("empty prefix")),
            (None, Some(domain)) if domain.is_empty() => Err(invalid("empty domain")),
            (Some(prefix), None) => Ok(ProxyingRule::prefix(prefix.clone(), next_hop)),
            (None, Some(domain)) if domain == "*" => Ok(ProxyingRule::default_rule(next_hop)),
            (None, Some(domain)) => Ok(ProxyingRule::domain(domain.clone(), next_hop)),
        }
    }
}

impl From<ProxyingRule> for RuleConfig {
    fn from(rule: ProxyingRule) -> Self {
        let nexthop = rule.next_hop.to_string();
        match rule.key {
            RuleKey::Prefix(prefix) => RuleConfig {
                prefix: Some(prefix),
                domain: None,
                nexthop,
            },
            RuleKey::Domain(domain) => RuleConfig {
                prefix: None,
                domain: Some(domain),
                nexthop,
            },
            RuleKey::Default => RuleConfig {
                prefix: Some("*".to_string()),
                domain: None,
                nexthop,
            },
        }
    }
}

/// Prefix, domain and default proxying rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RuleConfig>", into = "Vec<RuleConfig>")]
pub struct RuleSet {
    prefixes: Vec<ProxyingRule>,
    domains: Vec<ProxyingRule>,
    default: Option<ProxyingRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule; a second default rule is refused
    pub fn add_rule(&mut self, rule: ProxyingRule) -> Result<()> {
        match rule.key {
            RuleKey::Prefix(_) => self.prefixes.push(rule),
            RuleKey::Domain(_) => self.domains.push(rule),
            RuleKey::Default => {
                if let Some(existing) = &self.default {
                    return Err(IntermediaryError::DuplicateDefault(
                        existing.next_hop.to_string(),
                    ));
                }
                self.default = Some(rule);
            }
        }
        Ok(())
    }

    /// Builds a rule set from the `{prefix=..,nexthop=..}` list syntax
    pub fn parse(text: &str) -> Result<Self> {
        let mut rules = Self::new();
        for entry in parser::parse_entries(text)? {
            let mut config = RuleConfig::default();
            let mut nexthop = None;
            for (name, value) in entry.fields {
                let slot = if name.eq_ignore_ascii_case("prefix") {
                    &mut config.prefix
                } else if name.eq_ignore_ascii_case("domain") {
                    &mut config.domain
                } else if name.eq_ignore_ascii_case("nexthop") {
                    &mut nexthop
                } else {
                    return Err(IntermediaryError::InvalidRule {
                        rule: entry.text.to_string(),
                        reason: format!("unknown field '{}'", name),
                    });
                };
                if slot.replace(value.to_string()).is_some() {
                    return Err(IntermediaryError::InvalidRule {
                        rule: entry.text.to_string(),
                        reason: format!("'{}' given twice", name),
                    });
                }
            }
            config.nexthop = nexthop.ok_or_else(|| IntermediaryError::InvalidRule {
                rule: entry.text.to_string(),
                reason: "missing nexthop".to_string(),
            })?;
            trace!(offset = entry.offset, rule = entry.text, "Parsed proxying rule");
            rules.add_rule(ProxyingRule::try_from(config)?)?;
        }
        debug!(rules = rules.len(), "Loaded proxying rules");
        Ok(rules)
    }

    /// Builds a rule set from deserialized configuration entries
    pub fn from_config(entries: impl IntoIterator<Item = RuleConfig>) -> Result<Self> {
        let mut rules = Self::new();
        for entry in entries {
            rules.add_rule(ProxyingRule::try_from(entry)?)?;
        }
        debug!(rules = rules.len(), "Loaded proxying rules");
        Ok(rules)
    }

    pub fn default_rule(&self) -> Option<&ProxyingRule> {
        self.default.as_ref()
    }

    /// The rule that routes `uri`, following the precedence above
    pub fn matching_rule(&self, uri: &Uri) -> Option<&ProxyingRule> {
        let mut best: Option<(&ProxyingRule, usize)> = None;
        for rule in &self.prefixes {
            let RuleKey::Prefix(prefix) = &rule.key else {
                continue;
            };
            let longer = best.map_or(true, |(_, len)| prefix.len() > len);
            if longer && rule.matches(uri) {
                best = Some((rule, prefix.len()));
            }
        }
        best.map(|(rule, _)| rule)
            .or_else(|| self.domains.iter().find(|rule| rule.matches(uri)))
            .or(self.default.as_ref())
    }

    /// Next-hop URI for `uri`, keeping its user part; `None` when no rule
    /// applies
    pub fn resolve(&self, uri: &Uri) -> Option<Uri> {
        match self.matching_rule(uri) {
            Some(rule) => {
                let next_hop = rule.next_hop_uri(uri);
                debug!(destination = %uri, rule = %rule, next_hop = %next_hop, "Resolved next hop");
                Some(next_hop)
            }
            None => {
                debug!(destination = %uri, "No route");
                None
            }
        }
    }

    /// Prefix rules, then domain rules, then the default rule
    pub fn rules(&self) -> impl Iterator<Item = &ProxyingRule> {
        self.prefixes
            .iter()
            .chain(self.domains.iter())
            .chain(self.default.iter())
    }

    pub fn len(&self) -> usize {
        self.prefixes.len() + self.domains.len() + usize::from(self.default.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RoutingEngine for RuleSet {
    fn next_hop(&self, uri: &Uri) -> Option<Uri> {
        self.resolve(uri)
    }
}

impl FromStr for RuleSet {
    type Err = IntermediaryError;

    fn from_str(s: &str) -> Result<Self> {
        RuleSet::parse(s)
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", rule)?;
        }
        Ok(())
    }
}

impl TryFrom<Vec<RuleConfig>> for RuleSet {
    type Error = IntermediaryError;

    fn try_from(entries: Vec<RuleConfig>) -> Result<Self> {
        RuleSet::from_config(entries)
    }
}

impl From<RuleSet> for Vec<RuleConfig> {
    fn from(rules: RuleSet) -> Self {
        rules
            .prefixes
            .into_iter()
            .chain(rules.domains)
            .chain(rules.default)
            .map(RuleConfig::from)
            .collect()
    }
}
