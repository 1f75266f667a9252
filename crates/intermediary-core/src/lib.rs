//! # sipstack Intermediary Core
//!
//! Static routing for SIP proxies. A [`RuleSet`] holds prefix rules keyed on
//! the user part of a destination URI, domain rules keyed on its host, and
//! at most one default rule. [`RuleSet::resolve`] turns a destination into
//! the URI of the next hop, keeping the original user part:
//!
//! ```
//! use sipstack_intermediary_core::RuleSet;
//!
//! let rules = RuleSet::parse(
//!     "{prefix=0123,nexthop=127.0.0.2:7002} {prefix=*,nexthop=127.0.0.3:7003}",
//! )
//! .unwrap();
//! let next_hop = rules.resolve(&"sip:01234567@example.com".parse().unwrap());
//! assert_eq!(next_hop.unwrap().to_string(), "sip:01234567@127.0.0.2:7002");
//! ```
//!
//! Rule sets can also be built one rule at a time with [`RuleSet::add_rule`]
//! or deserialized from configuration through [`RuleConfig`].

pub mod common;
pub mod routing;

pub use common::errors::{IntermediaryError, Result};
pub use common::types::{NextHop, ProxyingRule, RuleKey, DEFAULT_SIP_PORT};
pub use routing::{RoutingEngine, RuleConfig, RuleSet};
