//! Routing a proxy's requests through a mixed rule table

use std::sync::Arc;

use sipstack_intermediary_core::{
    IntermediaryError, NextHop, ProxyingRule, RoutingEngine, RuleSet,
};
use sipstack_sip_core::Uri;

const RULES: &str = "
    {prefix=0123,nexthop=127.0.0.2:7002}
    {prefix=01,nexthop=127.0.0.4:7004}
    {domain=domain1.foo,nexthop=proxy.example.net:5060}
    {prefix=*,nexthop=127.0.0.3:7003}
";

fn uri(s: &str) -> Uri {
    s.parse().unwrap()
}

#[test]
fn test_rule_table_routing() {
    sipstack_infra_common::init_test_logging();
    let rules = RuleSet::parse(RULES).unwrap();
    assert_eq!(rules.len(), 4);

    let cases = [
        ("sip:01234567@example.com", "sip:01234567@127.0.0.2:7002"),
        ("sip:0199@example.com", "sip:0199@127.0.0.4:7004"),
        ("sip:alice@domain1.foo", "sip:alice@proxy.example.net:5060"),
        // A prefix match beats the domain rule
        ("sip:0123@domain1.foo", "sip:0123@127.0.0.2:7002"),
        ("sip:bob@example.org", "sip:bob@127.0.0.3:7003"),
    ];
    for (destination, expected) in cases {
        assert_eq!(
            rules.resolve(&uri(destination)),
            Some(uri(expected)),
            "routing {}",
            destination
        );
    }
}

#[test]
fn test_rules_built_programmatically() {
    let mut rules = RuleSet::new();
    rules
        .add_rule(ProxyingRule::domain("example.net", NextHop::new("10.1.1.1", 5060)))
        .unwrap();
    assert!(rules.resolve(&uri("sip:carol@example.org")).is_none());

    rules
        .add_rule(ProxyingRule::default_rule(NextHop::new("10.1.1.9", 5080)))
        .unwrap();
    assert_eq!(
        rules.resolve(&uri("sip:carol@example.org")),
        Some(uri("sip:carol@10.1.1.9:5080"))
    );
    assert!(matches!(
        rules.add_rule(ProxyingRule::prefix("*", NextHop::new("10.1.1.10", 5060))),
        Err(IntermediaryError::DuplicateDefault(_))
    ));
}

#[test]
fn test_shared_between_threads() {
    let engine: Arc<dyn RoutingEngine> = Arc::new(RuleSet::parse(RULES).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = engine.clone();
            std::thread::spawn(move || {
                engine
                    .next_hop(&uri(&format!("sip:0123{}@example.com", i)))
                    .map(|next_hop| next_hop.port)
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(Some(7002)));
    }
}

#[test]
fn test_syntax_error_position() {
    match RuleSet::parse("{prefix=1,nexthop=a:1} {prefix=2 nexthop=b:1}") {
        Err(IntermediaryError::Syntax { offset, .. }) => assert_eq!(offset, 33),
        other => panic!("unexpected {:?}", other),
    }
}
