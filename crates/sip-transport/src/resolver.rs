//! # NAT address resolver
//!
//! Records, for peers behind a NAT, the address their packets really come
//! from (observed) against the address they advertise in their Via header.
//! Outbound messages towards an advertised address are redirected to the
//! observed one. Bindings only change destinations, never message content.
//!
//! Expired bindings are pruned on every call; [`AddressResolver::spawn_keepalive`]
//! additionally runs an active sweep that pings every observed address.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transport::Transport;

/// One advertised-to-observed mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressBinding {
    pub advertised: SocketAddr,
    pub observed: SocketAddr,
    pub refreshed: Instant,
    /// Overrides the resolver-wide refresh interval
    pub ttl: Option<Duration>,
}

/// Result of feeding an inbound request to the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingChange {
    /// A binding was created or now points at a different observed address
    Updated {
        advertised: SocketAddr,
        observed: SocketAddr,
    },
    /// A previously recorded binding was dropped
    Removed { advertised: SocketAddr },
}

/// Process-wide NAT binding table
#[derive(Debug)]
pub struct AddressResolver {
    bindings: RwLock<HashMap<SocketAddr, AddressBinding>>,
    refresh: Duration,
}

impl AddressResolver {
    /// Creates a resolver whose bindings expire after `refresh` without update
    pub fn new(refresh: Duration) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            refresh,
        }
    }

    fn is_expired(&self, binding: &AddressBinding, now: Instant) -> bool {
        now.duration_since(binding.refreshed) > binding.ttl.unwrap_or(self.refresh)
    }

    fn prune_locked(&self, bindings: &mut HashMap<SocketAddr, AddressBinding>) -> usize {
        let now = Instant::now();
        let before = bindings.len();
        bindings.retain(|advertised, binding| {
            let keep = !self.is_expired(binding, now);
            if !keep {
                debug!(advertised = %advertised, observed = %binding.observed, "binding expired");
            }
            keep
        });
        before - bindings.len()
    }

    /// Records or refreshes a binding. Returns true when the observed address
    /// is new for this advertised address.
    pub fn update_binding(&self, advertised: SocketAddr, observed: SocketAddr) -> bool {
        self.insert(advertised, observed, None)
    }

    /// Like [`update_binding`](Self::update_binding) with a per-binding lifetime
    pub fn update_binding_with_ttl(
        &self,
        advertised: SocketAddr,
        observed: SocketAddr,
        ttl: Duration,
    ) -> bool {
        self.insert(advertised, observed, Some(ttl))
    }

    fn insert(&self, advertised: SocketAddr, observed: SocketAddr, ttl: Option<Duration>) -> bool {
        let mut bindings = self.bindings.write();
        self.prune_locked(&mut bindings);
        let previous = bindings.insert(
            advertised,
            AddressBinding {
                advertised,
                observed,
                refreshed: Instant::now(),
                ttl,
            },
        );
        let changed = previous.map_or(true, |p| p.observed != observed);
        if changed {
            info!(advertised = %advertised, observed = %observed, "NAT binding recorded");
        }
        changed
    }

    /// Deletes the binding for `advertised`; true if one existed
    pub fn remove_binding(&self, advertised: SocketAddr) -> bool {
        let mut bindings = self.bindings.write();
        self.prune_locked(&mut bindings);
        let removed = bindings.remove(&advertised).is_some();
        if removed {
            info!(advertised = %advertised, "NAT binding removed");
        }
        removed
    }

    pub fn contains(&self, advertised: SocketAddr) -> bool {
        let mut bindings = self.bindings.write();
        self.prune_locked(&mut bindings);
        bindings.contains_key(&advertised)
    }

    /// Observed address for `advertised`, or `advertised` itself
    pub fn resolve(&self, advertised: SocketAddr) -> SocketAddr {
        let mut bindings = self.bindings.write();
        self.prune_locked(&mut bindings);
        match bindings.get(&advertised) {
            Some(binding) => {
                debug!(advertised = %advertised, observed = %binding.observed, "destination rewritten");
                binding.observed
            }
            None => advertised,
        }
    }

    /// Binding policy for an inbound request: a matching source clears any
    /// binding, a differing source creates or refreshes one.
    pub fn on_inbound_request(
        &self,
        advertised: SocketAddr,
        source: SocketAddr,
    ) -> Option<BindingChange> {
        if advertised == source {
            self.remove_binding(advertised)
                .then_some(BindingChange::Removed { advertised })
        } else {
            self.update_binding(advertised, source)
                .then_some(BindingChange::Updated {
                    advertised,
                    observed: source,
                })
        }
    }

    /// Drops expired bindings; returns how many were removed
    pub fn prune_expired(&self) -> usize {
        let mut bindings = self.bindings.write();
        self.prune_locked(&mut bindings)
    }

    /// Snapshot of the live bindings
    pub fn bindings(&self) -> Vec<AddressBinding> {
        let mut bindings = self.bindings.write();
        self.prune_locked(&mut bindings);
        bindings.values().copied().collect()
    }

    /// Starts the keep-alive sweep: every `interval`, prune expired bindings
    /// and send a keep-alive to each observed address through `transport`.
    pub fn spawn_keepalive(
        self: &Arc<Self>,
        interval: Duration,
        transport: Arc<dyn Transport>,
    ) -> JoinHandle<()> {
        let resolver = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(resolver) = resolver.upgrade() else {
                    break;
                };
                if transport.is_closed() {
                    break;
                }
                for binding in resolver.bindings() {
                    if let Err(e) = transport.send_keepalive(binding.observed).await {
                        warn!(observed = %binding.observed, "keep-alive failed: {}", e);
                    }
                }
            }
            debug!("keep-alive sweep stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_binding_lifecycle() {
        let resolver = AddressResolver::new(Duration::from_secs(3600));
        let advertised = addr("10.0.0.5:5060");
        let observed = addr("203.0.113.9:40123");

        assert_eq!(resolver.resolve(advertised), advertised);
        assert!(resolver.update_binding(advertised, observed));
        assert!(!resolver.update_binding(advertised, observed));
        assert!(resolver.contains(advertised));
        assert_eq!(resolver.resolve(advertised), observed);

        assert!(resolver.remove_binding(advertised));
        assert!(!resolver.contains(advertised));
        assert!(!resolver.remove_binding(advertised));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_request_policy() {
        let resolver = AddressResolver::new(Duration::from_secs(3600));
        let b = addr("192.168.1.20:5060");
        let a = addr("198.51.100.4:61000");

        assert_eq!(
            resolver.on_inbound_request(b, a),
            Some(BindingChange::Updated {
                advertised: b,
                observed: a
            })
        );
        // Refresh without change reports nothing
        assert_eq!(resolver.on_inbound_request(b, a), None);
        assert_eq!(resolver.resolve(b), a);

        assert_eq!(
            resolver.on_inbound_request(b, b),
            Some(BindingChange::Removed { advertised: b })
        );
        assert_eq!(resolver.on_inbound_request(b, b), None);
        assert_eq!(resolver.resolve(b), b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_and_refresh() {
        let resolver = AddressResolver::new(Duration::from_secs(60));
        let advertised = addr("10.0.0.5:5060");
        resolver.update_binding(advertised, addr("203.0.113.9:4000"));
        resolver.update_binding_with_ttl(
            addr("10.0.0.6:5060"),
            addr("203.0.113.9:4001"),
            Duration::from_secs(10),
        );

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(resolver.bindings().len(), 1);

        tokio::time::advance(Duration::from_secs(40)).await;
        // Refreshing restarts the clock
        resolver.update_binding(advertised, addr("203.0.113.9:4000"));
        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(resolver.contains(advertised));

        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(resolver.prune_expired(), 1);
        assert!(resolver.bindings().is_empty());
    }
}
