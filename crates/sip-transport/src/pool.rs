//! Connection pool shared by the stream transports.
//!
//! Connections are keyed by `(protocol, remote address)`. Outbound
//! connections created by [`ConnectionPool::get_or_connect`] and inbound
//! connections registered by the accept loop live in the same table, so a
//! response or a later request towards the same peer reuses whichever
//! connection exists.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sipstack_sip_core::TransportType;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::error::Result;

/// Pool key: protocol plus remote address
pub type PoolKey = (TransportType, SocketAddr);

/// What the pool needs from a connection
pub trait PooledConnection: Send + Sync + 'static {
    /// Stops the connection; must be idempotent
    fn close(&self);

    /// True once the connection can no longer carry messages
    fn is_closed(&self) -> bool;
}

struct PoolEntry<C> {
    connection: Arc<C>,
    last_used: Instant,
}

/// Connection pool with per-key connect serialization, LRU eviction and
/// idle cleanup
pub struct ConnectionPool<C: PooledConnection> {
    entries: DashMap<PoolKey, PoolEntry<C>>,
    connect_locks: DashMap<PoolKey, Arc<Mutex<()>>>,
    max_connections: usize,
    idle_timeout: Duration,
}

impl<C: PooledConnection> ConnectionPool<C> {
    pub fn new(max_connections: usize, idle_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            connect_locks: DashMap::new(),
            max_connections: max_connections.max(1),
            idle_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a live pooled connection and marks it used
    pub fn get(&self, key: &PoolKey) -> Option<Arc<C>> {
        let mut entry = self.entries.get_mut(key)?;
        if entry.connection.is_closed() {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.connection.is_closed());
            trace!(peer = %key.1, "dropped closed pooled connection");
            return None;
        }
        entry.last_used = Instant::now();
        Some(entry.connection.clone())
    }

    /// Returns the pooled connection for `key`, establishing one with
    /// `connect` if none exists.
    ///
    /// Concurrent callers for the same key wait for a single connect attempt;
    /// callers for other keys are not blocked.
    pub async fn get_or_connect<F, Fut>(&self, key: PoolKey, connect: F) -> Result<Arc<C>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<C>>>,
    {
        if let Some(connection) = self.get(&key) {
            return Ok(connection);
        }

        let lock = self.connect_locks.entry(key).or_default().clone();
        let _guard = lock.lock().await;

        let result = match self.get(&key) {
            Some(connection) => Ok(connection),
            None => {
                debug!(transport = %key.0, peer = %key.1, "opening pooled connection");
                let result = connect().await;
                if let Ok(connection) = &result {
                    self.register(key, connection.clone());
                }
                result
            }
        };
        // Only the map and this caller hold the lock: nobody is waiting on it
        self.connect_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) <= 2);
        result
    }

    /// Adds a connection, evicting the least recently used one when full.
    /// A different connection already pooled under `key` is closed.
    pub fn register(&self, key: PoolKey, connection: Arc<C>) {
        if let Some(mut entry) = self.entries.get_mut(&key) {
            if Arc::ptr_eq(&entry.connection, &connection) {
                entry.last_used = Instant::now();
                return;
            }
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_connections {
            self.evict_lru();
        }
        let previous = self.entries.insert(
            key,
            PoolEntry {
                connection: connection.clone(),
                last_used: Instant::now(),
            },
        );
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous.connection, &connection) {
                debug!(transport = %key.0, peer = %key.1, "replaced pooled connection");
                previous.connection.close();
            }
        }
        trace!(peer = %key.1, size = self.entries.len(), "registered connection");
    }

    /// Removes and closes the connection for `key`
    pub fn remove(&self, key: &PoolKey) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                entry.connection.close();
                true
            }
            None => false,
        }
    }

    /// Removes `key` only while it still maps to `connection`
    pub(crate) fn remove_connection(&self, key: &PoolKey, connection: &Arc<C>) -> bool {
        self.entries
            .remove_if(key, |_, entry| Arc::ptr_eq(&entry.connection, connection))
            .is_some()
    }

    fn evict_lru(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().last_used)
            .map(|entry| *entry.key());
        if let Some(key) = oldest {
            debug!(transport = %key.0, peer = %key.1, "pool full, evicting least recently used connection");
            self.remove(&key);
        }
    }

    /// Closes connections unused for longer than the idle timeout
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let idle: Vec<PoolKey> = self
            .entries
            .iter()
            .filter(|entry| {
                entry.value().connection.is_closed()
                    || now.duration_since(entry.value().last_used) > self.idle_timeout
            })
            .map(|entry| *entry.key())
            .collect();
        for key in &idle {
            debug!(transport = %key.0, peer = %key.1, "removing idle connection");
            self.remove(key);
        }
        idle.len()
    }

    /// Closes every pooled connection
    pub fn close_all(&self) {
        let keys: Vec<PoolKey> = self.entries.iter().map(|entry| *entry.key()).collect();
        info!("Closing all connections in pool (count: {})", keys.len());
        for key in keys {
            self.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeConnection {
        closed: AtomicBool,
    }

    impl PooledConnection for FakeConnection {
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn key(port: u16) -> PoolKey {
        (TransportType::Tcp, SocketAddr::from(([192, 168, 1, 1], port)))
    }

    #[tokio::test]
    async fn test_get_or_connect_reuses_connection() {
        let pool = ConnectionPool::<FakeConnection>::new(10, Duration::from_secs(300));
        let connects = AtomicUsize::new(0);

        for _ in 0..3 {
            pool.get_or_connect(key(5060), || async {
                connects.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(FakeConnection::default()))
            })
            .await
            .unwrap();
        }
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_not_pooled() {
        let pool = ConnectionPool::<FakeConnection>::new(10, Duration::from_secs(300));
        let result = pool
            .get_or_connect(key(5060), || async {
                Err(crate::Error::ConnectFailed(
                    key(5060).1,
                    std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                ))
            })
            .await;
        assert!(matches!(result, Err(crate::Error::ConnectFailed(..))));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_lru_eviction_at_capacity() {
        let pool = ConnectionPool::<FakeConnection>::new(2, Duration::from_secs(300));
        let first = Arc::new(FakeConnection::default());
        pool.register(key(1), first.clone());
        pool.register(key(2), Arc::new(FakeConnection::default()));

        // Touch the first so the second becomes least recently used
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(pool.get(&key(1)).is_some());

        pool.register(key(3), Arc::new(FakeConnection::default()));
        assert_eq!(pool.len(), 2);
        assert!(pool.get(&key(1)).is_some());
        assert!(pool.get(&key(2)).is_none());
        assert!(!first.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle() {
        let pool = ConnectionPool::<FakeConnection>::new(10, Duration::from_secs(60));
        let idle = Arc::new(FakeConnection::default());
        pool.register(key(1), idle.clone());

        tokio::time::advance(Duration::from_secs(30)).await;
        pool.register(key(2), Arc::new(FakeConnection::default()));
        assert_eq!(pool.evict_idle(), 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(pool.evict_idle(), 1);
        assert!(idle.is_closed());
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_connection_is_dropped() {
        let pool = ConnectionPool::<FakeConnection>::new(10, Duration::from_secs(60));
        let connection = Arc::new(FakeConnection::default());
        pool.register(key(1), connection.clone());
        connection.close();
        assert!(pool.get(&key(1)).is_none());
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_remove_connection_checks_identity() {
        let pool = ConnectionPool::<FakeConnection>::new(10, Duration::from_secs(60));
        let old = Arc::new(FakeConnection::default());
        let new = Arc::new(FakeConnection::default());
        pool.register(key(1), old.clone());
        pool.register(key(1), new.clone());

        assert!(!pool.remove_connection(&key(1), &old));
        assert!(pool.get(&key(1)).is_some());
        assert!(pool.remove_connection(&key(1), &new));

        pool.register(key(2), Arc::new(FakeConnection::default()));
        pool.close_all();
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_register_closes_replaced_connection() {
        let pool = ConnectionPool::<FakeConnection>::new(10, Duration::from_secs(60));
        let old = Arc::new(FakeConnection::default());
        let new = Arc::new(FakeConnection::default());
        pool.register(key(1), old.clone());
        pool.register(key(1), old.clone());
        assert!(!old.is_closed());

        pool.register(key(1), new.clone());
        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert!(Arc::ptr_eq(&pool.get(&key(1)).unwrap(), &new));
        assert_eq!(pool.len(), 1);
    }

    /// Counts connect attempts; the first one fails after a delay
    #[derive(Default)]
    struct Dialer {
        attempts: AtomicUsize,
        in_flight: AtomicUsize,
        overlapped: AtomicBool,
    }

    impl Dialer {
        async fn dial(&self) -> Result<Arc<FakeConnection>> {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if attempt == 0 {
                return Err(crate::Error::ConnectFailed(
                    key(5060).1,
                    std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                ));
            }
            Ok(Arc::new(FakeConnection::default()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_stay_serialized_after_failure() {
        let pool = Arc::new(ConnectionPool::<FakeConnection>::new(10, Duration::from_secs(300)));
        let dialer = Arc::new(Dialer::default());
        let caller = |pool: Arc<ConnectionPool<FakeConnection>>, dialer: Arc<Dialer>| {
            tokio::spawn(async move { pool.get_or_connect(key(5060), || dialer.dial()).await })
        };

        // The first attempt fails while a second caller waits on it
        let first = caller(pool.clone(), dialer.clone());
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = caller(pool.clone(), dialer.clone());
        // A third caller arrives while the second is connecting
        tokio::time::sleep(Duration::from_millis(25)).await;
        let third = caller(pool.clone(), dialer.clone());

        assert!(first.await.unwrap().is_err());
        let second = second.await.unwrap().unwrap();
        let third = third.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(dialer.attempts.load(Ordering::SeqCst), 2);
        assert!(!dialer.overlapped.load(Ordering::SeqCst));
        assert!(pool.connect_locks.is_empty());
    }
}
