//! Backend pool bookkeeping: health flags, probe latency, connection counts.

use std::{
    net::SocketAddr,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde::Serialize;

/// One backend instance of the pool.
///
/// All fields are atomics so strategy selection and the health checker can
/// read them without taking the pool lock.
#[derive(Debug)]
pub struct Backend {
    addr: SocketAddr,
    healthy: AtomicBool,
    latency_us: AtomicU64,
    active: AtomicUsize,
}

impl Backend {
    /// Backends start out healthy so traffic flows before the first probe.
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            healthy: AtomicBool::new(true),
            latency_us: AtomicU64::new(0),
            active: AtomicUsize::new(0),
        }
    }

    /// Socket address of this backend.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current health flag.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Set the health flag, returning true when the value actually changed
    /// so callers can log only observable transitions.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::Relaxed) != healthy
    }

    /// Record the round-trip latency of the latest successful probe.
    pub fn record_latency(&self, latency: Duration) {
        self.latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Last measured probe latency.
    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.latency_us.load(Ordering::Relaxed))
    }

    /// Number of client connections currently spliced to this backend.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Count one proxied connection for the lifetime of the returned guard.
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard(Arc::clone(self))
    }
}

/// Decrements the owning backend's active-connection count on drop.
#[derive(Debug)]
pub struct ConnectionGuard(Arc<Backend>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The set of registered backends, in configuration order.
#[derive(Debug)]
pub struct BackendPool {
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl BackendPool {
    /// Build a pool from the configured addresses, dropping duplicates.
    pub fn new(addrs: &[SocketAddr]) -> Self {
        let mut backends: Vec<Arc<Backend>> = Vec::with_capacity(addrs.len());
        for &addr in addrs {
            if backends.iter().all(|backend| backend.addr() != addr) {
                backends.push(Arc::new(Backend::new(addr)));
            }
        }
        Self {
            backends: RwLock::new(backends),
        }
    }

    /// Every registered backend, in pool order.
    pub fn all(&self) -> Vec<Arc<Backend>> {
        self.read().clone()
    }

    /// The currently healthy backends, in pool order.
    pub fn healthy(&self) -> Vec<Arc<Backend>> {
        self.read()
            .iter()
            .filter(|backend| backend.is_healthy())
            .cloned()
            .collect()
    }

    /// Look up a backend by address.
    pub fn get(&self, addr: SocketAddr) -> Option<Arc<Backend>> {
        self.read()
            .iter()
            .find(|backend| backend.addr() == addr)
            .cloned()
    }

    /// Remove a backend from the pool. Callers are responsible for purging
    /// affinity entries that pointed at it.
    pub fn remove(&self, addr: SocketAddr) -> Option<Arc<Backend>> {
        let mut backends = self
            .backends
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        let index = backends.iter().position(|backend| backend.addr() == addr)?;
        Some(backends.remove(index))
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when no backends are registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Aggregate view served by the admin endpoint.
    pub fn stats(&self) -> PoolStats {
        let backends = self.all();
        let healthy_count = backends.iter().filter(|b| b.is_healthy()).count();
        let total_active_connections = backends.iter().map(|b| b.active_connections()).sum();
        PoolStats {
            pool_size: backends.len(),
            healthy_count,
            total_active_connections,
            backends: backends
                .iter()
                .map(|backend| BackendStats {
                    addr: backend.addr().to_string(),
                    healthy: backend.is_healthy(),
                    latency_ms: backend.latency().as_secs_f64() * 1000.0,
                    active_connections: backend.active_connections(),
                })
                .collect(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Backend>>> {
        self.backends
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Read-only pool summary exposed over the admin interface.
#[derive(Debug, Serialize)]
pub struct PoolStats {
    /// Number of registered backends.
    pub pool_size: usize,
    /// How many of them currently pass health checks.
    pub healthy_count: usize,
    /// Sum of active proxied connections across the pool.
    pub total_active_connections: usize,
    /// Per-backend detail.
    pub backends: Vec<BackendStats>,
}

/// Per-backend slice of [`PoolStats`].
#[derive(Debug, Serialize)]
pub struct BackendStats {
    /// Backend socket address.
    pub addr: String,
    /// Current health flag.
    pub healthy: bool,
    /// Last measured probe round-trip in milliseconds.
    pub latency_ms: f64,
    /// Client connections currently spliced to this backend.
    pub active_connections: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn pool_preserves_order_and_drops_duplicates() {
        let pool = BackendPool::new(&[addr(1), addr(2), addr(1), addr(3)]);
        let addrs: Vec<_> = pool.all().iter().map(|b| b.addr()).collect();
        assert_eq!(addrs, vec![addr(1), addr(2), addr(3)]);
    }

    #[test]
    fn health_transitions_report_changes_only() {
        let pool = BackendPool::new(&[addr(1)]);
        let backend = pool.get(addr(1)).unwrap();

        assert!(backend.is_healthy());
        assert!(!backend.set_healthy(true)); // no change
        assert!(backend.set_healthy(false)); // transition
        assert!(!backend.set_healthy(false));
        assert_eq!(pool.healthy().len(), 0);
    }

    #[test]
    fn connection_guard_counts_for_its_lifetime() {
        let pool = BackendPool::new(&[addr(1)]);
        let backend = pool.get(addr(1)).unwrap();

        let guard = backend.track_connection();
        let second = backend.track_connection();
        assert_eq!(backend.active_connections(), 2);
        drop(guard);
        assert_eq!(backend.active_connections(), 1);
        drop(second);
        assert_eq!(backend.active_connections(), 0);
    }

    #[test]
    fn stats_aggregate_the_pool() {
        let pool = BackendPool::new(&[addr(1), addr(2)]);
        let first = pool.get(addr(1)).unwrap();
        first.set_healthy(false);
        first.record_latency(Duration::from_millis(5));
        let _guard = pool.get(addr(2)).unwrap().track_connection();

        let stats = pool.stats();
        assert_eq!(stats.pool_size, 2);
        assert_eq!(stats.healthy_count, 1);
        assert_eq!(stats.total_active_connections, 1);
        assert!(!stats.backends[0].healthy);
        assert!((stats.backends[0].latency_ms - 5.0).abs() < 0.01);
    }

    #[test]
    fn removal_shrinks_the_pool() {
        let pool = BackendPool::new(&[addr(1), addr(2)]);
        assert!(pool.remove(addr(1)).is_some());
        assert!(pool.remove(addr(1)).is_none());
        assert_eq!(pool.len(), 1);
        assert!(!pool.is_empty());
    }
}
