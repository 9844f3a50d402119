//! Periodic TCP health probes over the backend pool.

use std::{sync::Arc, time::Duration};

use tokio::{
    net::TcpStream,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::pool::{Backend, BackendPool};

/// Probe every backend on a fixed cadence, flipping health flags as
/// connect attempts succeed or fail. Only transitions are logged.
pub fn spawn_health_checks(
    pool: Arc<BackendPool>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for backend in pool.all() {
                probe(&backend, timeout).await;
            }
        }
    })
}

async fn probe(backend: &Backend, timeout: Duration) {
    let addr = backend.addr();
    let started = Instant::now();
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => {
            backend.record_latency(started.elapsed());
            if backend.set_healthy(true) {
                info!(backend = %addr, latency = ?started.elapsed(), "backend became healthy");
            }
        }
        Ok(Err(err)) => {
            if backend.set_healthy(false) {
                warn!(backend = %addr, error = %err, "backend became unhealthy");
            } else {
                debug!(backend = %addr, error = %err, "backend still unhealthy");
            }
        }
        Err(_) => {
            if backend.set_healthy(false) {
                warn!(backend = %addr, ?timeout, "backend probe timed out");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn probe_flags_live_and_dead_backends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap();

        // Bind and drop to get an address nothing listens on.
        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };

        let pool = BackendPool::new(&[live, dead]);
        let timeout = Duration::from_millis(500);

        probe(&pool.get(live).unwrap(), timeout).await;
        probe(&pool.get(dead).unwrap(), timeout).await;

        assert!(pool.get(live).unwrap().is_healthy());
        assert!(!pool.get(dead).unwrap().is_healthy());
        assert!(pool.get(live).unwrap().latency() > Duration::ZERO);
    }

    #[tokio::test]
    async fn checker_task_recovers_a_backend() {
        // Start unhealthy, then bring a listener up and let the loop notice.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let pool = Arc::new(BackendPool::new(&[addr]));
        pool.get(addr).unwrap().set_healthy(false);

        let handle = spawn_health_checks(
            Arc::clone(&pool),
            Duration::from_millis(20),
            Duration::from_millis(200),
        );
        time::sleep(Duration::from_millis(120)).await;
        handle.abort();

        assert!(pool.get(addr).unwrap().is_healthy());
    }
}
