//! Pluggable backend-selection strategies for unaffinitized requests.

use std::{
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use thiserror::Error;

use super::pool::Backend;

/// Per-active-connection penalty added to the probe latency when scoring
/// backends under the weighted-response-time strategy.
const CONNECTION_PENALTY_US: u64 = 10_000;

/// Strategy identifiers accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Cycle through healthy backends in pool order.
    RoundRobin,
    /// Pick the healthy backend with the fewest active connections.
    LeastConnections,
    /// Favor fast, lightly loaded backends by probe latency plus a small
    /// penalty per active connection.
    WeightedResponseTime,
}

/// Error returned when a strategy name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown strategy `{0}`; expected round_robin, least_connections, or weighted_response_time")]
pub struct UnknownStrategy(String);

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "round_robin" => Ok(Self::RoundRobin),
            "least_connections" => Ok(Self::LeastConnections),
            "weighted_response_time" => Ok(Self::WeightedResponseTime),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// A backend-selection strategy over the healthy subset of the pool.
pub trait Strategy: Send + Sync {
    /// Pick one backend out of `candidates`, or `None` when empty.
    fn pick(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>>;

    /// Configuration name of the strategy, for logging.
    fn name(&self) -> &'static str;
}

/// Instantiate the strategy selected in configuration.
pub fn build(kind: StrategyKind) -> Arc<dyn Strategy> {
    match kind {
        StrategyKind::RoundRobin => Arc::new(RoundRobin::default()),
        StrategyKind::LeastConnections => Arc::new(LeastConnections),
        StrategyKind::WeightedResponseTime => Arc::new(WeightedResponseTime),
    }
}

/// Fixed-order rotation over the candidate list.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl Strategy for RoundRobin {
    fn pick(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(Arc::clone(&candidates[index]))
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Fewest currently active proxied connections wins; ties keep pool order.
#[derive(Debug)]
pub struct LeastConnections;

impl Strategy for LeastConnections {
    fn pick(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        candidates
            .iter()
            .min_by_key(|backend| backend.active_connections())
            .cloned()
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

/// Lowest score wins, where score is the last probe round-trip plus
/// [`CONNECTION_PENALTY_US`] per active connection.
#[derive(Debug)]
pub struct WeightedResponseTime;

impl Strategy for WeightedResponseTime {
    fn pick(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        candidates
            .iter()
            .min_by_key(|backend| {
                let latency = backend.latency().as_micros() as u64;
                latency + backend.active_connections() as u64 * CONNECTION_PENALTY_US
            })
            .cloned()
    }

    fn name(&self) -> &'static str {
        "weighted_response_time"
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, time::Duration};

    use super::*;
    use crate::router::pool::BackendPool;

    fn pool_of(count: u16) -> BackendPool {
        let addrs: Vec<SocketAddr> = (1..=count)
            .map(|port| SocketAddr::from(([127, 0, 0, 1], port)))
            .collect();
        BackendPool::new(&addrs)
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!(
            "round_robin".parse::<StrategyKind>().unwrap(),
            StrategyKind::RoundRobin
        );
        assert_eq!(
            "least_connections".parse::<StrategyKind>().unwrap(),
            StrategyKind::LeastConnections
        );
        assert_eq!(
            "weighted_response_time".parse::<StrategyKind>().unwrap(),
            StrategyKind::WeightedResponseTime
        );
        assert!("fastest".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let pool = pool_of(3);
        let candidates = pool.healthy();
        let strategy = RoundRobin::default();

        let picks: Vec<_> = (0..4)
            .map(|_| strategy.pick(&candidates).unwrap().addr().port())
            .collect();
        assert_eq!(picks, vec![1, 2, 3, 1]);
        assert!(strategy.pick(&[]).is_none());
    }

    #[test]
    fn least_connections_prefers_the_idle_backend() {
        let pool = pool_of(2);
        let candidates = pool.healthy();
        let _busy = candidates[0].track_connection();

        let pick = LeastConnections.pick(&candidates).unwrap();
        assert_eq!(pick.addr().port(), 2);
    }

    #[test]
    fn weighted_response_time_balances_latency_and_load() {
        let pool = pool_of(2);
        let candidates = pool.healthy();
        candidates[0].record_latency(Duration::from_millis(1));
        candidates[1].record_latency(Duration::from_millis(50));

        // Fast and idle wins outright.
        assert_eq!(
            WeightedResponseTime.pick(&candidates).unwrap().addr().port(),
            1
        );

        // Enough active connections outweigh the latency advantage.
        let _guards: Vec<_> = (0..6).map(|_| candidates[0].track_connection()).collect();
        assert_eq!(
            WeightedResponseTime.pick(&candidates).unwrap().addr().port(),
            2
        );
    }
}
