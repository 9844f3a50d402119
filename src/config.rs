//! Environment-driven runtime configuration for the game server and router.

use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use tracing::warn;

use crate::{
    router::{affinity::AffinityPolicy, strategy::StrategyKind},
    state::deck::DEFAULT_PAIRS,
};

/// Upper bound on a single wire frame; oversized lines fail the connection.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Runtime configuration for the game backend process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the game server listens on.
    pub listen: SocketAddr,
    /// Number of card pairs dealt into every new room.
    pub pairs: usize,
    /// How long the easy-mode full-deck preview stays visible.
    pub preview: Duration,
    /// Grace window before a mismatched pair is hidden again.
    pub mismatch_hide: Duration,
    /// Rooms idle for longer than this are reaped by the sweep task.
    pub room_idle_ttl: Duration,
    /// Cadence of the idle-room sweep.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8001)),
            pairs: DEFAULT_PAIRS,
            preview: Duration::from_secs(3),
            mismatch_hide: Duration::from_millis(500),
            room_idle_ttl: Duration::from_secs(1800),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Load the server configuration from `MEMORIA_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen: env_parse("MEMORIA_ADDR", defaults.listen),
            pairs: env_parse("MEMORIA_PAIRS", defaults.pairs),
            preview: env_duration_ms("MEMORIA_PREVIEW_MS", defaults.preview),
            mismatch_hide: env_duration_ms("MEMORIA_MISMATCH_HIDE_MS", defaults.mismatch_hide),
            room_idle_ttl: env_duration_secs("MEMORIA_ROOM_IDLE_SECS", defaults.room_idle_ttl),
            sweep_interval: env_duration_secs("MEMORIA_SWEEP_SECS", defaults.sweep_interval),
        }
    }
}

/// Runtime configuration for the router process.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Address the router accepts client traffic on.
    pub listen: SocketAddr,
    /// Address of the read-only HTTP admin endpoint.
    pub admin: SocketAddr,
    /// Backend pool the router balances across.
    pub backends: Vec<SocketAddr>,
    /// Strategy used for requests without an existing affinity.
    pub strategy: StrategyKind,
    /// How requests pinned to an unhealthy backend are treated.
    pub affinity_policy: AffinityPolicy,
    /// Interval between health probes of the backend pool.
    pub health_interval: Duration,
    /// Bound on a single backend connect attempt (also the probe timeout).
    pub connect_timeout: Duration,
    /// Bound on waiting for the first complete request from a client.
    pub client_read_timeout: Duration,
    /// Bound on waiting for the routed request's first response.
    pub response_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8888)),
            admin: SocketAddr::from(([127, 0, 0, 1], 9100)),
            backends: vec![SocketAddr::from(([127, 0, 0, 1], 8001))],
            strategy: StrategyKind::RoundRobin,
            affinity_policy: AffinityPolicy::Stale,
            health_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            client_read_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_secs(5),
        }
    }
}

impl RouterConfig {
    /// Load the router configuration from `MEMORIA_*` environment variables.
    ///
    /// `MEMORIA_BACKENDS` is a comma-separated list of socket addresses;
    /// entries that fail to parse are dropped with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let backends = match env::var("MEMORIA_BACKENDS") {
            Ok(raw) => {
                let parsed: Vec<SocketAddr> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .filter_map(|part| match part.parse() {
                        Ok(addr) => Some(addr),
                        Err(err) => {
                            warn!(value = %part, error = %err, "skipping unparsable backend address");
                            None
                        }
                    })
                    .collect();
                if parsed.is_empty() {
                    defaults.backends.clone()
                } else {
                    parsed
                }
            }
            Err(_) => defaults.backends.clone(),
        };

        Self {
            listen: env_parse("MEMORIA_ROUTER_ADDR", defaults.listen),
            admin: env_parse("MEMORIA_ADMIN_ADDR", defaults.admin),
            backends,
            strategy: env_parse("MEMORIA_STRATEGY", defaults.strategy),
            affinity_policy: env_parse("MEMORIA_AFFINITY", defaults.affinity_policy),
            health_interval: env_duration_ms("MEMORIA_HEALTH_MS", defaults.health_interval),
            connect_timeout: env_duration_ms("MEMORIA_CONNECT_TIMEOUT_MS", defaults.connect_timeout),
            client_read_timeout: env_duration_ms(
                "MEMORIA_CLIENT_READ_TIMEOUT_MS",
                defaults.client_read_timeout,
            ),
            response_timeout: env_duration_ms(
                "MEMORIA_RESPONSE_TIMEOUT_MS",
                defaults.response_timeout,
            ),
        }
    }
}

/// Parse an environment variable, keeping `default` when unset or invalid.
fn env_parse<T: FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(err) => {
                warn!(%key, value = %raw, error = %err, "invalid value; using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_duration_ms(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(key, default.as_millis() as u64))
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(key, default.as_secs()))
}
