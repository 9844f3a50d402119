//! Request routing core: classify the first request line, pick a backend,
//! forward, then splice the two sockets together for the session.
//!
//! Affinity is learned passively. The first line of every connection is read
//! and inspected for a room or player identifier; the first successful
//! response travelling back is inspected the same way, so a freshly created
//! room is pinned to whichever backend actually created it.

use std::{net::SocketAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::{io::AsyncWriteExt, net::TcpStream, time};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::{
    config::{MAX_LINE_LEN, RouterConfig},
    error::ProxyError,
};

use super::{
    affinity::{AffinityPolicy, AffinityTable},
    pool::{Backend, BackendPool},
    strategy::{self, Strategy},
};

/// Reply sent when no backend could take the request.
const UNAVAILABLE_LINE: &str = r#"{"success":false,"message":"Service unavailable"}"#;

/// Affinity hints extracted from one request line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RequestProfile {
    /// Room code carried by the request, if any.
    pub room_id: Option<String>,
    /// Player identifier carried by the request, if any.
    pub player_id: Option<String>,
}

impl RequestProfile {
    /// Pull the affinity hints out of a raw request line. Lines that are not
    /// JSON yield an empty profile and are still forwarded; the backend owns
    /// the rejection.
    pub fn from_line(line: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return Self::default();
        };
        Self {
            room_id: value
                .get("room_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            player_id: value
                .get("player_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Shared router state: the pool, the affinity tables, and the strategy.
pub struct RequestRouter {
    config: RouterConfig,
    pool: Arc<BackendPool>,
    affinity: AffinityTable,
    strategy: Arc<dyn Strategy>,
}

impl RequestRouter {
    /// Build the router from its configuration.
    pub fn new(config: RouterConfig) -> Arc<Self> {
        let pool = Arc::new(BackendPool::new(&config.backends));
        let strategy = strategy::build(config.strategy);
        info!(
            backends = pool.len(),
            strategy = strategy.name(),
            policy = ?config.affinity_policy,
            "request router ready"
        );
        Arc::new(Self {
            config,
            pool,
            affinity: AffinityTable::new(),
            strategy,
        })
    }

    /// Router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The backend pool, shared with the health checker.
    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// The affinity tables.
    pub fn affinity(&self) -> &AffinityTable {
        &self.affinity
    }

    /// Admin-facing summary of the router.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            strategy: self.strategy.name(),
            pinned_rooms: self.affinity.room_count(),
            pool: self.pool.stats(),
        }
    }

    /// Drop a backend from the pool and purge every room pinned to it.
    pub fn remove_backend(&self, addr: SocketAddr) -> bool {
        let removed = self.pool.remove(addr).is_some();
        if removed {
            let purged = self.affinity.purge_backend(addr);
            info!(backend = %addr, purged, "backend removed from pool");
        }
        removed
    }

    /// Drive one client connection: read the first request, route it, then
    /// splice the sockets until either side closes.
    pub async fn handle_client(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let mut client = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));

        let first = match time::timeout(self.config.client_read_timeout, client.next()).await {
            Ok(Some(Ok(line))) => line,
            Ok(Some(Err(err))) => {
                warn!(%peer, error = %err, "client framing error before first request");
                return;
            }
            Ok(None) => {
                debug!(%peer, "client closed without sending a request");
                return;
            }
            Err(_) => {
                debug!(%peer, "client sent no request within the read window");
                return;
            }
        };

        let profile = RequestProfile::from_line(&first);
        let candidates = match self.candidates(&profile) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(%peer, error = %err, "cannot route request");
                respond_unavailable(&mut client).await;
                return;
            }
        };

        let attempted = candidates.len();
        for backend in candidates {
            match self.forward(&backend, &first).await {
                Ok((upstream, response)) => {
                    self.observe_response(backend.addr(), &response);
                    if client.send(&response).await.is_err() {
                        return;
                    }
                    let _guard = backend.track_connection();
                    info!(%peer, backend = %backend.addr(), "client spliced to backend");
                    splice(client, upstream, peer).await;
                    return;
                }
                Err(err) => {
                    warn!(%peer, backend = %backend.addr(), error = %err, "backend attempt failed");
                    if matches!(err, ProxyError::Unreachable { .. }) && backend.set_healthy(false)
                    {
                        warn!(backend = %backend.addr(), "backend became unhealthy");
                    }
                }
            }
        }

        warn!(%peer, attempted, "all candidate backends failed");
        respond_unavailable(&mut client).await;
    }

    /// Order the backends to try: the pinned backend first when the affinity
    /// policy allows it, then the strategy's pick over the healthy remainder,
    /// then the rest of the healthy pool as failover fallbacks.
    fn candidates(&self, profile: &RequestProfile) -> Result<Vec<Arc<Backend>>, ProxyError> {
        if self.pool.is_empty() {
            return Err(ProxyError::NoBackends);
        }

        let pinned = self
            .affinity
            .resolve(profile.room_id.as_deref(), profile.player_id.as_deref())
            .and_then(|addr| self.pool.get(addr))
            .filter(|backend| {
                backend.is_healthy() || self.config.affinity_policy == AffinityPolicy::Stale
            });

        let mut ordered: Vec<Arc<Backend>> = Vec::new();
        if let Some(pinned) = pinned {
            ordered.push(pinned);
        }

        let remaining: Vec<Arc<Backend>> = self
            .pool
            .healthy()
            .into_iter()
            .filter(|backend| ordered.iter().all(|seen| seen.addr() != backend.addr()))
            .collect();
        if let Some(pick) = self.strategy.pick(&remaining) {
            ordered.push(pick);
        }
        for backend in remaining {
            if ordered.iter().all(|seen| seen.addr() != backend.addr()) {
                ordered.push(backend);
            }
        }

        if ordered.is_empty() {
            return Err(ProxyError::Exhausted { attempted: 0 });
        }
        Ok(ordered)
    }

    /// Connect to one backend, relay the request line, and wait for the
    /// first response line.
    async fn forward(
        &self,
        backend: &Arc<Backend>,
        line: &str,
    ) -> Result<(Framed<TcpStream, LinesCodec>, String), ProxyError> {
        let addr = backend.addr();
        let stream = match time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return Err(ProxyError::Unreachable {
                    addr,
                    source: Some(err),
                });
            }
            Err(_) => return Err(ProxyError::Unreachable { addr, source: None }),
        };

        let mut upstream = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
        upstream
            .send(line)
            .await
            .map_err(|source| ProxyError::Relay { addr, source })?;

        match time::timeout(self.config.response_timeout, upstream.next()).await {
            Ok(Some(Ok(response))) => Ok((upstream, response)),
            Ok(Some(Err(source))) => Err(ProxyError::Relay { addr, source }),
            Ok(None) => Err(ProxyError::ClosedEarly { addr }),
            Err(_) => Err(ProxyError::ResponseTimeout { addr }),
        }
    }

    /// Learn affinity from a successful response carrying room identifiers.
    fn observe_response(&self, addr: SocketAddr, line: &str) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return;
        };
        if value.get("success").and_then(Value::as_bool) != Some(true) {
            return;
        }
        let Some(room) = value.get("room_id").and_then(Value::as_str) else {
            return;
        };
        if self.affinity.record_room(room, addr) {
            debug!(room, backend = %addr, "recorded room affinity");
        }
        if let Some(player) = value.get("player_id").and_then(Value::as_str) {
            self.affinity.link_player(player, room);
        }
    }
}

/// Admin-facing router summary.
#[derive(Debug, Serialize)]
pub struct RouterStats {
    /// Selection strategy in effect for unpinned requests.
    pub strategy: &'static str,
    /// Number of rooms with a recorded backend pin.
    pub pinned_rooms: usize,
    /// Backend pool detail, flattened into the top-level document.
    #[serde(flatten)]
    pub pool: super::pool::PoolStats,
}

/// Tell the client nothing could take its request. Errors are ignored; the
/// connection is being dropped either way.
async fn respond_unavailable(client: &mut Framed<TcpStream, LinesCodec>) {
    let _ = client.send(UNAVAILABLE_LINE).await;
}

/// Hand the rest of the session over to a raw byte splice, flushing any
/// bytes the line codecs had already buffered past the first exchange.
async fn splice(
    client: Framed<TcpStream, LinesCodec>,
    upstream: Framed<TcpStream, LinesCodec>,
    peer: SocketAddr,
) {
    let client_parts = client.into_parts();
    let upstream_parts = upstream.into_parts();
    let mut client_io = client_parts.io;
    let mut upstream_io = upstream_parts.io;

    if !upstream_parts.read_buf.is_empty() {
        if let Err(err) = client_io.write_all(&upstream_parts.read_buf).await {
            debug!(%peer, error = %err, "client went away during buffered flush");
            return;
        }
    }
    if !client_parts.read_buf.is_empty() {
        if let Err(err) = upstream_io.write_all(&client_parts.read_buf).await {
            debug!(%peer, error = %err, "backend went away during buffered flush");
            return;
        }
    }

    match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
        Ok((to_backend, to_client)) => {
            debug!(%peer, to_backend, to_client, "session finished");
        }
        Err(err) => {
            debug!(%peer, error = %err, "session ended with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;
    use crate::router::strategy::StrategyKind;

    fn test_config(backends: Vec<SocketAddr>) -> RouterConfig {
        RouterConfig {
            backends,
            strategy: StrategyKind::RoundRobin,
            connect_timeout: Duration::from_millis(200),
            client_read_timeout: Duration::from_millis(500),
            response_timeout: Duration::from_millis(500),
            ..RouterConfig::default()
        }
    }

    /// An address nothing listens on.
    async fn dead_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    /// A backend that answers every first line with `reply`, then idles so
    /// the splice has something to hold on to.
    async fn stub_backend(reply: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut framed = Framed::new(stream, LinesCodec::new());
                    if let Some(Ok(_request)) = framed.next().await {
                        let _ = framed.send(reply).await;
                    }
                    time::sleep(Duration::from_millis(200)).await;
                });
            }
        });
        addr
    }

    /// A connected pair of TCP streams plus the client's address as seen by
    /// the accepting side.
    async fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        let (server_side, peer) = accepted.unwrap();
        (server_side, connected.unwrap(), peer)
    }

    #[test]
    fn profile_extracts_room_and_player_hints() {
        let join = RequestProfile::from_line(
            r#"{"action":"join_room","room_id":"ROOM01","player_name":"Bea"}"#,
        );
        assert_eq!(join.room_id.as_deref(), Some("ROOM01"));
        assert_eq!(join.player_id, None);

        let reveal =
            RequestProfile::from_line(r#"{"action":"reveal_card","player_id":"p-1","card_id":3}"#);
        assert_eq!(reveal.player_id.as_deref(), Some("p-1"));

        assert_eq!(RequestProfile::from_line("{not json"), RequestProfile::default());
    }

    #[tokio::test]
    async fn pinned_backend_leads_the_candidate_order() {
        let addrs: Vec<SocketAddr> = (1..=3)
            .map(|port| SocketAddr::from(([127, 0, 0, 1], port)))
            .collect();
        let router = RequestRouter::new(test_config(addrs.clone()));
        router.affinity().record_room("ROOM01", addrs[2]);

        let profile = RequestProfile {
            room_id: Some("ROOM01".into()),
            player_id: None,
        };
        let candidates = router.candidates(&profile).unwrap();
        let order: Vec<_> = candidates.iter().map(|b| b.addr()).collect();
        assert_eq!(order[0], addrs[2]);
        assert_eq!(order.len(), 3);
    }

    #[tokio::test]
    async fn failover_policy_skips_an_unhealthy_pin() {
        let addrs: Vec<SocketAddr> = (1..=2)
            .map(|port| SocketAddr::from(([127, 0, 0, 1], port)))
            .collect();
        let config = RouterConfig {
            affinity_policy: AffinityPolicy::Failover,
            ..test_config(addrs.clone())
        };
        let router = RequestRouter::new(config);
        router.affinity().record_room("ROOM01", addrs[0]);
        router.pool().get(addrs[0]).unwrap().set_healthy(false);

        let profile = RequestProfile {
            room_id: Some("ROOM01".into()),
            player_id: None,
        };
        let candidates = router.candidates(&profile).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].addr(), addrs[1]);
    }

    #[tokio::test]
    async fn stale_policy_still_leads_with_the_unhealthy_pin() {
        let addrs: Vec<SocketAddr> = (1..=2)
            .map(|port| SocketAddr::from(([127, 0, 0, 1], port)))
            .collect();
        let router = RequestRouter::new(test_config(addrs.clone()));
        router.affinity().record_room("ROOM01", addrs[0]);
        router.pool().get(addrs[0]).unwrap().set_healthy(false);

        let profile = RequestProfile {
            room_id: Some("ROOM01".into()),
            player_id: None,
        };
        let candidates = router.candidates(&profile).unwrap();
        assert_eq!(candidates[0].addr(), addrs[0]);
    }

    #[tokio::test]
    async fn failover_routes_past_a_dead_backend_and_records_affinity() {
        let dead = dead_addr().await;
        let live = stub_backend(
            r#"{"success":true,"room_id":"ROOM42","player_id":"p-9","game_state":{}}"#,
        )
        .await;
        let router = RequestRouter::new(test_config(vec![dead, live]));

        let (server_side, client_side, peer) = socket_pair().await;
        tokio::spawn(Arc::clone(&router).handle_client(server_side, peer));

        let mut client = Framed::new(client_side, LinesCodec::new());
        client
            .send(r#"{"action":"create_room","player_name":"Ada"}"#)
            .await
            .unwrap();
        let response = client.next().await.unwrap().unwrap();

        assert!(response.contains("ROOM42"));
        assert_eq!(router.affinity().backend_for_room("ROOM42"), Some(live));
        assert!(!router.pool().get(dead).unwrap().is_healthy());
    }

    #[tokio::test]
    async fn all_backends_down_yields_service_unavailable() {
        let dead_one = dead_addr().await;
        let dead_two = dead_addr().await;
        let router = RequestRouter::new(test_config(vec![dead_one, dead_two]));

        let (server_side, client_side, peer) = socket_pair().await;
        tokio::spawn(Arc::clone(&router).handle_client(server_side, peer));

        let mut client = Framed::new(client_side, LinesCodec::new());
        client.send(r#"{"action":"create_room"}"#).await.unwrap();
        let response = client.next().await.unwrap().unwrap();
        assert_eq!(response, UNAVAILABLE_LINE);
    }

    #[tokio::test]
    async fn removing_a_backend_purges_its_rooms() {
        let addrs: Vec<SocketAddr> = (1..=2)
            .map(|port| SocketAddr::from(([127, 0, 0, 1], port)))
            .collect();
        let router = RequestRouter::new(test_config(addrs.clone()));
        router.affinity().record_room("ROOM01", addrs[0]);
        router.affinity().record_room("ROOM02", addrs[1]);

        assert!(router.remove_backend(addrs[0]));
        assert!(!router.remove_backend(addrs[0]));
        assert_eq!(router.pool().len(), 1);
        assert_eq!(router.affinity().backend_for_room("ROOM01"), None);
        assert_eq!(
            router.affinity().backend_for_room("ROOM02"),
            Some(addrs[1])
        );
    }
}
