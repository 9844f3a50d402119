//! Read-only HTTP admin surface for the router.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use tower_http::trace::TraceLayer;

use super::proxy::{RequestRouter, RouterStats};

/// Build the admin router. Exposes pool and affinity statistics only;
/// nothing here mutates router state.
pub fn admin_router(router: Arc<RequestRouter>) -> Router {
    Router::new()
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

async fn stats(State(router): State<Arc<RequestRouter>>) -> Json<RouterStats> {
    Json(router.stats())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::config::RouterConfig;

    #[tokio::test]
    async fn stats_reflect_the_pool() {
        let backends: Vec<SocketAddr> = (1..=2)
            .map(|port| SocketAddr::from(([127, 0, 0, 1], port)))
            .collect();
        let router = RequestRouter::new(RouterConfig {
            backends,
            ..RouterConfig::default()
        });
        router.affinity().record_room("ROOM01", router.pool().all()[0].addr());

        let Json(stats) = stats(State(Arc::clone(&router))).await;
        assert_eq!(stats.strategy, "round_robin");
        assert_eq!(stats.pinned_rooms, 1);
        assert_eq!(stats.pool.pool_size, 2);

        // Route table builds without panicking.
        let _app = admin_router(router);
    }
}
