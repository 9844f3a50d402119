//! Session-affinity router binary fronting a pool of game backends.

use std::future::IntoFuture;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memoria_back::{
    config::RouterConfig,
    router::{admin::admin_router, health::spawn_health_checks, proxy::RequestRouter},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = RouterConfig::from_env();
    let router = RequestRouter::new(config.clone());

    let health = spawn_health_checks(
        router.pool().clone(),
        config.health_interval,
        config.connect_timeout,
    );

    let admin_listener = TcpListener::bind(config.admin)
        .await
        .context("binding admin endpoint")?;
    info!(addr = %config.admin, "admin endpoint listening");
    let admin = tokio::spawn(axum::serve(admin_listener, admin_router(router.clone())).into_future());

    let listener = TcpListener::bind(config.listen)
        .await
        .context("binding router")?;
    info!(addr = %config.listen, backends = router.pool().len(), "router listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(router.clone().handle_client(stream, peer));
                }
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                }
            },
            _ = shutdown_signal() => break,
        }
    }

    info!("router shutting down");
    health.abort();
    admin.abort();
    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the router down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
