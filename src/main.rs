//! Memoria game server binary entrypoint wiring the session registry, the
//! idle-room sweep, and the TCP accept loop.

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memoria_back::{
    config::ServerConfig,
    services::{connection::handle_connection, registry::GameRegistry},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServerConfig::from_env();
    let registry = GameRegistry::new(config.clone());
    let sweep = registry.clone().spawn_idle_sweep();

    let listener = TcpListener::bind(config.listen)
        .await
        .context("binding game server")?;
    info!(addr = %config.listen, pairs = config.pairs, "memory game server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(registry.clone(), stream, peer));
                }
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                }
            },
            _ = shutdown_signal() => break,
        }
    }

    info!(rooms = registry.room_count(), "server shutting down");
    sweep.abort();
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

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
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
