mod cleanup;
mod config;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use liberty_api::{AppStateInner, build_router};
use liberty_db::{Database, MemStorage, Storage};

use crate::config::{Config, MEMORY_DB};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "liberty_server=debug,liberty_api=debug,liberty_db=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn Storage> = if config.db_path == MEMORY_DB {
        warn!("Using in-memory storage; nothing will persist");
        Arc::new(MemStorage::new())
    } else {
        Arc::new(Database::open(Path::new(&config.db_path))?)
    };

    if config.mail.api_key.is_none() {
        warn!("SENDGRID_API_KEY unset, outgoing email is disabled");
    }
    if !config.api.oauth.is_configured() {
        warn!("OAuth client not configured, admin login is unavailable");
    }

    // Background cleanup task (runs every hour)
    tokio::spawn(cleanup::run_cleanup_loop(store.clone(), 3600));

    let state = AppStateInner::new(store, config.api, config.mail)?;
    let app = build_router(state);

    info!("Liberty server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
