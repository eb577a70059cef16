use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marquee_api::{app, worker, AppState};
use marquee_store::app_config::Config;
use marquee_store::{DbClient, MemoryInventoryStore, PgInventoryStore, StoreBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marquee_api=debug,marquee_engine=info,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Marquee API on port {}", config.server.port);

    let app_state = match config.database.backend {
        StoreBackend::Postgres => {
            let db = DbClient::new(&config.database)
                .await
                .context("Failed to connect to Postgres")?;
            if config.database.run_migrations {
                db.migrate().await.context("Failed to run migrations")?;
            }
            AppState::new(Arc::new(PgInventoryStore::new(db.pool.clone())), config.locking.clone())
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory inventory store, nothing will be persisted");
            AppState::new(Arc::new(MemoryInventoryStore::new()), config.locking.clone())
        }
    };

    // Expiry reclaimer
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reclaimer = worker::start_expiry_worker(app_state.manager.clone(), &config.reclaimer, shutdown_rx);

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = reclaimer {
        handle.await.context("Expiry reclaimer panicked")?;
    }

    tracing::info!("Marquee API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
