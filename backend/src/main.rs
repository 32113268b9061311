use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetlink_backend::{
    api::AppState, config::Config, create_router, db::Database, presence::LivenessBridge,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fleetlink Backend");

    let config = Config::load()?;
    tracing::info!("Configuration loaded");

    let db = Database::new(&config.database_url).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let shutdown = CancellationToken::new();
    let state = AppState::new(db, config.clone())?.with_shutdown(shutdown.clone());

    state
        .auth
        .ensure_default_user(
            &config.admin_username,
            &config.admin_password,
            state.provisioner.as_ref(),
        )
        .await?;

    let bridge = LivenessBridge::new(
        Arc::clone(&state.liveness),
        state.status.clone(),
        shutdown.clone(),
    )
    .spawn();

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    bridge.await?;
    tracing::info!("Fleetlink Backend stopped");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown requested");
    shutdown.cancel();
}
