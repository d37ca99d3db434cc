use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playerstats::{
    api::{self, AppState},
    open_backend, spawn_host, DatabaseOptions, NoticeBus, StatisticRegistry, StorageConfig,
    UserDatabase, UserManager,
};

const DEFAULT_BIND: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "playerstats=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Player statistics server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting player statistics server");

    let config = StorageConfig::from_env()?;
    let registry = Arc::new(StatisticRegistry::with_builtins());
    let notices = NoticeBus::new();

    let backend = open_backend(&config, Arc::clone(&registry), &notices).await?;
    let (database, completions) = UserDatabase::start(
        backend,
        registry,
        DatabaseOptions::from_config(&config),
        notices,
    );
    let (host, host_task) = spawn_host(UserManager::new(database.clone(), completions));

    let app = api::router(AppState::new(database.clone(), host.clone()));

    let bind = std::env::var("PLAYERSTATS_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Server running on http://{bind}");

    let ready = database.clone();
    tokio::spawn(async move {
        if ready.ready().await {
            info!(backend = ready.backend_kind(), "Persistence ready");
        } else {
            warn!("Running without persistence for this session");
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, flushing player statistics");
    host.shutdown().await?;
    host_task.await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
