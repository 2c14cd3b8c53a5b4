use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use despacho_core::{
    load_config_or_default, validate_config, CredentialVerifier, DirectoryVerifier,
    LifecycleManager, SqliteTicketStore, SqliteUserStore, TicketBroadcaster, TicketStore,
    UserStore,
};
use despacho_server::{create_router, metrics::spawn_event_metrics, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("DESPACHOS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let zone = config.schedule.zone();
    info!("Database path: {:?}", config.database.path);
    info!("Schedule timezone: {:?}", config.schedule.timezone);

    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }
    }

    // Users first: the ticket table references them
    let user_store = Arc::new(
        SqliteUserStore::new(&config.database.path).context("Failed to create user store")?,
    );
    let seeded = user_store
        .seed_defaults(&config.auth.seed_password)
        .context("Failed to seed default users")?;
    if seeded > 0 {
        info!("Seeded {} default user accounts", seeded);
    }

    let ticket_store: Arc<dyn TicketStore> = Arc::new(
        SqliteTicketStore::new(&config.database.path).context("Failed to create ticket store")?,
    );
    info!("Ticket store initialized");

    if config.auth.fallback_password.is_some() {
        warn!("Fallback password is enabled: any active user can log in with it");
    }
    let verifier: Arc<dyn CredentialVerifier> = Arc::new(DirectoryVerifier::new(
        user_store.clone(),
        &config.auth,
    ));
    info!("Using credential verifier: {}", verifier.method_name());

    let broadcaster = TicketBroadcaster::new(config.realtime.channel_capacity);
    let lifecycle = Arc::new(LifecycleManager::new(
        ticket_store,
        user_store.clone(),
        Arc::new(broadcaster.clone()),
        zone,
    ));
    let _event_metrics = spawn_event_metrics(Arc::clone(&lifecycle), &broadcaster);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let users: Arc<dyn UserStore> = user_store;
    let state = Arc::new(AppState::new(config, lifecycle, users, verifier, broadcaster));
    let app = create_router(state);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
