use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aac_store::{
    api,
    assets::AssetStore,
    autosave::AutosaveCoordinator,
    boards::{ensure_board, seed_if_empty},
    config::{AssetBackend, Config},
    eviction::spawn_eviction_task,
    handles::HandleBroker,
    object_store as obj,
    storage::Database,
    AppState,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "aac-store starting");

    let config = Config::load()?;

    let db = Database::open(&config.server.data_dir)?;
    info!("Database opened at: {}", config.server.data_dir);

    let objects: Arc<dyn obj::ObjectStore> = match config.storage.backend {
        AssetBackend::Local => {
            let store = obj::LocalStore::new(&config.storage.asset_storage_path)?;
            info!(
                "Using local asset backend at: {}",
                config.storage.asset_storage_path
            );
            Arc::new(store)
        }
        AssetBackend::Memory => {
            info!("Using in-memory asset backend");
            Arc::new(obj::MemoryStore::new())
        }
    };

    let mut assets = AssetStore::new(db.clone(), objects);
    if let Some(quota) = config.storage.quota_bytes {
        assets = assets.with_quota(quota);
    }
    info!(
        quota = ?config.storage.quota_bytes,
        budget = config.storage.budget_bytes,
        "Asset store ready"
    );

    let eviction_task = config.eviction_interval().map(|interval| {
        info!(interval_secs = interval.as_secs(), "Starting background eviction");
        spawn_eviction_task(assets.clone(), config.storage.budget_bytes, interval)
    });

    if config.seed_example_board {
        seed_if_empty(&db).await?;
    }

    let autosave =
        AutosaveCoordinator::spawn(Arc::new(db.clone()), config.autosave.to_config());
    let initial = ensure_board(&db).await?;
    info!(board_id = %initial.id, "Opened board");
    autosave.open(Some(initial))?;

    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        handles: HandleBroker::new(assets.clone()),
        assets,
        autosave: autosave.clone(),
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!("Listening on: {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Persist the working copy before stopping
    info!("Flushing pending autosave");
    if let Err(e) = autosave.flush().await {
        tracing::error!(error = %e, "Failed to flush autosave during shutdown");
    }
    autosave.shutdown().await;

    if let Some(handle) = eviction_task {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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

    info!("Shutdown signal received, draining connections");
}
