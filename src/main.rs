use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use watchlist_api::{
    config::{Config, StorageBackend},
    db::{create_pool, create_redis_client, Cache, Database, MemoryDatabase, PgDatabase},
    routes::{create_router, AppState},
};

/// Resolves on SIGINT, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

async fn connect_database(config: &Config) -> anyhow::Result<Arc<dyn Database>> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let pool = create_pool(&config.database_url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            let db = PgDatabase::new(pool);
            db.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Connected to PostgreSQL, migrations applied");
            Ok(Arc::new(db))
        }
        StorageBackend::Memory => {
            let db = MemoryDatabase::new();
            if let Some(token) = &config.bootstrap_admin_token {
                db.create_user_with_token("admin", "admin@localhost", true, token)
                    .await;
                tracing::info!("Seeded staff account 'admin'");
            }
            tracing::warn!("Using in-memory storage; data is lost on exit");
            Ok(Arc::new(db))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "watchlist_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let db = connect_database(&config).await?;

    let (cache, cache_handle) = match &config.redis_url {
        Some(url) => {
            let client = create_redis_client(url)?;
            let (cache, handle) = Cache::new(client).await;
            tracing::info!("Movie list caching enabled");
            (Some(cache), Some(handle))
        }
        None => {
            tracing::info!("REDIS_URL not set, movie list caching disabled");
            (None, None)
        }
    };

    let address = config.bind_address();
    let app = create_router(AppState::new(db, cache, config));

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    tracing::info!(%address, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some(handle) = cache_handle {
        handle.shutdown().await;
    }

    tracing::info!("Server stopped");
    Ok(())
}
