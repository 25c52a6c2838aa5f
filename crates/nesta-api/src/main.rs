use nesta_core::NestaConfig;
use nesta_core::traits::*;
use nesta_server::{AppState, build_router};
use nesta_storage_postgres::{PostgresCredentialStore, PostgresLedgerStore, PostgresLocationStore};
use nesta_storage_sqlite::{SqliteCredentialStore, SqliteLedgerStore, SqliteLocationStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/nesta.toml".to_string());
    let config = NestaConfig::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.is_development() {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    }

    let url = config.database.url.clone();
    let max_connections = config.database.max_connections;

    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let pool = nesta_storage_postgres::connect_pool(&url, max_connections).await?;
        let state = AppState::new(
            PostgresCredentialStore::new(pool.clone()),
            PostgresLedgerStore::new(pool.clone()),
            PostgresLocationStore::new(pool),
            config,
        );
        serve(state).await
    } else {
        // Relative sqlite paths live under data/.
        std::fs::create_dir_all("data")?;
        let pool = nesta_storage_sqlite::connect_pool(&url, max_connections).await?;
        let state = AppState::new(
            SqliteCredentialStore::new(pool.clone()),
            SqliteLedgerStore::new(pool.clone()),
            SqliteLocationStore::new(pool),
            config,
        );
        serve(state).await
    }
}

async fn serve<C, L, G>(state: AppState<C, L, G>) -> anyhow::Result<()>
where
    C: CredentialStore + Clone,
    L: LedgerStore + Clone,
    G: LocationStore + Clone,
{
    let addr = format!("0.0.0.0:{}", state.config.port);
    let env = state.config.env.clone();
    let router = build_router(state);

    tracing::info!(%addr, %env, "nesta-api starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("nesta-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
