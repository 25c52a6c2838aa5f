pub mod convert;
pub mod credential;
pub mod ledger;
pub mod location;

use std::str::FromStr;
use std::time::Duration;

use nesta_core::{NestaError, NestaResult};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub use credential::SqliteCredentialStore;
pub use ledger::SqliteLedgerStore;
pub use location::SqliteLocationStore;

/// Open a pool on `url` and bring the schema up to date.
///
/// WAL mode lets readers proceed while a writer holds the database lock;
/// writers queue on the busy timeout.
pub async fn connect_pool(url: &str, max_connections: u32) -> NestaResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| NestaError::Storage(e.to_string()))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(|e| NestaError::Storage(e.to_string()))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| NestaError::Storage(e.to_string()))?;

    tracing::debug!(url, "sqlite pool ready");
    Ok(pool)
}
