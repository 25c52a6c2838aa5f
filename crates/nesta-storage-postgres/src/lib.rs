pub mod credential;
pub mod ledger;
pub mod location;

use std::str::FromStr;

use nesta_core::{NestaError, NestaResult};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use credential::PostgresCredentialStore;
pub use ledger::PostgresLedgerStore;
pub use location::PostgresLocationStore;

/// Open a pool on `url` and bring the schema up to date.
pub async fn connect_pool(url: &str, max_connections: u32) -> NestaResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(|e| NestaError::Storage(e.to_string()))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| NestaError::Storage(e.to_string()))?;

    tracing::debug!("postgres pool ready");
    Ok(pool)
}

pub(crate) fn storage_err(e: sqlx::Error) -> NestaError {
    NestaError::Storage(e.to_string())
}

pub(crate) fn insert_err(e: sqlx::Error, what: &str) -> NestaError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            NestaError::Validation(format!("{what} already exists"))
        }
        _ => storage_err(e),
    }
}

pub(crate) fn parse_column<T>(s: &str) -> Result<T, NestaError>
where
    T: FromStr<Err = NestaError>,
{
    s.parse()
        .map_err(|e: NestaError| NestaError::Storage(e.to_string()))
}
