use tempfile::TempDir;

use nesta_storage_sqlite::{
    SqliteCredentialStore, SqliteLedgerStore, SqliteLocationStore, connect_pool,
};

pub struct TestStores {
    pub credential_store: SqliteCredentialStore,
    pub ledger_store: SqliteLedgerStore,
    pub location_store: SqliteLocationStore,
    /// Hold the TempDir to keep it alive for the test's duration.
    pub _tempdir: TempDir,
}

/// Create a fresh set of test stores backed by a tempdir.
///
/// All stores share one pool on a file-backed database, so concurrent tests
/// exercise real SQLite locking rather than an in-memory shortcut.
pub async fn create_test_stores() -> TestStores {
    let tempdir = TempDir::new().expect("failed to create tempdir");
    let db_path = tempdir.path().join("test.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

    let pool = connect_pool(&db_url, 8)
        .await
        .expect("failed to connect test database");

    TestStores {
        credential_store: SqliteCredentialStore::new(pool.clone()),
        ledger_store: SqliteLedgerStore::new(pool.clone()),
        location_store: SqliteLocationStore::new(pool),
        _tempdir: tempdir,
    }
}
