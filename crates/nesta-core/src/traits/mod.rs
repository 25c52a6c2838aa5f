pub mod credential_store;
pub mod ledger_store;
pub mod location_store;

pub use credential_store::CredentialStore;
pub use ledger_store::LedgerStore;
pub use location_store::LocationStore;
