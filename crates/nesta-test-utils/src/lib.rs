pub mod assertions;
pub mod fixtures;
pub mod server;
pub mod stores;

pub use assertions::{assert_api_error, assert_api_ok};
pub use fixtures::{
    access_token_for, principal_for, seed_location, seed_plan, seed_product, seed_user,
};
pub use server::{
    TEST_JWT_SECRET, TestAppState, create_test_app_state, create_test_app_state_with,
    create_test_config, create_test_router, create_test_router_and_stores, login_via_api,
    send_request, send_request_with_headers,
};
pub use stores::{TestStores, create_test_stores};

#[cfg(test)]
mod tests {
    use super::*;
    use nesta_core::{LedgerStore, Role};

    #[tokio::test]
    async fn test_stores_are_usable() {
        let stores = create_test_stores().await;
        assert!(stores.ledger_store.get_product("nope").await.unwrap().is_none());

        let user = seed_user(&stores, "+15550000", Role::Admin).await;
        assert!(principal_for(&user).is_admin());
    }
}
