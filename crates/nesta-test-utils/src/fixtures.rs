//! Seed data for service and HTTP tests.

use chrono::Utc;
use nesta_core::{
    CreateUserInput, CredentialStore, LedgerStore, Location, LocationStatus, LocationStore, Plan,
    Principal, Product, Role, User,
};
use nesta_crypto::{Claims, issue_token, new_id};

use crate::server::TEST_JWT_SECRET;
use crate::stores::TestStores;

pub async fn seed_user(stores: &TestStores, phone: &str, role: Role) -> User {
    stores
        .credential_store
        .create_user(&CreateUserInput {
            id: new_id(),
            phone: phone.to_string(),
            role,
        })
        .await
        .expect("seed user")
}

pub async fn seed_product(stores: &TestStores, id: &str, price_cents: i64, stock: i32) -> Product {
    let product = Product {
        id: id.to_string(),
        title: format!("Product {id}"),
        price_cents,
        stock,
        category: None,
        is_active: true,
    };
    stores
        .ledger_store
        .create_product(&product)
        .await
        .expect("seed product");
    product
}

pub async fn seed_plan(stores: &TestStores, id: &str, price_cents: i64, is_active: bool) -> Plan {
    let plan = Plan {
        id: id.to_string(),
        name: format!("Plan {id}"),
        price_cents,
        is_active,
    };
    stores
        .ledger_store
        .create_plan(&plan)
        .await
        .expect("seed plan");
    plan
}

pub async fn seed_location(
    stores: &TestStores,
    id: &str,
    status: LocationStatus,
    threshold_n: i32,
) -> Location {
    let location = Location {
        id: id.to_string(),
        name: format!("Complex {id}"),
        city: "Springfield".to_string(),
        status,
        threshold_n,
        current_requests: 0,
    };
    stores
        .location_store
        .create_location(&location)
        .await
        .expect("seed location");
    location
}

pub fn principal_for(user: &User) -> Principal {
    Principal {
        user_id: user.id.clone(),
        role: user.role,
    }
}

/// Mint an access token for `user` directly, bypassing the code flow.
pub fn access_token_for(user: &User) -> String {
    let now = Utc::now();
    let claims = Claims::new(
        &user.id,
        user.role,
        now,
        now + chrono::Duration::minutes(15),
        &new_id(),
    );
    issue_token(&claims, TEST_JWT_SECRET).expect("issue test token")
}
