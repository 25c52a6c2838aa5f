use axum::Router;
use axum::body::Body;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use nesta_core::NestaConfig;
use nesta_core::config::{AuthConfig, BillingConfig, DatabaseConfig, LocationConfig};
use nesta_server::{AppState, build_router};
use nesta_storage_sqlite::{SqliteCredentialStore, SqliteLedgerStore, SqliteLocationStore};

use crate::stores::{TestStores, create_test_stores};

pub const TEST_JWT_SECRET: &str = "test-jwt-secret-at-least-32-chars-long";

pub type TestAppState = AppState<SqliteCredentialStore, SqliteLedgerStore, SqliteLocationStore>;

pub fn create_test_config() -> NestaConfig {
    NestaConfig {
        port: 0,
        env: "development".to_string(),
        database: DatabaseConfig {
            url: String::new(), // not used; stores are pre-connected
            max_connections: 8,
        },
        auth: AuthConfig {
            jwt_secret: TEST_JWT_SECRET.to_string(),
            access_ttl_secs: 15 * 60,
            refresh_ttl_secs: 30 * 24 * 60 * 60,
            otp_ttl_secs: 5 * 60,
            otp_rate_limit_secs: 60,
            otp_max_attempts: 5,
        },
        locations: LocationConfig::default(),
        billing: BillingConfig::default(),
    }
}

pub fn create_test_app_state(stores: &TestStores) -> TestAppState {
    create_test_app_state_with(stores, create_test_config())
}

pub fn create_test_app_state_with(stores: &TestStores, config: NestaConfig) -> TestAppState {
    AppState::new(
        stores.credential_store.clone(),
        stores.ledger_store.clone(),
        stores.location_store.clone(),
        config,
    )
}

pub fn create_test_router(stores: &TestStores) -> Router {
    build_router(create_test_app_state(stores))
}

pub async fn create_test_router_and_stores() -> (Router, TestStores) {
    let stores = create_test_stores().await;
    let router = create_test_router(&stores);
    (router, stores)
}

/// Log in through the code flow and return (access_token, refresh_token).
///
/// Relies on the development config echoing the code back as `dev_code`.
pub async fn login_via_api(router: &Router, phone: &str) -> (String, String) {
    let (status, body) = send_request(
        router,
        "POST",
        "/api/v1/auth/otp/send",
        None,
        Some(json!({"phone": phone})),
    )
    .await;
    assert_eq!(status, 200, "otp/send failed: {body}");
    let code = body["dev_code"].as_str().expect("dev_code").to_string();

    let (status, body) = send_request(
        router,
        "POST",
        "/api/v1/auth/otp/verify",
        None,
        Some(json!({"phone": phone, "code": code})),
    )
    .await;
    assert_eq!(status, 200, "otp/verify failed: {body}");

    let access = body["access_token"].as_str().unwrap().to_string();
    let refresh = body["refresh_token"].as_str().unwrap().to_string();
    (access, refresh)
}

/// Send a request through the router and return (status, body_json).
pub async fn send_request(
    router: &Router,
    method: &str,
    uri: &str,
    auth_token: Option<&str>,
    body: Option<Value>,
) -> (u16, Value) {
    let (status, _, json) = send_request_with_headers(router, method, uri, auth_token, body, &[]).await;
    (status, json)
}

/// Like [`send_request`], with extra request headers, also returning the
/// `x-request-id` response header.
pub async fn send_request_with_headers(
    router: &Router,
    method: &str,
    uri: &str,
    auth_token: Option<&str>,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (u16, Option<String>, Value) {
    let mut builder = axum::http::Request::builder().method(method).uri(uri);

    if let Some(token) = auth_token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let req_body = match body {
        Some(b) => Body::from(serde_json::to_vec(&b).unwrap()),
        None => Body::empty(),
    };

    let req = builder.body(req_body).unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status().as_u16();
    let request_id = resp
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();

    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&bytes).to_string(),
        ))
    };

    (status, request_id, json)
}
