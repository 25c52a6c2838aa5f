use chrono::{Duration, Utc};
use nesta_core::{
    CreateUserInput, CredentialStore, NestaError, OneTimeCode, ProfileUpdate, RefreshTokenRecord,
    Role,
};
use nesta_storage_sqlite::{SqliteCredentialStore, connect_pool};
use serde_json::json;
use tempfile::TempDir;

async fn setup() -> (SqliteCredentialStore, TempDir) {
    let tempdir = TempDir::new().unwrap();
    let db_path = tempdir.path().join("test.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = connect_pool(&db_url, 5).await.unwrap();
    (SqliteCredentialStore::new(pool), tempdir)
}

fn user_input(id: &str, phone: &str) -> CreateUserInput {
    CreateUserInput {
        id: id.to_string(),
        phone: phone.to_string(),
        role: Role::User,
    }
}

fn code(id: &str, phone: &str, created_ago_secs: i64) -> OneTimeCode {
    let created_at = Utc::now() - Duration::seconds(created_ago_secs);
    OneTimeCode {
        id: id.to_string(),
        phone: phone.to_string(),
        code_hash: format!("hash-{id}"),
        expires_at: created_at + Duration::minutes(5),
        attempts: 0,
        blocked_until: None,
        created_at,
    }
}

// ── Users ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_user() {
    let (store, _dir) = setup().await;
    let user = store.create_user(&user_input("u1", "+15550001")).await.unwrap();
    assert_eq!(user.id, "u1");
    assert_eq!(user.role, Role::User);
    assert!(user.name.is_none());

    let by_id = store.get_user_by_id("u1").await.unwrap().unwrap();
    assert_eq!(by_id.phone, "+15550001");
    let by_phone = store.get_user_by_phone("+15550001").await.unwrap().unwrap();
    assert_eq!(by_phone.id, "u1");
}

#[tokio::test]
async fn create_user_with_taken_phone_returns_existing() {
    let (store, _dir) = setup().await;
    store.create_user(&user_input("u1", "+15550002")).await.unwrap();
    let again = store.create_user(&user_input("u2", "+15550002")).await.unwrap();
    assert_eq!(again.id, "u1");
    assert!(store.get_user_by_id("u2").await.unwrap().is_none());
}

#[tokio::test]
async fn profile_update_overwrites_only_given_fields() {
    let (store, _dir) = setup().await;
    store.create_user(&user_input("u1", "+15550007")).await.unwrap();

    let updated = store
        .update_profile(
            "u1",
            &ProfileUpdate {
                name: Some("Ada".to_string()),
                email: Some("ada@example.com".to_string()),
                default_address: Some(json!({"street": "Elm 5"})),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name.as_deref(), Some("Ada"));
    assert_eq!(updated.default_address, Some(json!({"street": "Elm 5"})));

    let renamed = store
        .update_profile(
            "u1",
            &ProfileUpdate {
                name: Some("Ada L.".to_string()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name.as_deref(), Some("Ada L."));
    assert_eq!(renamed.email.as_deref(), Some("ada@example.com"));
    assert_eq!(renamed.default_address, Some(json!({"street": "Elm 5"})));

    assert!(matches!(
        store.update_profile("ghost", &ProfileUpdate::default()).await,
        Err(NestaError::NotFound(_))
    ));
}

#[tokio::test]
async fn ping_reaches_database() {
    let (store, _dir) = setup().await;
    store.ping().await.unwrap();
}

#[tokio::test]
async fn missing_user_is_none() {
    let (store, _dir) = setup().await;
    assert!(store.get_user_by_id("nope").await.unwrap().is_none());
    assert!(store.get_user_by_phone("+10000000").await.unwrap().is_none());
}

// ── One-time codes ──────────────────────────────────────────────────────

#[tokio::test]
async fn latest_code_picks_newest_row() {
    let (store, _dir) = setup().await;
    store.create_code(&code("c-old", "+15550003", 120), Duration::zero()).await.unwrap();
    store.create_code(&code("c-new", "+15550003", 0), Duration::zero()).await.unwrap();
    store.create_code(&code("c-other", "+15559999", 0), Duration::zero()).await.unwrap();

    let latest = store.latest_code("+15550003").await.unwrap().unwrap();
    assert_eq!(latest.id, "c-new");
    assert_eq!(latest.code_hash, "hash-c-new");
    assert!(store.latest_code("+10000000").await.unwrap().is_none());
}

#[tokio::test]
async fn create_code_enforces_interval() {
    let (store, _dir) = setup().await;
    let minute = Duration::seconds(60);
    store.create_code(&code("c1", "+15550008", 90), minute).await.unwrap();
    store.create_code(&code("c2", "+15550008", 10), minute).await.unwrap();

    assert!(matches!(
        store.create_code(&code("c3", "+15550008", 0), minute).await,
        Err(NestaError::RateLimited { .. })
    ));
    assert_eq!(store.latest_code("+15550008").await.unwrap().unwrap().id, "c2");
}

#[tokio::test]
async fn create_code_refuses_blocked_phone() {
    let (store, _dir) = setup().await;
    store.create_code(&code("c1", "+15550009", 0), Duration::zero()).await.unwrap();
    let now = Utc::now();
    store
        .claim_attempt("c1", 1, now, now + Duration::minutes(5))
        .await
        .unwrap();

    assert!(matches!(
        store.create_code(&code("c2", "+15550009", 0), Duration::zero()).await,
        Err(NestaError::Blocked { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_create_code_admits_one() {
    let (store, _dir) = setup().await;

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .create_code(&code(&format!("c{i}"), "+15550010", 0), Duration::seconds(60))
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for result in futures::future::join_all(tasks).await {
        match result.unwrap() {
            Ok(()) => created += 1,
            Err(NestaError::RateLimited { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test]
async fn claims_stop_at_max_attempts() {
    let (store, _dir) = setup().await;
    store.create_code(&code("c1", "+15550004", 0), Duration::zero()).await.unwrap();
    let now = Utc::now();
    let until = now + Duration::minutes(5);

    for expected in 1..3 {
        let attempts = store.claim_attempt("c1", 3, now, until).await.unwrap();
        assert_eq!(attempts, Some(expected));
        let row = store.latest_code("+15550004").await.unwrap().unwrap();
        assert!(row.blocked_until.is_none());
    }

    assert_eq!(store.claim_attempt("c1", 3, now, until).await.unwrap(), Some(3));
    let row = store.latest_code("+15550004").await.unwrap().unwrap();
    assert!(row.blocked_at(now).is_some());

    assert_eq!(store.claim_attempt("c1", 3, now, until).await.unwrap(), None);
    let row = store.latest_code("+15550004").await.unwrap().unwrap();
    assert_eq!(row.attempts, 3);
}

#[tokio::test]
async fn released_attempt_lifts_block() {
    let (store, _dir) = setup().await;
    store.create_code(&code("c1", "+15550011", 0), Duration::zero()).await.unwrap();
    let now = Utc::now();
    let until = now + Duration::minutes(5);

    store.claim_attempt("c1", 2, now, until).await.unwrap();
    store.claim_attempt("c1", 2, now, until).await.unwrap();
    store.release_attempt("c1").await.unwrap();

    let row = store.latest_code("+15550011").await.unwrap().unwrap();
    assert_eq!(row.attempts, 1);
    assert!(row.blocked_until.is_none());
    assert_eq!(store.claim_attempt("c1", 2, now, until).await.unwrap(), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_share_one_budget() {
    let (store, _dir) = setup().await;
    store.create_code(&code("c1", "+15550005", 0), Duration::zero()).await.unwrap();
    let now = Utc::now();
    let until = now + Duration::minutes(5);

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.claim_attempt("c1", 5, now, until).await })
        })
        .collect();

    let granted = futures::future::join_all(tasks)
        .await
        .into_iter()
        .filter(|result| result.as_ref().unwrap().as_ref().unwrap().is_some())
        .count();
    assert_eq!(granted, 5);

    let row = store.latest_code("+15550005").await.unwrap().unwrap();
    assert_eq!(row.attempts, 5);
}

#[tokio::test]
async fn claim_on_missing_code_is_not_found() {
    let (store, _dir) = setup().await;
    let now = Utc::now();
    let err = store.claim_attempt("nope", 5, now, now).await.unwrap_err();
    assert!(matches!(err, NestaError::NotFound(_)));
}

// ── Refresh tokens ──────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_token_lifecycle() {
    let (store, _dir) = setup().await;
    store.create_user(&user_input("u1", "+15550006")).await.unwrap();
    let record = RefreshTokenRecord {
        id: "rt1".to_string(),
        user_id: "u1".to_string(),
        token: "token-value".to_string(),
        expires_at: Utc::now() + Duration::days(30),
        revoked_at: None,
    };
    store.create_refresh_token(&record).await.unwrap();

    let fetched = store.get_refresh_token("token-value").await.unwrap().unwrap();
    assert_eq!(fetched.user_id, "u1");
    assert!(fetched.revoked_at.is_none());

    assert_eq!(store.revoke_refresh_token("token-value", Utc::now()).await.unwrap(), 1);
    assert_eq!(store.revoke_refresh_token("token-value", Utc::now()).await.unwrap(), 0);
    assert_eq!(store.revoke_refresh_token("unknown", Utc::now()).await.unwrap(), 0);

    let revoked = store.get_refresh_token("token-value").await.unwrap().unwrap();
    assert!(revoked.revoked_at.is_some());
}

#[tokio::test]
async fn refresh_token_requires_existing_user() {
    let (store, _dir) = setup().await;
    let record = RefreshTokenRecord {
        id: "rt1".to_string(),
        user_id: "ghost".to_string(),
        token: "t".to_string(),
        expires_at: Utc::now(),
        revoked_at: None,
    };
    assert!(store.create_refresh_token(&record).await.is_err());
}
