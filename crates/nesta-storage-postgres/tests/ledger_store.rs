//! Runs against a live server when `DATABASE_URL` is set; otherwise each test
//! returns early. Rows are keyed by a per-test tag so runs can share one
//! database.

use chrono::{Duration, Utc};
use nesta_core::{
    CreateUserInput, CredentialStore, LedgerStore, NestaError, OneTimeCode, Order, OrderItem,
    OrderStatus, Payment, PaymentKind, PaymentStatus, Product, Role, Settlement,
    SettlementOutcome,
};
use nesta_storage_postgres::{PostgresCredentialStore, PostgresLedgerStore, connect_pool};
use serde_json::json;

struct Fixture {
    ledger: PostgresLedgerStore,
    credentials: PostgresCredentialStore,
    tag: String,
}

impl Fixture {
    fn id(&self, name: &str) -> String {
        format!("{}-{name}", self.tag)
    }
}

async fn setup(test: &str) -> Option<Fixture> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping {test}");
        return None;
    };
    let pool = connect_pool(&url, 8).await.unwrap();
    let tag = format!("{test}-{}", Utc::now().timestamp_micros());

    let credentials = PostgresCredentialStore::new(pool.clone());
    credentials
        .create_user(&CreateUserInput {
            id: format!("{tag}-u"),
            phone: format!("+{tag}"),
            role: Role::User,
        })
        .await
        .unwrap();

    Some(Fixture {
        ledger: PostgresLedgerStore::new(pool),
        credentials,
        tag,
    })
}

async fn seed_product(fx: &Fixture, name: &str, stock: i32) -> String {
    let id = fx.id(name);
    fx.ledger
        .create_product(&Product {
            id: id.clone(),
            title: format!("Product {name}"),
            price_cents: 250,
            stock,
            category: None,
            is_active: true,
        })
        .await
        .unwrap();
    id
}

/// Place a one-line order and its pending payment, returning the settlement
/// a PAID webhook would produce.
async fn order_with_payment(fx: &Fixture, name: &str, product_id: &str, quantity: i32) -> Settlement {
    let order_id = fx.id(name);
    let now = Utc::now();
    fx.ledger
        .create_order(
            &Order {
                id: order_id.clone(),
                user_id: fx.id("u"),
                status: OrderStatus::New,
                address: json!({"street": "Main 1"}),
                comment: None,
                total_cents: i64::from(quantity) * 250,
                created_at: now,
            },
            &[OrderItem {
                id: format!("{order_id}-item"),
                order_id: order_id.clone(),
                product_id: product_id.to_string(),
                quantity,
                price_cents: 250,
            }],
        )
        .await
        .unwrap();

    let payment_id = format!("{order_id}-pay");
    fx.ledger
        .create_payment(&Payment {
            id: payment_id.clone(),
            kind: PaymentKind::Order,
            entity_id: order_id.clone(),
            provider: "stub".to_string(),
            provider_payment_id: Some(format!("pp-{payment_id}")),
            status: PaymentStatus::Init,
            amount_cents: i64::from(quantity) * 250,
            payload: None,
            created_at: now,
        })
        .await
        .unwrap();

    Settlement {
        payment_id,
        kind: PaymentKind::Order,
        entity_id: order_id,
        status: PaymentStatus::Paid,
        payload: json!({"status": "PAID"}),
        settled_at: now,
        period_end: now + Duration::days(30),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_settlements_never_oversell() {
    let Some(fx) = setup("oversell").await else {
        return;
    };
    let product_id = seed_product(&fx, "p1", 2).await;

    let mut settlements = Vec::new();
    for i in 0..5 {
        settlements.push(order_with_payment(&fx, &format!("o{i}"), &product_id, 1).await);
    }

    let tasks: Vec<_> = settlements
        .into_iter()
        .map(|s| {
            let ledger = fx.ledger.clone();
            tokio::spawn(async move { ledger.settle_payment(&s).await })
        })
        .collect();

    let mut applied = 0;
    let mut short = 0;
    for result in futures::future::join_all(tasks).await {
        match result.unwrap() {
            Ok(SettlementOutcome::Applied) => applied += 1,
            Err(NestaError::InsufficientStock { .. }) => short += 1,
            other => panic!("unexpected settlement result: {other:?}"),
        }
    }
    assert_eq!(applied, 2);
    assert_eq!(short, 3);
    assert_eq!(fx.ledger.get_product(&product_id).await.unwrap().unwrap().stock, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_webhooks_apply_once() {
    let Some(fx) = setup("dupes").await else {
        return;
    };
    let product_id = seed_product(&fx, "p1", 10).await;
    let paid = order_with_payment(&fx, "o1", &product_id, 3).await;

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let ledger = fx.ledger.clone();
            let s = paid.clone();
            tokio::spawn(async move { ledger.settle_payment(&s).await })
        })
        .collect();

    let applied = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|o| *o == SettlementOutcome::Applied)
        .count();
    assert_eq!(applied, 1);
    assert_eq!(fx.ledger.get_product(&product_id).await.unwrap().unwrap().stock, 7);

    let order = fx.ledger.get_order(&paid.entity_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    let payment = fx.ledger.get_payment(&paid.payment_id).await.unwrap().unwrap();
    assert_eq!(payment.payload.unwrap()["status"], "PAID");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_share_one_budget() {
    let Some(fx) = setup("claims").await else {
        return;
    };
    let now = Utc::now();
    let code_id = fx.id("code");
    fx.credentials
        .create_code(
            &OneTimeCode {
                id: code_id.clone(),
                phone: format!("+{}", fx.tag),
                code_hash: "hash".to_string(),
                expires_at: now + Duration::minutes(5),
                attempts: 0,
                blocked_until: None,
                created_at: now,
            },
            Duration::seconds(60),
        )
        .await
        .unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let credentials = fx.credentials.clone();
            let code_id = code_id.clone();
            tokio::spawn(async move {
                credentials
                    .claim_attempt(&code_id, 5, now, now + Duration::minutes(5))
                    .await
            })
        })
        .collect();

    let granted = futures::future::join_all(tasks)
        .await
        .into_iter()
        .filter(|r| r.as_ref().unwrap().as_ref().unwrap().is_some())
        .count();
    assert_eq!(granted, 5);
}
