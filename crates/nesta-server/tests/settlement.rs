use nesta_core::{
    LedgerStore, LocationStatus, NestaError, OrderStatus, PaymentKind, PaymentStatus, Role,
    SettlementOutcome, SubscriptionStatus,
};
use nesta_server::services::{InitPayment, NewOrder, NewSubscription, OrderLine, WebhookEvent};
use nesta_test_utils::{
    TestAppState, TestStores, create_test_app_state, create_test_stores, principal_for,
    seed_location, seed_plan, seed_product, seed_user,
};
use serde_json::json;

async fn order_for(state: &TestAppState, stores: &TestStores, phone: &str, lines: &[(&str, i32)]) -> String {
    let user = seed_user(stores, phone, Role::User).await;
    let placed = state
        .orders()
        .create_order(
            &principal_for(&user),
            NewOrder {
                address: json!({"street": "Main 1"}),
                comment: None,
                items: lines
                    .iter()
                    .map(|(product_id, quantity)| OrderLine {
                        product_id: product_id.to_string(),
                        quantity: *quantity,
                    })
                    .collect(),
            },
        )
        .await
        .unwrap();

    state
        .settlements()
        .init_payment(
            &principal_for(&user),
            InitPayment {
                kind: PaymentKind::Order,
                entity_id: placed.order.id.clone(),
                provider: "stub".to_string(),
                provider_payment_id: Some(format!("pp-{}", placed.order.id)),
                amount_cents: placed.order.total_cents,
            },
        )
        .await
        .unwrap();
    placed.order.id
}

fn paid(order_id: &str) -> WebhookEvent {
    WebhookEvent {
        provider: "stub".to_string(),
        provider_payment_id: format!("pp-{order_id}"),
        status: PaymentStatus::Paid,
        payload: json!({"event": "payment.succeeded"}),
    }
}

// ── Payment init ────────────────────────────────────────────────────────

#[tokio::test]
async fn init_payment_starts_in_init() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_product(&stores, "p1", 300, 5).await;
    let order_id = order_for(&state, &stores, "+15550100", &[("p1", 1)]).await;

    let payment = stores
        .ledger_store
        .get_payment_by_provider_id("stub", &format!("pp-{order_id}"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Init);
    assert_eq!(payment.amount_cents, 300);

    // Nothing happened to the order.
    let order = stores.ledger_store.get_order(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::New);
}

#[tokio::test]
async fn init_payment_checks_entity_and_owner() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_product(&stores, "p1", 300, 5).await;
    let order_id = order_for(&state, &stores, "+15550110", &[("p1", 1)]).await;
    let stranger = principal_for(&seed_user(&stores, "+15550111", Role::User).await);
    let admin = principal_for(&seed_user(&stores, "+15550112", Role::Admin).await);

    let input = |entity_id: &str, amount_cents: i64| InitPayment {
        kind: PaymentKind::Order,
        entity_id: entity_id.to_string(),
        provider: "stub".to_string(),
        provider_payment_id: None,
        amount_cents,
    };

    assert!(matches!(
        state.settlements().init_payment(&stranger, input(&order_id, 300)).await,
        Err(NestaError::Forbidden(_))
    ));
    assert!(matches!(
        state.settlements().init_payment(&stranger, input("ghost", 300)).await,
        Err(NestaError::NotFound(_))
    ));
    assert!(matches!(
        state.settlements().init_payment(&admin, input(&order_id, -1)).await,
        Err(NestaError::Validation(_))
    ));
    state
        .settlements()
        .init_payment(&admin, input(&order_id, 300))
        .await
        .unwrap();
}

// ── Webhooks ────────────────────────────────────────────────────────────

#[tokio::test]
async fn paid_webhook_settles_order() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_product(&stores, "p1", 300, 5).await;
    let order_id = order_for(&state, &stores, "+15550120", &[("p1", 2)]).await;

    let outcome = state.settlements().handle_webhook(paid(&order_id)).await.unwrap();
    assert_eq!(outcome, SettlementOutcome::Applied);

    let order = stores.ledger_store.get_order(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(stores.ledger_store.get_product("p1").await.unwrap().unwrap().stock, 3);
}

#[tokio::test]
async fn redelivered_webhook_is_a_noop() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_product(&stores, "p1", 300, 5).await;
    let order_id = order_for(&state, &stores, "+15550130", &[("p1", 2)]).await;

    state.settlements().handle_webhook(paid(&order_id)).await.unwrap();
    let outcome = state.settlements().handle_webhook(paid(&order_id)).await.unwrap();
    assert_eq!(outcome, SettlementOutcome::AlreadyApplied);
    assert_eq!(stores.ledger_store.get_product("p1").await.unwrap().unwrap().stock, 3);
}

#[tokio::test]
async fn unknown_payment_is_not_found() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    assert!(matches!(
        state.settlements().handle_webhook(paid("ghost")).await,
        Err(NestaError::NotFound(_))
    ));
}

#[tokio::test]
async fn insufficient_stock_leaves_payment_untouched() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_product(&stores, "p1", 300, 1).await;
    let order_id = order_for(&state, &stores, "+15550140", &[("p1", 2)]).await;

    assert!(matches!(
        state.settlements().handle_webhook(paid(&order_id)).await,
        Err(NestaError::InsufficientStock { .. })
    ));

    let payment = stores
        .ledger_store
        .get_payment_by_provider_id("stub", &format!("pp-{order_id}"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Init);
    assert_eq!(
        stores.ledger_store.get_order(&order_id).await.unwrap().unwrap().status,
        OrderStatus::New
    );
    assert_eq!(stores.ledger_store.get_product("p1").await.unwrap().unwrap().stock, 1);
}

#[tokio::test]
async fn failed_then_paid_settles_once() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_product(&stores, "p1", 300, 5).await;
    let order_id = order_for(&state, &stores, "+15550150", &[("p1", 1)]).await;

    let mut failed = paid(&order_id);
    failed.status = PaymentStatus::Failed;
    state.settlements().handle_webhook(failed).await.unwrap();
    assert_eq!(stores.ledger_store.get_product("p1").await.unwrap().unwrap().stock, 5);

    state.settlements().handle_webhook(paid(&order_id)).await.unwrap();
    assert_eq!(stores.ledger_store.get_product("p1").await.unwrap().unwrap().stock, 4);
}

#[tokio::test]
async fn unrecognised_status_is_recorded_without_side_effects() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_product(&stores, "p1", 300, 5).await;
    let order_id = order_for(&state, &stores, "+15550155", &[("p1", 2)]).await;

    let mut succeeded = paid(&order_id);
    succeeded.status = PaymentStatus::Other("SUCCEEDED".to_string());
    let outcome = state.settlements().handle_webhook(succeeded.clone()).await.unwrap();
    assert_eq!(outcome, SettlementOutcome::Applied);

    let payment = stores
        .ledger_store
        .get_payment_by_provider_id("stub", &format!("pp-{order_id}"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Other("SUCCEEDED".to_string()));
    assert_eq!(payment.payload.unwrap()["event"], "payment.succeeded");
    assert_eq!(stores.ledger_store.get_product("p1").await.unwrap().unwrap().stock, 5);
    assert_eq!(
        stores.ledger_store.get_order(&order_id).await.unwrap().unwrap().status,
        OrderStatus::New
    );

    assert_eq!(
        state.settlements().handle_webhook(succeeded).await.unwrap(),
        SettlementOutcome::AlreadyApplied
    );
    state.settlements().handle_webhook(paid(&order_id)).await.unwrap();
    assert_eq!(stores.ledger_store.get_product("p1").await.unwrap().unwrap().stock, 3);
}

#[tokio::test]
async fn paid_webhook_activates_subscription() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_location(&stores, "loc1", LocationStatus::Active, 0).await;
    seed_plan(&stores, "weekly", 1000, true).await;
    let user = principal_for(&seed_user(&stores, "+15550160", Role::User).await);

    let created = state
        .subscriptions()
        .create_subscription(
            &user,
            NewSubscription {
                complex_id: "loc1".to_string(),
                plan_id: "weekly".to_string(),
                address: json!({"flat": 4}),
                time_window: None,
                instructions: None,
            },
        )
        .await
        .unwrap();
    let sub_id = created.subscription.id.clone();

    state
        .settlements()
        .init_payment(
            &user,
            InitPayment {
                kind: PaymentKind::Subscription,
                entity_id: sub_id.clone(),
                provider: "stub".to_string(),
                provider_payment_id: Some("pp-sub".to_string()),
                amount_cents: 1000,
            },
        )
        .await
        .unwrap();
    state
        .settlements()
        .handle_webhook(WebhookEvent {
            provider: "stub".to_string(),
            provider_payment_id: "pp-sub".to_string(),
            status: PaymentStatus::Paid,
            payload: json!({}),
        })
        .await
        .unwrap();

    let sub = stores.ledger_store.get_subscription(&sub_id).await.unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
    let start = sub.current_period_start.unwrap();
    let end = sub.current_period_end.unwrap();
    assert_eq!(end - start, chrono::Duration::days(30));
}

// ── Concurrency ─────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_concurrent_webhooks_decrement_once() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_product(&stores, "p1", 300, 10).await;
    let order_id = order_for(&state, &stores, "+15550170", &[("p1", 3)]).await;

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let state = state.clone();
            let event = paid(&order_id);
            tokio::spawn(async move { state.settlements().handle_webhook(event).await })
        })
        .collect();

    let applied = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|o| *o == SettlementOutcome::Applied)
        .count();
    assert_eq!(applied, 1);
    assert_eq!(stores.ledger_store.get_product("p1").await.unwrap().unwrap().stock, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_orders_never_oversell() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_product(&stores, "p1", 300, 2).await;

    let mut order_ids = Vec::new();
    for i in 0..5 {
        order_ids.push(order_for(&state, &stores, &format!("+1555018{i}"), &[("p1", 1)]).await);
    }

    let tasks: Vec<_> = order_ids
        .iter()
        .map(|order_id| {
            let state = state.clone();
            let event = paid(order_id);
            tokio::spawn(async move { state.settlements().handle_webhook(event).await })
        })
        .collect();

    let mut paid_count = 0;
    for result in futures::future::join_all(tasks).await {
        match result.unwrap() {
            Ok(SettlementOutcome::Applied) => paid_count += 1,
            Err(NestaError::InsufficientStock { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!(paid_count, 2);
    assert_eq!(stores.ledger_store.get_product("p1").await.unwrap().unwrap().stock, 0);
}
