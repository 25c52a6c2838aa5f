use nesta_core::{LocationStatus, LocationStore, NestaError, Role};
use nesta_test_utils::{
    create_test_app_state, create_test_stores, principal_for, seed_location, seed_user,
};

#[tokio::test]
async fn duplicate_request_reports_its_state() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_location(&stores, "loc1", LocationStatus::Collecting, 5).await;
    let user = seed_user(&stores, "+15550300", Role::User).await;
    let tracker = state.thresholds();

    let request = tracker.create_interest_request("loc1", "+15550300").await.unwrap();
    assert!(!request.verified);

    assert!(matches!(
        tracker.create_interest_request("loc1", " +15550300 ").await,
        Err(NestaError::PendingVerification)
    ));

    tracker.verify_request(&principal_for(&user), &request.id).await.unwrap();
    assert!(matches!(
        tracker.create_interest_request("loc1", "+15550300").await,
        Err(NestaError::AlreadyVerified)
    ));
}

#[tokio::test]
async fn request_for_unknown_location_fails() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    let tracker = state.thresholds();

    assert!(matches!(
        tracker.create_interest_request("nowhere", "+15550310").await,
        Err(NestaError::NotFound(_))
    ));
    assert!(matches!(
        tracker.create_interest_request("nowhere", "  ").await,
        Err(NestaError::Validation(_))
    ));
}

#[tokio::test]
async fn verification_is_limited_to_phone_owner_or_admin() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_location(&stores, "loc1", LocationStatus::Collecting, 5).await;
    seed_user(&stores, "+15550320", Role::User).await;
    let stranger = seed_user(&stores, "+15550321", Role::User).await;
    let admin = seed_user(&stores, "+15550322", Role::Admin).await;
    let tracker = state.thresholds();

    let request = tracker.create_interest_request("loc1", "+15550320").await.unwrap();
    assert!(matches!(
        tracker.verify_request(&principal_for(&stranger), &request.id).await,
        Err(NestaError::Forbidden(_))
    ));

    let location = tracker
        .verify_request(&principal_for(&admin), &request.id)
        .await
        .unwrap();
    assert_eq!(location.current_requests, 1);

    assert!(matches!(
        tracker.verify_request(&principal_for(&admin), &request.id).await,
        Err(NestaError::AlreadyVerified)
    ));
    assert!(matches!(
        tracker.verify_request(&principal_for(&admin), "ghost").await,
        Err(NestaError::NotFound(_))
    ));
}

#[tokio::test]
async fn location_launches_exactly_at_threshold() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_location(&stores, "loc1", LocationStatus::Collecting, 5).await;
    let admin = principal_for(&seed_user(&stores, "+15550330", Role::Admin).await);
    let tracker = state.thresholds();

    for i in 0..4 {
        let request = tracker
            .create_interest_request("loc1", &format!("+1555034{i}"))
            .await
            .unwrap();
        let location = tracker.verify_request(&admin, &request.id).await.unwrap();
        assert_eq!(location.status, LocationStatus::Collecting);
    }

    let fifth = tracker.create_interest_request("loc1", "+15550345").await.unwrap();
    let location = tracker.verify_request(&admin, &fifth.id).await.unwrap();
    assert_eq!(location.current_requests, 5);
    assert_eq!(location.status, LocationStatus::Planned);

    let sixth = tracker.create_interest_request("loc1", "+15550346").await.unwrap();
    let location = tracker.verify_request(&admin, &sixth.id).await.unwrap();
    assert_eq!(location.current_requests, 6);
    assert_eq!(location.status, LocationStatus::Planned);

    let stored = stores.location_store.get_location("loc1").await.unwrap().unwrap();
    assert_eq!(stored.current_requests, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_verifications_count_every_request() {
    let stores = create_test_stores().await;
    let state = create_test_app_state(&stores);
    seed_location(&stores, "loc1", LocationStatus::Collecting, 3).await;
    let admin = principal_for(&seed_user(&stores, "+15550350", Role::Admin).await);

    let mut ids = Vec::new();
    for i in 0..6 {
        let request = state
            .thresholds()
            .create_interest_request("loc1", &format!("+1555036{i}"))
            .await
            .unwrap();
        ids.push(request.id);
    }

    let tasks: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let state = state.clone();
            let admin = admin.clone();
            tokio::spawn(async move { state.thresholds().verify_request(&admin, &id).await })
        })
        .collect();

    let launched = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|location| location.current_requests == 3)
        .count();
    assert_eq!(launched, 1);

    let stored = stores.location_store.get_location("loc1").await.unwrap().unwrap();
    assert_eq!(stored.current_requests, 6);
    assert_eq!(stored.status, LocationStatus::Planned);
}
