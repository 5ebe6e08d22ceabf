mod support;

use std::time::Duration;

use serde_json::Map;
use shared::catalog::ServiceCategory;
use shared::conversation::GENERIC_FAILURE_TEXT;
use shared::conversation::customer::{
    BTN_BACK_TO_LIST, BTN_BOOK_PROVIDER, BTN_CANCEL, BTN_CANCEL_REQUEST, BTN_MY_REQUESTS,
    BTN_SEE_OTHER_PROVIDERS, BTN_TRY_ANOTHER,
};
use shared::directory::provider_row_id;
use shared::models::{AssignmentStatus, RequestStatus, Role};
use support::{CUSTOMER_PHONE, Harness, OTHER_PROVIDER_PHONE, PROVIDER_PHONE};

#[tokio::test]
async fn new_customer_books_the_top_rated_plumber() {
    let harness = Harness::new();
    let top = harness
        .store
        .seed_provider("Luis", PROVIDER_PHONE, &[ServiceCategory::Plumbing], 4.9, 40, true);
    harness.store.seed_provider(
        "Marta",
        OTHER_PROVIDER_PHONE,
        &[ServiceCategory::Plumbing],
        4.1,
        8,
        true,
    );

    harness.text(CUSTOMER_PHONE, "menu").await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_SERVICE_SELECTION")
    );
    let service_rows = harness.sender.list_row_ids_to(CUSTOMER_PHONE).await;
    assert!(service_rows.contains(&"service_plumbing".to_string()));

    harness
        .list(CUSTOMER_PHONE, &ServiceCategory::Plumbing.row_id())
        .await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_NAME")
    );

    harness.sender.clear().await;
    harness.text(CUSTOMER_PHONE, "Ana").await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("PROVIDER_LIST")
    );
    let provider_rows = harness.sender.list_row_ids_to(CUSTOMER_PHONE).await;
    assert_eq!(provider_rows.len(), 2);
    assert_eq!(provider_rows[0], provider_row_id(top.provider_id));

    let customer = harness
        .store
        .users()
        .into_iter()
        .find(|user| user.phone == CUSTOMER_PHONE)
        .expect("customer should be registered");
    assert_eq!(customer.name, "Ana");
    assert_eq!(customer.role, Role::Customer);

    harness.list(CUSTOMER_PHONE, &provider_rows[0]).await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("PROVIDER_DETAIL")
    );

    harness.text(CUSTOMER_PHONE, "book").await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_LOCATION")
    );

    harness.text(CUSTOMER_PHONE, "123 Main St").await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_DESCRIPTION")
    );

    harness.text(CUSTOMER_PHONE, "skip").await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("BOOKING_CONFIRMED")
    );

    let request = harness.only_request();
    assert_eq!(request.status, RequestStatus::Created);
    assert_eq!(request.provider_id, Some(top.provider_id));
    assert_eq!(request.customer_id, customer.id);
    assert_eq!(request.address, "123 Main St");
    assert_eq!(request.description, "");

    let assignments = harness.store.assignments();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].status, AssignmentStatus::Pending);
    assert_eq!(
        harness.state(PROVIDER_PHONE).await.as_deref(),
        Some("AWAITING_REQUEST_RESPONSE")
    );
    assert!(
        harness
            .sender
            .any_body_to(PROVIDER_PHONE, "New Service Request")
            .await
    );
}

#[tokio::test]
async fn replayed_confirmation_does_not_create_a_second_request() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;
    assert_eq!(harness.store.service_requests().len(), 1);

    harness.sender.clear().await;
    harness.text(CUSTOMER_PHONE, "Leaking kitchen sink").await;
    harness.text(CUSTOMER_PHONE, "skip").await;

    assert_eq!(harness.store.service_requests().len(), 1);
    assert_eq!(harness.store.assignments().len(), 1);
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("BOOKING_CONFIRMED")
    );
    assert!(
        harness
            .sender
            .any_body_to(CUSTOMER_PHONE, "has been submitted")
            .await
    );
}

#[tokio::test]
async fn names_outside_bounds_are_re_prompted_in_place() {
    let harness = Harness::new();
    harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.text(CUSTOMER_PHONE, "hi").await;
    harness.text(CUSTOMER_PHONE, "plumber").await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_NAME")
    );

    harness.text(CUSTOMER_PHONE, "A").await;
    harness.text(CUSTOMER_PHONE, &"x".repeat(101)).await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_NAME")
    );
    assert!(harness.store.users().iter().all(|user| user.phone != CUSTOMER_PHONE));

    harness.text(CUSTOMER_PHONE, &"x".repeat(100)).await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("PROVIDER_LIST")
    );
}

#[tokio::test]
async fn short_addresses_are_rejected_and_shared_locations_accepted() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.text(CUSTOMER_PHONE, "hola").await;
    harness
        .list(CUSTOMER_PHONE, &ServiceCategory::Plumbing.row_id())
        .await;
    harness.text(CUSTOMER_PHONE, "Ana").await;
    harness
        .list(CUSTOMER_PHONE, &provider_row_id(provider.provider_id))
        .await;
    harness.button(CUSTOMER_PHONE, BTN_BOOK_PROVIDER).await;

    harness.text(CUSTOMER_PHONE, "ab").await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_LOCATION")
    );

    harness.location(CUSTOMER_PHONE, None, None).await;
    let session = harness
        .session(CUSTOMER_PHONE)
        .await
        .expect("session should exist");
    assert_eq!(session.state, "AWAITING_DESCRIPTION");
    let location = session
        .data
        .get("location")
        .expect("location should be stored");
    assert_eq!(location["address"], "Shared Location");
}

#[tokio::test]
async fn empty_listing_offers_retry_and_cancel() {
    let harness = Harness::new();
    harness.text(CUSTOMER_PHONE, "hola").await;
    harness
        .list(CUSTOMER_PHONE, &ServiceCategory::Gardening.row_id())
        .await;
    harness.text(CUSTOMER_PHONE, "Ana").await;

    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("REGISTERED")
    );
    let buttons = harness.sender.button_ids_to(CUSTOMER_PHONE).await;
    assert!(buttons.contains(&BTN_TRY_ANOTHER.to_string()));
    assert!(buttons.contains(&BTN_CANCEL.to_string()));

    harness.button(CUSTOMER_PHONE, BTN_TRY_ANOTHER).await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_SERVICE_SELECTION")
    );

    harness
        .list(CUSTOMER_PHONE, &ServiceCategory::Gardening.row_id())
        .await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("SERVICE_SELECTED")
    );

    harness.button(CUSTOMER_PHONE, BTN_CANCEL).await;
    assert_eq!(harness.state(CUSTOMER_PHONE).await, None);
}

#[tokio::test]
async fn back_to_list_returns_from_provider_detail() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.text(CUSTOMER_PHONE, "hola").await;
    harness.text(CUSTOMER_PHONE, "pipes").await;
    harness.text(CUSTOMER_PHONE, "Ana").await;
    harness
        .list(CUSTOMER_PHONE, &provider_row_id(provider.provider_id))
        .await;
    assert!(harness.sender.any_body_to(CUSTOMER_PHONE, "Luis").await);

    harness.button(CUSTOMER_PHONE, BTN_BACK_TO_LIST).await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("PROVIDER_LIST")
    );
}

#[tokio::test]
async fn unknown_session_state_restarts_the_flow() {
    let harness = Harness::new();
    harness
        .dispatcher
        .marketplace()
        .sessions
        .put(CUSTOMER_PHONE, "TELEPORTING", Map::new())
        .await
        .expect("session write should succeed");

    harness.text(CUSTOMER_PHONE, "hola").await;

    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_SERVICE_SELECTION")
    );
    assert!(harness.sender.any_body_to(CUSTOMER_PHONE, "Welcome").await);
}

#[tokio::test]
async fn store_failure_leaves_the_session_untouched() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.text(CUSTOMER_PHONE, "hola").await;
    harness.text(CUSTOMER_PHONE, "plumbing").await;
    harness.text(CUSTOMER_PHONE, "Ana").await;
    let before = harness
        .session(CUSTOMER_PHONE)
        .await
        .expect("session should exist");
    assert_eq!(before.state, "PROVIDER_LIST");

    harness.store.set_available(false);
    harness.sender.clear().await;
    harness
        .list(CUSTOMER_PHONE, &provider_row_id(provider.provider_id))
        .await;
    harness.store.set_available(true);

    assert_eq!(
        harness.sender.bodies_to(CUSTOMER_PHONE).await,
        vec![GENERIC_FAILURE_TEXT.to_string()]
    );
    assert_eq!(harness.session(CUSTOMER_PHONE).await, Some(before));

    harness
        .list(CUSTOMER_PHONE, &provider_row_id(provider.provider_id))
        .await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("PROVIDER_DETAIL")
    );
}

#[tokio::test]
async fn returning_customer_sees_the_active_request() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;

    harness.text(CUSTOMER_PHONE, "cancel").await;
    assert_eq!(harness.state(CUSTOMER_PHONE).await, None);

    harness.sender.clear().await;
    harness.text(CUSTOMER_PHONE, "hola").await;
    assert_eq!(harness.state(CUSTOMER_PHONE).await.as_deref(), Some("WELCOME"));
    assert!(
        harness
            .sender
            .any_body_to(CUSTOMER_PHONE, "You have an active request")
            .await
    );

    harness.sender.clear().await;
    harness.button(CUSTOMER_PHONE, BTN_MY_REQUESTS).await;
    assert!(
        harness
            .sender
            .any_body_to(CUSTOMER_PHONE, "Your Recent Requests")
            .await
    );
}

#[tokio::test]
async fn cancel_request_withdraws_the_pending_offer() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;
    assert_eq!(
        harness.dispatcher.marketplace().offers.pending_timers(),
        1
    );

    harness.button(CUSTOMER_PHONE, BTN_CANCEL_REQUEST).await;

    assert_eq!(harness.only_request().status, RequestStatus::Cancelled);
    assert_eq!(
        harness.store.assignments()[0].status,
        AssignmentStatus::Cancelled
    );
    assert_eq!(harness.dispatcher.marketplace().offers.pending_timers(), 0);
    assert_eq!(harness.state(CUSTOMER_PHONE).await, None);
}

#[tokio::test]
async fn see_other_providers_relists_the_same_category() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.seed_plumber("Marta", OTHER_PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;

    harness.sender.clear().await;
    harness.button(CUSTOMER_PHONE, BTN_SEE_OTHER_PROVIDERS).await;

    assert_eq!(harness.only_request().status, RequestStatus::Cancelled);
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("PROVIDER_LIST")
    );
    assert_eq!(harness.sender.list_row_ids_to(CUSTOMER_PHONE).await.len(), 2);

    // The provider's late accept is now a no-op.
    harness
        .button(PROVIDER_PHONE, shared::conversation::provider::BTN_ACCEPT_REQUEST)
        .await;
    assert_eq!(harness.only_request().status, RequestStatus::Cancelled);
    assert!(
        harness
            .sender
            .any_body_to(PROVIDER_PHONE, "no longer available")
            .await
    );
}

#[tokio::test]
async fn booking_retried_after_a_lost_session_write_creates_one_request() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.text(CUSTOMER_PHONE, "hola").await;
    harness
        .list(CUSTOMER_PHONE, &ServiceCategory::Plumbing.row_id())
        .await;
    harness.text(CUSTOMER_PHONE, "Ana").await;
    harness
        .list(CUSTOMER_PHONE, &provider_row_id(provider.provider_id))
        .await;
    harness.button(CUSTOMER_PHONE, BTN_BOOK_PROVIDER).await;
    harness.text(CUSTOMER_PHONE, "Av. Reforma 222").await;
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_DESCRIPTION")
    );

    harness.kv.set_failing_writes(true);
    harness.sender.clear().await;
    harness.text(CUSTOMER_PHONE, "skip").await;
    harness.kv.set_failing_writes(false);

    assert_eq!(
        harness.sender.bodies_to(CUSTOMER_PHONE).await,
        vec![GENERIC_FAILURE_TEXT.to_string()]
    );
    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_DESCRIPTION")
    );
    let first = harness.only_request();
    assert!(harness.store.assignments().is_empty());

    harness.text(CUSTOMER_PHONE, "skip").await;

    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("BOOKING_CONFIRMED")
    );
    assert_eq!(harness.only_request().id, first.id);
    let assignments = harness.store.assignments();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].request_id, first.id);
}

#[tokio::test(start_paused = true)]
async fn see_other_providers_after_an_unanswered_offer_relists_the_category() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.seed_plumber("Marta", OTHER_PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(harness.only_request().status, RequestStatus::Cancelled);
    assert!(
        harness
            .sender
            .button_ids_to(CUSTOMER_PHONE)
            .await
            .contains(&BTN_SEE_OTHER_PROVIDERS.to_string())
    );

    harness.sender.clear().await;
    harness.button(CUSTOMER_PHONE, BTN_SEE_OTHER_PROVIDERS).await;

    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("PROVIDER_LIST")
    );
    assert_eq!(harness.sender.list_row_ids_to(CUSTOMER_PHONE).await.len(), 2);
    assert!(!harness.sender.any_body_to(CUSTOMER_PHONE, "already").await);
}
