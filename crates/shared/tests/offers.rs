mod support;

use std::time::Duration;

use shared::conversation::customer::BTN_SEE_OTHER_PROVIDERS;
use shared::conversation::provider::{BTN_ACCEPT_REQUEST, BTN_DECLINE_REQUEST};
use shared::conversation::{OfferResolution, OfferService};
use shared::models::{AssignmentStatus, RequestStatus};
use shared::repos::EntityStore;
use support::{CUSTOMER_PHONE, Harness, PROVIDER_PHONE};
use uuid::Uuid;

fn offers(harness: &Harness) -> OfferService {
    harness.dispatcher.marketplace().offers.clone()
}

fn only_assignment_id(harness: &Harness) -> Uuid {
    let assignments = harness.store.assignments();
    assert_eq!(assignments.len(), 1, "exactly one assignment should exist");
    assignments[0].id
}

async fn count_bodies(harness: &Harness, phone: &str, needle: &str) -> usize {
    harness
        .sender
        .bodies_to(phone)
        .await
        .iter()
        .filter(|body| body.contains(needle))
        .count()
}

#[tokio::test]
async fn accept_wins_and_later_triggers_are_no_ops() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;
    let assignment_id = only_assignment_id(&harness);
    let offers = offers(&harness);
    let request_id = harness.only_request().id;

    assert_eq!(
        offers.accept(assignment_id).await.expect("accept should run"),
        OfferResolution::Resolved { request_id }
    );
    assert_eq!(
        offers.decline(assignment_id).await.expect("decline should run"),
        OfferResolution::AlreadyResolved
    );
    assert_eq!(
        offers.expire(assignment_id).await.expect("expiry should run"),
        OfferResolution::AlreadyResolved
    );

    assert_eq!(
        harness.store.assignments()[0].status,
        AssignmentStatus::Accepted
    );
    let request = harness.only_request();
    assert_eq!(request.status, RequestStatus::ProviderAssigned);
    assert!(request.accepted_at.is_some());
    assert_eq!(offers.pending_timers(), 0);
    assert_eq!(count_bodies(&harness, CUSTOMER_PHONE, "Great news").await, 1);
}

#[tokio::test]
async fn decline_wins_and_offers_the_customer_a_retry() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;
    let assignment_id = only_assignment_id(&harness);

    harness.button(PROVIDER_PHONE, BTN_DECLINE_REQUEST).await;

    let offers = offers(&harness);
    assert_eq!(
        offers.accept(assignment_id).await.expect("accept should run"),
        OfferResolution::AlreadyResolved
    );
    assert_eq!(
        offers.expire(assignment_id).await.expect("expiry should run"),
        OfferResolution::AlreadyResolved
    );
    assert_eq!(
        harness.store.assignments()[0].status,
        AssignmentStatus::Rejected
    );
    assert_eq!(harness.only_request().status, RequestStatus::Created);
    assert_eq!(harness.state(PROVIDER_PHONE).await.as_deref(), Some("IDLE"));
    assert!(
        harness
            .sender
            .button_ids_to(CUSTOMER_PHONE)
            .await
            .contains(&BTN_SEE_OTHER_PROVIDERS.to_string())
    );
}

#[tokio::test]
async fn accept_for_a_request_closed_meanwhile_cancels_the_assignment() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;
    let assignment_id = only_assignment_id(&harness);
    let request_id = harness.only_request().id;
    assert!(
        harness
            .store
            .transition_request(request_id, &[RequestStatus::Created], RequestStatus::Cancelled)
            .await
            .expect("transition should run")
    );

    let offers = offers(&harness);
    assert_eq!(
        offers.accept(assignment_id).await.expect("accept should run"),
        OfferResolution::AlreadyResolved
    );

    assert_eq!(
        harness.store.assignments()[0].status,
        AssignmentStatus::Cancelled
    );
    assert_eq!(harness.only_request().status, RequestStatus::Cancelled);
    assert_eq!(offers.pending_timers(), 0);
    assert_eq!(count_bodies(&harness, CUSTOMER_PHONE, "Great news").await, 0);
}

#[tokio::test]
async fn racing_triggers_resolve_exactly_once() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;
    let assignment_id = only_assignment_id(&harness);
    let offers = offers(&harness);

    let (expired, accepted, declined) = tokio::join!(
        offers.expire(assignment_id),
        offers.accept(assignment_id),
        offers.decline(assignment_id),
    );
    let resolved = [expired, accepted, declined]
        .into_iter()
        .map(|outcome| outcome.expect("trigger should run"))
        .filter(|outcome| matches!(outcome, OfferResolution::Resolved { .. }))
        .count();

    assert_eq!(resolved, 1);
    assert_ne!(
        harness.store.assignments()[0].status,
        AssignmentStatus::Pending
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_offer_expires_after_the_window() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;
    assert_eq!(
        harness.state(PROVIDER_PHONE).await.as_deref(),
        Some("AWAITING_REQUEST_RESPONSE")
    );

    tokio::time::sleep(Duration::from_secs(299)).await;
    assert_eq!(
        harness.store.assignments()[0].status,
        AssignmentStatus::Pending
    );

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        harness.store.assignments()[0].status,
        AssignmentStatus::Cancelled
    );
    assert_eq!(harness.only_request().status, RequestStatus::Cancelled);
    assert_eq!(harness.state(PROVIDER_PHONE).await.as_deref(), Some("IDLE"));
    assert_eq!(
        count_bodies(&harness, CUSTOMER_PHONE, "didn't respond in time").await,
        1
    );
    assert_eq!(
        count_bodies(&harness, PROVIDER_PHONE, "Request expired").await,
        1
    );
    assert_eq!(offers(&harness).pending_timers(), 0);

    harness.button(PROVIDER_PHONE, BTN_ACCEPT_REQUEST).await;
    assert_eq!(harness.only_request().status, RequestStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn accepted_offer_never_expires() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;

    harness.button(PROVIDER_PHONE, BTN_ACCEPT_REQUEST).await;
    assert_eq!(harness.state(PROVIDER_PHONE).await.as_deref(), Some("IDLE"));

    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(
        harness.store.assignments()[0].status,
        AssignmentStatus::Accepted
    );
    assert_eq!(
        harness.only_request().status,
        RequestStatus::ProviderAssigned
    );
    assert_eq!(
        count_bodies(&harness, CUSTOMER_PHONE, "didn't respond in time").await,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn configured_window_is_announced_and_honoured() {
    let harness = Harness::with_offer_window(Duration::from_secs(60));
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    harness.book(CUSTOMER_PHONE, "Ana", &provider).await;
    assert!(
        harness
            .sender
            .any_body_to(PROVIDER_PHONE, "Respond within 1 minute")
            .await
    );

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(harness.only_request().status, RequestStatus::Cancelled);
}

#[tokio::test]
async fn offer_to_own_phone_is_refused() {
    let harness = Harness::new();
    let provider = harness.seed_plumber("Luis", PROVIDER_PHONE);
    let offers = offers(&harness);

    let dispatch = offers
        .notify_provider(&shared::conversation::OfferRequest {
            request_id: Uuid::new_v4(),
            provider_id: provider.provider_id,
            customer_phone: PROVIDER_PHONE.to_string(),
            customer_name: "Luis".to_string(),
            service: shared::catalog::ServiceCategory::Plumbing,
            address: "Av. Reforma 222".to_string(),
            description: String::new(),
        })
        .await
        .expect("notify should run");

    assert_eq!(dispatch, shared::conversation::OfferDispatch::ProviderUnavailable);
    assert!(harness.store.assignments().is_empty());
    assert_eq!(offers.pending_timers(), 0);
}
