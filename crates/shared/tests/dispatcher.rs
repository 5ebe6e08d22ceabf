mod support;

use serde_json::json;
use shared::inbound::{InboundEvent, WebhookPayload};
use shared::messaging::OutboundMessage;
use shared::models::MessageDirection;
use support::{CUSTOMER_PHONE, Harness, OTHER_CUSTOMER_PHONE, PROVIDER_PHONE};

fn payload(value: serde_json::Value) -> WebhookPayload {
    serde_json::from_value(value).expect("payload should decode")
}

#[tokio::test]
async fn batch_is_logged_marked_read_and_dispatched_in_order() {
    let harness = Harness::new();
    harness.seed_plumber("Luis", PROVIDER_PHONE);
    let batch = payload(json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "changes": [{
                "value": {
                    "contacts": [{ "profile": { "name": "Ana" } }],
                    "messages": [
                        {
                            "from": CUSTOMER_PHONE,
                            "id": "wamid.1",
                            "type": "text",
                            "text": { "body": "hola" }
                        },
                        {
                            "from": CUSTOMER_PHONE,
                            "id": "wamid.2",
                            "type": "interactive",
                            "interactive": {
                                "type": "list_reply",
                                "list_reply": { "id": "service_plumbing", "title": "🔧 Plumbing" }
                            }
                        }
                    ],
                    "statuses": [
                        { "id": "wamid.out", "recipient_id": PROVIDER_PHONE, "status": "delivered" }
                    ]
                }
            }]
        }]
    }))
    .into_batch();

    harness.dispatcher.process_batch(batch).await;

    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_NAME")
    );

    let log = harness.store.message_log();
    assert_eq!(log.len(), 3);
    assert_eq!(log[0].direction, MessageDirection::Outbound);
    assert_eq!(log[0].status, "delivered");
    assert_eq!(log[1].wamid.as_deref(), Some("wamid.1"));
    assert_eq!(log[1].direction, MessageDirection::Inbound);
    assert_eq!(log[1].content, json!({ "text": "hola" }));
    assert_eq!(log[2].message_type, "interactive");

    let read_receipts = harness
        .sender
        .sent()
        .await
        .into_iter()
        .filter_map(|message| match message {
            OutboundMessage::MarkRead { message_id } => Some(message_id),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(read_receipts, vec!["wamid.1", "wamid.2"]);
}

#[tokio::test]
async fn payload_without_object_is_ignored() {
    let harness = Harness::new();
    let batch = payload(json!({
        "entry": [{
            "changes": [{
                "value": {
                    "messages": [{
                        "from": CUSTOMER_PHONE,
                        "id": "wamid.1",
                        "type": "text",
                        "text": { "body": "hola" }
                    }]
                }
            }]
        }]
    }))
    .into_batch();

    harness.dispatcher.process_batch(batch).await;

    assert!(harness.sender.sent().await.is_empty());
    assert!(harness.store.message_log().is_empty());
}

#[tokio::test]
async fn events_for_one_phone_never_overlap() {
    let harness = Harness::new();
    harness.seed_plumber("Luis", PROVIDER_PHONE);
    let first = InboundEvent::text(CUSTOMER_PHONE, "Ana", "hola");
    let second = InboundEvent::text(CUSTOMER_PHONE, "Ana", "plumbing");
    let other = InboundEvent::text(OTHER_CUSTOMER_PHONE, "Beto", "hola");

    tokio::join!(
        harness.dispatcher.handle(&first),
        harness.dispatcher.handle(&second),
        harness.dispatcher.handle(&other),
    );

    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_NAME")
    );
    assert_eq!(
        harness.state(OTHER_CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_SERVICE_SELECTION")
    );
    assert_eq!(harness.dispatcher.marketplace().locks.tracked(), 0);
}

#[tokio::test]
async fn failed_sends_do_not_undo_committed_transitions() {
    let harness = Harness::new();
    harness.sender.set_failing(true);

    harness.text(CUSTOMER_PHONE, "hola").await;

    assert_eq!(
        harness.state(CUSTOMER_PHONE).await.as_deref(),
        Some("AWAITING_SERVICE_SELECTION")
    );
}
