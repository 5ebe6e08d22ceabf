#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use shared::catalog::ServiceCategory;
use shared::config::MarketplaceSettings;
use shared::conversation::customer::BTN_BOOK_PROVIDER;
use shared::directory::provider_row_id;
use shared::dispatcher::Dispatcher;
use shared::inbound::{InboundEvent, InboundKind};
use shared::kv::{KvError, KvFuture, MemoryTtlStore, TtlStore};
use shared::messaging::{MessageSender, OutboundMessage, SendError, SendFuture, SendReceipt};
use shared::models::{ProviderDetail, ServiceRequest};
use shared::repos::MemoryStore;
use shared::session::SessionRecord;
use tokio::sync::Mutex;

pub const CUSTOMER_PHONE: &str = "5215500000001";
pub const OTHER_CUSTOMER_PHONE: &str = "5215500000002";
pub const PROVIDER_PHONE: &str = "5215500000101";
pub const OTHER_PROVIDER_PHONE: &str = "5215500000102";

/// Records every outbound message instead of delivering it.
#[derive(Clone, Default)]
pub struct RecordingSender {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingSender {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }

    /// Text and button bodies addressed to `phone`, in send order.
    pub async fn bodies_to(&self, phone: &str) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|message| match message {
                OutboundMessage::Text { to, body } | OutboundMessage::Buttons { to, body, .. }
                    if to == phone =>
                {
                    Some(body.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub async fn button_ids_to(&self, phone: &str) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|message| match message {
                OutboundMessage::Buttons { to, buttons, .. } if to == phone => Some(buttons),
                _ => None,
            })
            .flatten()
            .map(|button| button.id.clone())
            .collect()
    }

    pub async fn list_row_ids_to(&self, phone: &str) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|message| match message {
                OutboundMessage::List { to, prompt } if to == phone => Some(prompt),
                _ => None,
            })
            .flat_map(|prompt| prompt.sections.iter())
            .flat_map(|section| section.rows.iter())
            .map(|row| row.id.clone())
            .collect()
    }

    pub async fn any_body_to(&self, phone: &str, needle: &str) -> bool {
        self.bodies_to(phone)
            .await
            .iter()
            .any(|body| body.contains(needle))
    }
}

impl MessageSender for RecordingSender {
    fn send<'a>(&'a self, message: OutboundMessage) -> SendFuture<'a> {
        Box::pin(async move {
            self.sent.lock().await.push(message);
            if self.failing.load(Ordering::SeqCst) {
                return Err(SendError::Transient {
                    code: "503".to_string(),
                    message: "upstream unavailable".to_string(),
                });
            }
            Ok(SendReceipt {
                message_id: Some("wamid.test".to_string()),
            })
        })
    }
}

/// Memory-backed TTL store whose writes can be made to fail like a dropped
/// Redis connection.
#[derive(Clone)]
pub struct SwitchableTtlStore {
    inner: MemoryTtlStore,
    failing_writes: Arc<AtomicBool>,
}

impl SwitchableTtlStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryTtlStore::new(),
            failing_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }
}

impl TtlStore for SwitchableTtlStore {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>> {
        self.inner.get(key)
    }

    fn set_ex<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> KvFuture<'a, ()> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Box::pin(async { Err(KvError::Connect("connection reset".to_string())) });
        }
        self.inner.set_ex(key, value, ttl)
    }

    fn delete<'a>(&'a self, key: &'a str) -> KvFuture<'a, bool> {
        self.inner.delete(key)
    }
}

/// In-memory marketplace wired the same way the server wires it.
pub struct Harness {
    pub store: MemoryStore,
    pub kv: SwitchableTtlStore,
    pub sender: RecordingSender,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(MarketplaceSettings::default())
    }

    pub fn with_offer_window(window: Duration) -> Self {
        Self::with_settings(MarketplaceSettings {
            offer_window: window,
            ..MarketplaceSettings::default()
        })
    }

    pub fn with_settings(settings: MarketplaceSettings) -> Self {
        let store = MemoryStore::new();
        let kv = SwitchableTtlStore::new();
        let sender = RecordingSender::default();
        let dispatcher = Dispatcher::assemble(
            Arc::new(store.clone()),
            Arc::new(kv.clone()),
            Arc::new(sender.clone()),
            &settings,
        );
        Self {
            store,
            kv,
            sender,
            dispatcher,
        }
    }

    pub fn seed_plumber(&self, name: &str, phone: &str) -> ProviderDetail {
        self.store
            .seed_provider(name, phone, &[ServiceCategory::Plumbing], 4.8, 12, true)
    }

    pub async fn text(&self, phone: &str, body: &str) {
        self.dispatcher
            .handle(&InboundEvent::text(phone, "WhatsApp User", body))
            .await;
    }

    pub async fn button(&self, phone: &str, id: &str) {
        self.dispatcher
            .handle(&InboundEvent::button(phone, "WhatsApp User", id))
            .await;
    }

    pub async fn list(&self, phone: &str, id: &str) {
        self.dispatcher
            .handle(&InboundEvent::list_reply(phone, "WhatsApp User", id))
            .await;
    }

    pub async fn location(&self, phone: &str, name: Option<&str>, address: Option<&str>) {
        self.dispatcher
            .handle(&InboundEvent::new(
                phone,
                "WhatsApp User",
                InboundKind::Location {
                    latitude: 19.4326,
                    longitude: -99.1332,
                    name: name.map(str::to_string),
                    address: address.map(str::to_string),
                },
            ))
            .await;
    }

    pub async fn session(&self, phone: &str) -> Option<SessionRecord> {
        self.dispatcher
            .marketplace()
            .sessions
            .get(phone)
            .await
            .expect("session read should succeed")
    }

    pub async fn state(&self, phone: &str) -> Option<String> {
        self.session(phone).await.map(|record| record.state)
    }

    /// Walks a new customer from first contact to a confirmed booking with
    /// `provider`.
    pub async fn book(&self, customer_phone: &str, customer_name: &str, provider: &ProviderDetail) {
        self.text(customer_phone, "hola").await;
        self.list(customer_phone, &ServiceCategory::Plumbing.row_id())
            .await;
        self.text(customer_phone, customer_name).await;
        self.list(customer_phone, &provider_row_id(provider.provider_id))
            .await;
        self.button(customer_phone, BTN_BOOK_PROVIDER).await;
        self.text(customer_phone, "Av. Reforma 222").await;
        self.text(customer_phone, "Leaking kitchen sink").await;
    }

    pub fn only_request(&self) -> ServiceRequest {
        let requests = self.store.service_requests();
        assert_eq!(requests.len(), 1, "exactly one request should exist");
        requests
            .into_iter()
            .next()
            .expect("request should exist")
    }
}
