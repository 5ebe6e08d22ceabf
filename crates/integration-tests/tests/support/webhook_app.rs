use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use shared::config::MarketplaceSettings;
use shared::dispatcher::Dispatcher;
use shared::kv::MemoryTtlStore;
use shared::messaging::{MessageSender, OutboundMessage, SendFuture, SendReceipt};
use shared::repos::MemoryStore;
use tokio::sync::Mutex;
use tower::ServiceExt;
use webhook_server::http::{AppState, build_router};

pub const VERIFY_TOKEN: &str = "integration-verify-token";

#[derive(Clone, Default)]
pub struct RecordingSender {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl RecordingSender {
    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn texts_to(&self, phone: &str) -> Vec<String> {
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
}

impl MessageSender for RecordingSender {
    fn send<'a>(&'a self, message: OutboundMessage) -> SendFuture<'a> {
        Box::pin(async move {
            self.sent.lock().await.push(message);
            Ok(SendReceipt::default())
        })
    }
}

pub struct WebhookApp {
    pub router: Router,
    pub store: MemoryStore,
    pub sender: RecordingSender,
    pub dispatcher: Dispatcher,
}

pub fn build_webhook_app() -> WebhookApp {
    let store = MemoryStore::new();
    let sender = RecordingSender::default();
    let dispatcher = Dispatcher::assemble(
        Arc::new(store.clone()),
        Arc::new(MemoryTtlStore::new()),
        Arc::new(sender.clone()),
        &MarketplaceSettings::default(),
    );
    let router = build_router(AppState {
        store: Arc::new(store.clone()),
        dispatcher: dispatcher.clone(),
        verify_token: VERIFY_TOKEN.to_string(),
    });

    WebhookApp {
        router,
        store,
        sender,
        dispatcher,
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should return a response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");
    (status, body.to_vec())
}

pub async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let value = serde_json::from_slice(&body).expect("response body should be json");
    (status, value)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

pub fn post_webhook(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

/// Waits for the detached webhook task to produce `count` outbound messages.
pub async fn wait_for_sent(sender: &RecordingSender, count: usize) -> Vec<OutboundMessage> {
    for _ in 0..200 {
        let sent = sender.sent().await;
        if sent.len() >= count {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sender.sent().await
}
