use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use shared::dispatcher::Dispatcher;
use shared::repos::EntityStore;

mod errors;
mod health;
mod webhook;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub dispatcher: Dispatcher,
    pub verify_token: String,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/webhook", get(webhook::verify).post(webhook::receive))
        .with_state(app_state)
}
