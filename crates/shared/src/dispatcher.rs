use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::MarketplaceSettings;
use crate::conversation::provider::is_register_command;
use crate::conversation::{
    CustomerFlow, FlowError, GENERIC_FAILURE_TEXT, Marketplace, ProviderFlow, ProviderState,
};
use crate::inbound::{InboundEvent, StatusUpdate, WebhookBatch};
use crate::kv::TtlStore;
use crate::messaging::MessageSender;
use crate::models::{MessageDirection, MessageLogEntry, Role, User};
use crate::redact::phone_label;
use crate::repos::EntityStore;
use crate::session::SessionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Customer,
    Provider,
}

/// Routes inbound events to the customer or provider machine, one event per
/// phone at a time.
#[derive(Clone)]
pub struct Dispatcher {
    market: Marketplace,
    customers: CustomerFlow,
    providers: ProviderFlow,
}

impl Dispatcher {
    pub fn new(market: Marketplace) -> Self {
        Self {
            customers: CustomerFlow::new(market.clone()),
            providers: ProviderFlow::new(market.clone()),
            market,
        }
    }

    pub fn assemble(
        store: Arc<dyn EntityStore>,
        kv: Arc<dyn TtlStore>,
        sender: Arc<dyn MessageSender>,
        settings: &MarketplaceSettings,
    ) -> Self {
        Self::new(Marketplace::assemble(store, kv, sender, settings))
    }

    pub fn marketplace(&self) -> &Marketplace {
        &self.market
    }

    /// Records and dispatches a decoded webhook notification. Events are
    /// handled in arrival order.
    pub async fn process_batch(&self, batch: WebhookBatch) {
        for status in &batch.statuses {
            self.record_status(status).await;
        }
        for event in &batch.events {
            self.record_inbound(event).await;
            if let Some(message_id) = &event.message_id {
                self.market.outbox.mark_read(message_id).await;
            }
            self.handle(event).await;
        }
    }

    pub async fn handle(&self, event: &InboundEvent) {
        let phone = event.sender_phone.as_str();
        let _guard = self.market.locks.lock(phone).await;

        match self.route_and_run(event).await {
            Ok(route) => debug!(phone = %phone_label(phone), ?route, "event handled"),
            Err(err) => {
                error!(
                    phone = %phone_label(phone),
                    message_type = event.message_type(),
                    "conversation failed: {err}"
                );
                self.market.outbox.send_text(phone, GENERIC_FAILURE_TEXT).await;
            }
        }
    }

    async fn route_and_run(&self, event: &InboundEvent) -> Result<Route, FlowError> {
        let phone = event.sender_phone.as_str();
        let session = self.market.sessions.get(phone).await?;
        let user = self.market.store.find_user_by_phone(phone).await?;

        let route = classify(event, session.as_ref(), user.as_ref());
        match route {
            Route::Provider => self.providers.handle(event, session, user).await?,
            Route::Customer => self.customers.handle(event, session, user).await?,
        }
        Ok(route)
    }

    async fn record_inbound(&self, event: &InboundEvent) {
        let entry = MessageLogEntry {
            wamid: event.message_id.clone(),
            phone_number: event.sender_phone.clone(),
            direction: MessageDirection::Inbound,
            message_type: event.message_type().to_string(),
            content: event.log_content(),
            status: "received".to_string(),
        };
        if let Err(err) = self.market.store.log_message(entry).await {
            warn!(
                phone = %phone_label(&event.sender_phone),
                "failed to log inbound message: {err}"
            );
        }
    }

    async fn record_status(&self, status: &StatusUpdate) {
        info!(
            message_id = %status.message_id,
            phone = %phone_label(&status.recipient_phone),
            status = %status.status,
            "delivery status update"
        );
        let entry = MessageLogEntry {
            wamid: Some(status.message_id.clone()),
            phone_number: status.recipient_phone.clone(),
            direction: MessageDirection::Outbound,
            message_type: "status".to_string(),
            content: json!({ "status": status.status }),
            status: status.status.clone(),
        };
        if let Err(err) = self.market.store.log_message(entry).await {
            warn!(message_id = %status.message_id, "failed to log status update: {err}");
        }
    }
}

/// Provider users, the registration command and provider-only session states
/// go to the provider machine; everything else is a customer.
pub fn classify(
    event: &InboundEvent,
    session: Option<&SessionRecord>,
    user: Option<&User>,
) -> Route {
    let provider_user = user.is_some_and(|user| user.role == Role::Provider);
    let provider_session =
        session.is_some_and(|record| ProviderState::is_exclusive_tag(&record.state));

    if provider_user || provider_session || is_register_command(event) {
        Route::Provider
    } else {
        Route::Customer
    }
}
