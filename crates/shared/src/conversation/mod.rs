use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::MarketplaceSettings;
use crate::directory::ProviderDirectory;
use crate::kv::TtlStore;
use crate::locks::PhoneLocks;
use crate::messaging::{MessageSender, Outbox};
use crate::models::{RequestStatus, ServiceRequest};
use crate::relay::{ChatRelay, RelayError};
use crate::repos::{EntityStore, StoreError};
use crate::session::{SessionError, SessionStore};

pub mod customer;
pub mod offers;
pub mod provider;

pub use customer::{ChosenProvider, CustomerFlow, CustomerIdentity, CustomerState};
pub use offers::{OfferDispatch, OfferRequest, OfferResolution, OfferService};
pub use provider::{ProviderFlow, ProviderIdentity, ProviderState};

pub const GENERIC_FAILURE_TEXT: &str = "❌ Something went wrong. Please try again.";
pub(crate) const MIN_NAME_CHARS: usize = 2;
pub(crate) const MAX_NAME_CHARS: usize = 100;
/// Request statuses in which the matched parties may chat.
pub(crate) const CHATTABLE_STATUSES: [RequestStatus; 3] = [
    RequestStatus::ProviderAssigned,
    RequestStatus::ProviderArriving,
    RequestStatus::InProgress,
];

#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Collaborators shared by the customer and provider machines.
#[derive(Clone)]
pub struct Marketplace {
    pub sessions: SessionStore,
    pub store: Arc<dyn EntityStore>,
    pub outbox: Outbox,
    pub directory: ProviderDirectory,
    pub relay: ChatRelay,
    pub locks: PhoneLocks,
    pub offers: OfferService,
}

impl Marketplace {
    pub fn assemble(
        store: Arc<dyn EntityStore>,
        kv: Arc<dyn TtlStore>,
        sender: Arc<dyn MessageSender>,
        settings: &MarketplaceSettings,
    ) -> Self {
        let outbox = Outbox::new(sender);
        let sessions = SessionStore::new(kv.clone(), &settings.key_prefix, settings.session_ttl);
        let locks = PhoneLocks::new();
        let relay = ChatRelay::new(
            kv,
            store.clone(),
            outbox.clone(),
            &settings.key_prefix,
            settings.chat_session_ttl,
        );
        let offers = OfferService::new(
            sessions.clone(),
            store.clone(),
            outbox.clone(),
            locks.clone(),
            settings.offer_window,
        );

        Self {
            directory: ProviderDirectory::new(store.clone()),
            sessions,
            store,
            outbox,
            relay,
            locks,
            offers,
        }
    }
}

/// Re-prompt text for a rejected display name, `None` when the name is fine.
pub(crate) fn name_problem(name: &str) -> Option<&'static str> {
    let chars = name.chars().count();
    if chars < MIN_NAME_CHARS {
        Some("📝 Please enter a valid name (at least 2 characters).")
    } else if chars > MAX_NAME_CHARS {
        Some("📝 Name is too long. Please enter a shorter name.")
    } else {
        None
    }
}

pub(crate) fn request_heading(request: &ServiceRequest) -> String {
    format!(
        "{} *{}*",
        request.status.emoji(),
        request.service_type.as_str().to_uppercase()
    )
}

pub(crate) fn format_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

pub(crate) fn description_line(description: &str) -> String {
    if description.is_empty() {
        String::new()
    } else {
        format!("📝 Description: {description}\n")
    }
}
