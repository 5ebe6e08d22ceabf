use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::ServiceCategory;
use crate::locks::PhoneLocks;
use crate::messaging::{Outbox, ReplyButton};
use crate::models::{AssignmentStatus, ProviderDetail, RequestStatus, ServiceRequest, User};
use crate::redact::phone_label;
use crate::repos::{EntityStore, StoreError};
use crate::session::{SessionStore, decode_state};

use super::customer::retry_buttons;
use super::provider::{
    BTN_ACCEPT_REQUEST, BTN_CHAT_CUSTOMER, BTN_DECLINE_REQUEST, PendingOffer, ProviderIdentity,
    ProviderState,
};
use super::{FlowError, description_line};

/// Requests that may still be handed to a provider.
pub(crate) const OPEN_REQUEST_STATUSES: [RequestStatus; 2] =
    [RequestStatus::Created, RequestStatus::Searching];

/// A freshly booked request to put in front of one provider.
#[derive(Debug, Clone)]
pub struct OfferRequest {
    pub request_id: Uuid,
    pub provider_id: Uuid,
    pub customer_phone: String,
    pub customer_name: String,
    pub service: ServiceCategory,
    pub address: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferDispatch {
    Sent {
        assignment_id: Uuid,
        provider_phone: String,
    },
    /// No reachable provider profile; nothing was created.
    ProviderUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferResolution {
    Resolved { request_id: Uuid },
    /// Another trigger already moved the assignment out of pending.
    AlreadyResolved,
}

/// Offer protocol: one pending assignment per offer, resolved exactly once
/// by accept, decline or the expiry timer.
#[derive(Clone)]
pub struct OfferService {
    inner: Arc<OfferInner>,
}

struct OfferInner {
    sessions: SessionStore,
    store: Arc<dyn EntityStore>,
    outbox: Outbox,
    locks: PhoneLocks,
    window: Duration,
    timers: Mutex<HashMap<Uuid, PendingTimer>>,
}

struct PendingTimer {
    request_id: Uuid,
    handle: AbortHandle,
}

impl OfferService {
    pub fn new(
        sessions: SessionStore,
        store: Arc<dyn EntityStore>,
        outbox: Outbox,
        locks: PhoneLocks,
        window: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(OfferInner {
                sessions,
                store,
                outbox,
                locks,
                window,
                timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates the pending assignment, prompts the provider, parks the
    /// provider's session on the offer and arms the expiry timer.
    ///
    /// Takes the provider's phone lock. Callers may hold a customer lock but
    /// never the provider's own.
    pub async fn notify_provider(&self, offer: &OfferRequest) -> Result<OfferDispatch, FlowError> {
        let inner = &self.inner;
        let Some(provider) = inner.store.get_provider_detail(offer.provider_id).await? else {
            warn!(
                provider_id = %offer.provider_id,
                request_id = %offer.request_id,
                "offer target has no provider profile"
            );
            return Ok(OfferDispatch::ProviderUnavailable);
        };
        if provider.phone == offer.customer_phone {
            warn!(request_id = %offer.request_id, "refusing to offer a request to its own customer");
            return Ok(OfferDispatch::ProviderUnavailable);
        }

        let assignment = inner
            .store
            .create_assignment(offer.request_id, offer.provider_id)
            .await?;
        self.arm_timer(assignment.id, offer.request_id);

        let _guard = inner.locks.lock(&provider.phone).await;
        inner
            .outbox
            .send_buttons(
                &provider.phone,
                offer_text(offer, inner.window),
                &[
                    ReplyButton::new(BTN_ACCEPT_REQUEST, "✅ Accept"),
                    ReplyButton::new(BTN_DECLINE_REQUEST, "❌ Decline"),
                ],
            )
            .await;
        inner
            .sessions
            .put_state(
                &provider.phone,
                &ProviderState::AwaitingRequestResponse {
                    identity: identity_of(&provider),
                    offer: PendingOffer {
                        request_id: offer.request_id,
                        assignment_id: assignment.id,
                        customer_name: offer.customer_name.clone(),
                    },
                },
            )
            .await?;

        info!(
            request_id = %offer.request_id,
            assignment_id = %assignment.id,
            provider = %phone_label(&provider.phone),
            "offer sent to provider"
        );
        Ok(OfferDispatch::Sent {
            assignment_id: assignment.id,
            provider_phone: provider.phone,
        })
    }

    pub async fn accept(&self, assignment_id: Uuid) -> Result<OfferResolution, FlowError> {
        let store = &self.inner.store;
        if !store
            .claim_assignment(assignment_id, AssignmentStatus::Accepted)
            .await?
        {
            debug!(assignment_id = %assignment_id, "accept lost the race");
            return Ok(OfferResolution::AlreadyResolved);
        }
        self.disarm(assignment_id);

        let (request, provider, customer) = self.offer_parties(assignment_id).await?;
        if !store
            .transition_request(
                request.id,
                &OPEN_REQUEST_STATUSES,
                RequestStatus::ProviderAssigned,
            )
            .await?
        {
            warn!(
                request_id = %request.id,
                status = request.status.as_str(),
                "accepted offer for a request that is no longer open"
            );
            store.revoke_accepted_assignment(assignment_id).await?;
            return Ok(OfferResolution::AlreadyResolved);
        }

        let outbox = &self.inner.outbox;
        let customer_name = customer_name(customer.as_ref());
        if let Some(customer) = &customer {
            outbox
                .send_text(
                    &customer.phone,
                    format!(
                        "✅ Great news! {} has accepted your request!\n\nThey'll be in touch shortly. You can now chat directly.",
                        provider.name
                    ),
                )
                .await;
            outbox
                .send_buttons(
                    &customer.phone,
                    "What would you like to do?",
                    &[ReplyButton::new(super::customer::BTN_START_CHAT, "💬 Start Chat")],
                )
                .await;
        }
        outbox
            .send_text(
                &provider.phone,
                format!(
                    "✅ You accepted the request from {customer_name}.\n\n📍 Address: {}\n{}",
                    request.address,
                    description_line(&request.description)
                ),
            )
            .await;
        outbox
            .send_buttons(
                &provider.phone,
                "What would you like to do?",
                &[ReplyButton::new(BTN_CHAT_CUSTOMER, "💬 Chat with Customer")],
            )
            .await;

        info!(request_id = %request.id, assignment_id = %assignment_id, "offer accepted");
        Ok(OfferResolution::Resolved {
            request_id: request.id,
        })
    }

    pub async fn decline(&self, assignment_id: Uuid) -> Result<OfferResolution, FlowError> {
        if !self
            .inner
            .store
            .claim_assignment(assignment_id, AssignmentStatus::Rejected)
            .await?
        {
            debug!(assignment_id = %assignment_id, "decline lost the race");
            return Ok(OfferResolution::AlreadyResolved);
        }
        self.disarm(assignment_id);

        let (request, provider, customer) = self.offer_parties(assignment_id).await?;
        let outbox = &self.inner.outbox;
        if let Some(customer) = &customer {
            outbox
                .send_text(
                    &customer.phone,
                    "😕 The provider is currently unavailable.\n\nWould you like to try another provider?",
                )
                .await;
            outbox
                .send_buttons(&customer.phone, "Choose an option:", &retry_buttons())
                .await;
        }
        outbox
            .send_text(
                &provider.phone,
                format!(
                    "❌ You declined the request from {}.\n\nYou're still online and will receive new requests.",
                    customer_name(customer.as_ref())
                ),
            )
            .await;

        info!(request_id = %request.id, assignment_id = %assignment_id, "offer declined");
        Ok(OfferResolution::Resolved {
            request_id: request.id,
        })
    }

    /// Timer path. Cancels the assignment and its request when still pending
    /// and releases the provider's session if it is parked on this offer.
    pub async fn expire(&self, assignment_id: Uuid) -> Result<OfferResolution, FlowError> {
        self.forget(assignment_id);
        let inner = &self.inner;
        if !inner
            .store
            .claim_assignment(assignment_id, AssignmentStatus::Cancelled)
            .await?
        {
            debug!(assignment_id = %assignment_id, "offer resolved before expiry");
            return Ok(OfferResolution::AlreadyResolved);
        }

        let (request, provider, customer) = self.offer_parties(assignment_id).await?;
        inner
            .store
            .transition_request(request.id, &OPEN_REQUEST_STATUSES, RequestStatus::Cancelled)
            .await?;

        inner
            .outbox
            .send_text(&provider.phone, "⏱ Request expired. You didn't respond in time.")
            .await;
        if let Some(customer) = &customer {
            inner
                .outbox
                .send_text(
                    &customer.phone,
                    "😕 The provider didn't respond in time.\n\nWould you like to try another provider?",
                )
                .await;
            inner
                .outbox
                .send_buttons(&customer.phone, "Choose an option:", &retry_buttons())
                .await;
        }

        let _guard = inner.locks.lock(&provider.phone).await;
        let parked = inner
            .sessions
            .get(&provider.phone)
            .await?
            .and_then(|record| decode_state::<ProviderState>(&record))
            .and_then(|state| match state {
                ProviderState::AwaitingRequestResponse { identity, offer }
                | ProviderState::RequestReceived { identity, offer }
                    if offer.assignment_id == assignment_id =>
                {
                    Some(identity)
                }
                _ => None,
            });
        if let Some(identity) = parked {
            inner
                .sessions
                .put_state(&provider.phone, &ProviderState::Idle { identity })
                .await?;
        }

        info!(request_id = %request.id, assignment_id = %assignment_id, "offer expired");
        Ok(OfferResolution::Resolved {
            request_id: request.id,
        })
    }

    /// Stops the expiry timers of every offer made for `request_id`.
    pub fn withdraw(&self, request_id: Uuid) {
        let mut timers = lock_timers(&self.inner.timers);
        timers.retain(|_, timer| {
            if timer.request_id == request_id {
                timer.handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Number of armed expiry timers.
    pub fn pending_timers(&self) -> usize {
        lock_timers(&self.inner.timers).len()
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    fn arm_timer(&self, assignment_id: Uuid, request_id: Uuid) {
        let service = self.clone();
        let window = self.inner.window;
        let task = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Err(err) = service.expire(assignment_id).await {
                error!(assignment_id = %assignment_id, "offer expiry failed: {err}");
            }
        });

        let previous = lock_timers(&self.inner.timers).insert(
            assignment_id,
            PendingTimer {
                request_id,
                handle: task.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    fn disarm(&self, assignment_id: Uuid) {
        if let Some(timer) = lock_timers(&self.inner.timers).remove(&assignment_id) {
            timer.handle.abort();
        }
    }

    /// Drops the bookkeeping entry without aborting; used from inside the
    /// timer task itself.
    fn forget(&self, assignment_id: Uuid) {
        lock_timers(&self.inner.timers).remove(&assignment_id);
    }

    async fn offer_parties(
        &self,
        assignment_id: Uuid,
    ) -> Result<(ServiceRequest, ProviderDetail, Option<User>), FlowError> {
        let store = &self.inner.store;
        let assignment = store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("assignment {assignment_id}")))?;
        let request = store
            .get_service_request(assignment.request_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("service request {}", assignment.request_id)))?;
        let provider = store
            .get_provider_detail(assignment.provider_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("provider {}", assignment.provider_id)))?;
        let customer = store.get_user(request.customer_id).await?;
        Ok((request, provider, customer))
    }
}

pub(crate) fn identity_of(provider: &ProviderDetail) -> ProviderIdentity {
    ProviderIdentity {
        user_id: provider.user_id,
        provider_id: provider.provider_id,
        name: provider.name.clone(),
    }
}

fn customer_name(customer: Option<&User>) -> String {
    customer
        .map(|customer| customer.name.clone())
        .unwrap_or_else(|| "the customer".to_string())
}

fn offer_text(offer: &OfferRequest, window: Duration) -> String {
    format!(
        "🔔 *New Service Request!*\n\n🛠 Service: {}\n👤 Customer: {}\n📍 Address: {}\n{}\n⏱ Respond within {}",
        offer.service.title(),
        offer.customer_name,
        offer.address,
        description_line(&offer.description),
        format_window(window)
    )
}

pub(crate) fn format_window(window: Duration) -> String {
    let seconds = window.as_secs();
    match (seconds / 60, seconds % 60) {
        (1, 0) => "1 minute".to_string(),
        (minutes, 0) if minutes > 0 => format!("{minutes} minutes"),
        _ if seconds == 1 => "1 second".to_string(),
        _ => format!("{seconds} seconds"),
    }
}

fn lock_timers(
    timers: &Mutex<HashMap<Uuid, PendingTimer>>,
) -> MutexGuard<'_, HashMap<Uuid, PendingTimer>> {
    match timers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
